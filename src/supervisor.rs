// Supervisor Module - capture process lifecycle and console output relay
use anyhow::{Context, Result};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// How often the relay re-checks the run flag while both streams are quiet
const FLAG_POLL: Duration = Duration::from_millis(100);

/// How long a stopped child gets to exit on its own before it is killed
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Lines held by the render buffer before it is wiped
pub const OUTPUT_BUFFER_CAP: usize = 10;

/// Render buffer for the most recent output lines. Not a log: once more than
/// `OUTPUT_BUFFER_CAP` lines accumulate the whole buffer is cleared, matching
/// the scrolling widget it feeds.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    lines: Vec<String>,
}

impl OutputBuffer {
    pub fn push(&mut self, line: String) {
        self.lines.push(line);
        if self.lines.len() > OUTPUT_BUFFER_CAP {
            self.lines.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.clone()
    }
}

/// A running capture child. The relay task owns the child process; the handle
/// owns the run flag and the task, so dropping the handle never leaks a child
/// that `stop` was called on.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    relay: JoinHandle<()>,
}

impl CaptureHandle {
    /// True until the child reaches EOF, fails, or a stop is requested
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flip the run flag without waiting. The relay observes it at the next
    /// line boundary or flag poll, so at most one more line gets delivered.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop the capture and wait until the child is gone. The relay closes the
    /// child's stdin, waits out a short grace period, then kills it; this
    /// returns only after that has happened.
    pub async fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.relay.await {
            eprintln!("✗ Capture relay task failed: {}", e);
        }
    }
}

/// Spawn the capture command with both output streams piped and start relaying
/// stdout lines to `on_line`. Fails if the runtime or executable cannot be
/// launched; after that, stream problems end the run but are never fatal.
pub fn spawn<F>(argv: &[String], on_line: F) -> Result<CaptureHandle>
where
    F: FnMut(String) + Send + 'static,
{
    let (program, rest) = argv.split_first().context("empty capture command line")?;
    let child = Command::new(program)
        .args(rest)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to launch {}", program))?;

    let running = Arc::new(AtomicBool::new(true));
    let relay = tokio::spawn(relay_loop(child, running.clone(), on_line));

    Ok(CaptureHandle { running, relay })
}

/// Drain the child's stdout and stderr line by line, first-completed-wins.
/// stdout lines go to `on_line` in arrival order; stderr lines go to the
/// operator's console only, never the UI log. The run flag is re-checked after
/// every delivered line (and on a short poll while the streams are quiet), so a
/// stop request is observed with bounded latency. stdout EOF ends the run;
/// stderr EOF merely stops the stderr arm so buffered stdout is never cut short.
async fn relay_loop<F>(mut child: Child, running: Arc<AtomicBool>, mut on_line: F)
where
    F: FnMut(String) + Send + 'static,
{
    let mut stdout = BufReader::new(child.stdout.take().expect("stdout piped"));
    let mut stderr = BufReader::new(child.stderr.take().expect("stderr piped"));
    let mut out_buf: Vec<u8> = Vec::new();
    let mut err_buf: Vec<u8> = Vec::new();
    let mut stderr_open = true;

    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            res = stdout.read_until(b'\n', &mut out_buf) => match res {
                Ok(0) => break,
                Ok(_) => {
                    // Non-UTF-8 bytes are replaced rather than dropped
                    let line = String::from_utf8_lossy(&out_buf);
                    on_line(line.trim_end_matches(['\r', '\n']).to_string());
                    out_buf.clear();
                }
                Err(e) => {
                    eprintln!("✗ Error reading capture output: {}", e);
                    break;
                }
            },
            res = stderr.read_until(b'\n', &mut err_buf), if stderr_open => match res {
                Ok(0) => stderr_open = false,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&err_buf);
                    eprintln!("STDERR: {}", line.trim_end_matches(['\r', '\n']));
                    err_buf.clear();
                }
                Err(e) => {
                    eprintln!("✗ Error reading capture stderr: {}", e);
                    stderr_open = false;
                }
            },
            _ = tokio::time::sleep(FLAG_POLL) => {}
        }
    }

    running.store(false, Ordering::SeqCst);

    // stdin EOF is the child's cue to wind down; escalate if it lingers
    drop(child.stdin.take());
    match timeout(STOP_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            if !status.success() {
                eprintln!("⚠️  Capture process exited with {}", status);
            }
        }
        Ok(Err(e)) => eprintln!("✗ Failed to reap capture process: {}", e),
        Err(_) => {
            eprintln!("⚠️  Capture process ignored stop request, killing it");
            if let Err(e) = child.kill().await {
                eprintln!("✗ Failed to kill capture process: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn collector() -> (Arc<Mutex<Vec<String>>>, impl FnMut(String) + Send + 'static) {
        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let on_line = move |line: String| sink.lock().unwrap().push(line);
        (lines, on_line)
    }

    async fn wait_until_stopped(handle: &CaptureHandle) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.is_running() {
            assert!(Instant::now() < deadline, "capture never reached EOF");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[test]
    fn test_output_buffer_clears_past_cap() {
        let mut buf = OutputBuffer::default();
        for i in 0..OUTPUT_BUFFER_CAP {
            buf.push(format!("line {}", i));
        }
        assert_eq!(buf.len(), OUTPUT_BUFFER_CAP);
        // One past the cap wipes the buffer instead of growing it
        buf.push("one more".to_string());
        assert!(buf.is_empty());
        buf.push("fresh".to_string());
        assert_eq!(buf.snapshot(), vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let argv = vec!["/nonexistent/vscapture-runtime".to_string()];
        assert!(spawn(&argv, |_| {}).is_err());
    }

    #[tokio::test]
    async fn test_relay_preserves_stdout_order() {
        let (lines, on_line) = collector();
        let handle = spawn(
            &sh("echo oops >&2; printf 'A\\nB\\nC\\n'; echo again >&2"),
            on_line,
        )
        .unwrap();

        wait_until_stopped(&handle).await;
        handle.stop().await;
        assert_eq!(*lines.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_eof_flips_run_flag() {
        let (_, on_line) = collector();
        let handle = spawn(&sh("printf 'one\\n'"), on_line).unwrap();
        wait_until_stopped(&handle).await;
        assert!(!handle.is_running());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_does_not_wait_for_child_output() {
        let (lines, on_line) = collector();
        let handle = spawn(&sh("echo A; sleep 30; echo B"), on_line).unwrap();

        // Wait for the first line so the relay is mid-stream
        let deadline = Instant::now() + Duration::from_secs(5);
        while lines.lock().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "first line never arrived");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let started = Instant::now();
        handle.stop().await;

        // Bounded by flag poll + grace + kill, nowhere near the child's sleep
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(*lines.lock().unwrap(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced_not_dropped() {
        let (lines, on_line) = collector();
        let handle = spawn(&sh("printf 'ok \\377\\n'"), on_line).unwrap();
        wait_until_stopped(&handle).await;
        handle.stop().await;

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok "));
        assert!(lines[0].contains('\u{FFFD}'));
    }
}
