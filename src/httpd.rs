// HTTP Server Module - Web UI and API endpoints
use anyhow::Result;
use async_stream::stream;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        Html, IntoResponse,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::command;
use crate::config::{self, Settings};
use crate::ports;
use crate::supervisor::{self, CaptureHandle, OutputBuffer};

const WEB_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>VSCapture Web Interface</title>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, Cantarell, sans-serif;
            background: #1a1a1a;
            color: #e0e0e0;
            padding: 20px;
            line-height: 1.6;
        }
        .container {
            max-width: 900px;
            margin: 0 auto;
        }
        h1 {
            color: #00aaff;
            margin-bottom: 30px;
            font-size: 2em;
        }
        .section {
            background: #2a2a2a;
            border: 1px solid #404040;
            border-radius: 8px;
            padding: 20px;
            margin-bottom: 20px;
        }
        .section-header {
            color: #00aaff;
            font-size: 1.3em;
            font-weight: 600;
            margin-bottom: 20px;
            padding-bottom: 10px;
            border-bottom: 2px solid #404040;
        }
        .config-item {
            margin-bottom: 12px;
        }
        .config-item label {
            display: block;
            color: #b0b0b0;
            margin-bottom: 8px;
            font-size: 0.9em;
            text-transform: uppercase;
            letter-spacing: 0.5px;
        }
        input[type="text"], select {
            width: 100%;
            background: #1a1a1a;
            border: 1px solid #505050;
            color: #e0e0e0;
            padding: 10px 12px;
            border-radius: 4px;
            font-size: 1em;
        }
        button {
            color: white;
            border: none;
            padding: 10px 20px;
            border-radius: 4px;
            cursor: pointer;
            font-size: 0.9em;
            font-weight: 600;
            margin-right: 10px;
        }
        button.start { background: #2255cc; }
        button.start:hover { background: #1a44a3; }
        button.stop { background: #2d8033; }
        button.stop:hover { background: #226627; }
        button.danger { background: #cc3333; }
        button.danger:hover { background: #a32020; }
        .status-label {
            color: #00aaff;
            font-weight: 600;
            margin-left: 10px;
        }
        #log {
            background: #1a1a1a;
            border: 1px solid #505050;
            border-radius: 4px;
            padding: 12px;
            height: 300px;
            overflow-y: auto;
            font-family: 'Courier New', monospace;
            font-size: 0.9em;
            white-space: pre-wrap;
        }
        .help-text {
            font-size: 0.85em;
            color: #808080;
            margin-top: 4px;
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>VSCapture Web Interface</h1>

        <div class="section">
            <div class="section-header">Logging Parameters</div>
            <div class="config-item">
                <label for="port">Port</label>
                <input type="text" id="port" list="port-list" onchange="saveField('port')"
                       title="Select the port that is connected to the anaesthetic machine">
                <datalist id="port-list"></datalist>
                <div class="help-text">Serial port the monitor is attached to</div>
            </div>
            <div class="config-item">
                <label for="interval">Logging interval</label>
                <select id="interval" onchange="saveField('interval')">
                    <option>5 Sec</option>
                    <option>10 Sec</option>
                    <option>30 Sec</option>
                    <option>1 Min</option>
                    <option>3 Mins</option>
                    <option>5 Mins</option>
                </select>
            </div>
            <div class="config-item">
                <label for="waveset">Wave set</label>
                <select id="waveset" onchange="saveField('waveset')">
                    <option>None</option>
                    <option>ECG1, INVP1, INVP2, PLETH</option>
                    <option>ECG1, INVP1, PLETH, CO2, RESP</option>
                    <option>ECG1, PLETH, CO2, RESP, AWP, VOL, FLOW</option>
                    <option>ECG1, ECG2</option>
                    <option>EEG1, EEG2, EEG3, EEG4</option>
                </select>
            </div>
            <div class="config-item">
                <label for="export">Data export option</label>
                <select id="export" onchange="saveField('export')">
                    <option>CSV files</option>
                    <option>CSV files and JSON URL</option>
                </select>
            </div>
            <div class="config-item">
                <label for="device_id">Device ID/Name</label>
                <input type="text" id="device_id" onchange="saveField('device_id')"
                       title="Device ID/Name for JSON export">
            </div>
            <div class="config-item">
                <label for="json_url">JSON data export URL (http://)</label>
                <input type="text" id="json_url" onchange="saveField('json_url')"
                       title="JSON data export URL">
            </div>
        </div>

        <div class="section">
            <button class="start" onclick="startLogging()">Start Logging</button>
            <button class="stop" onclick="stopLogging()">Stop Logging</button>
            <button class="danger" onclick="stopServer()">Stop Server</button>
            <span id="status" class="status-label"></span>
        </div>

        <div class="section">
            <div class="section-header">Data Output</div>
            <pre id="log"></pre>
        </div>
    </div>

    <script>
        async function loadConfig() {
            const cfg = await (await fetch('/api/config')).json();
            for (const field of ['port', 'interval', 'waveset', 'export', 'device_id', 'json_url']) {
                document.getElementById(field).value = cfg[field];
            }
        }

        async function loadPorts() {
            const ports = await (await fetch('/api/ports')).json();
            const list = document.getElementById('port-list');
            list.innerHTML = '';
            for (const p of ports) {
                const option = document.createElement('option');
                option.value = p;
                list.appendChild(option);
            }
        }

        async function saveField(field) {
            const value = document.getElementById(field).value;
            await fetch('/api/config', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ field: field, value: value })
            });
        }

        function appendLine(text) {
            const log = document.getElementById('log');
            log.textContent += text + '\n';
            log.scrollTop = log.scrollHeight;
        }

        async function refreshStatus() {
            try {
                const s = await (await fetch('/api/status')).json();
                document.getElementById('status').textContent = s.logging ? 'Logging active' : 'Idle';
            } catch (e) {
                document.getElementById('status').textContent = 'Server stopped';
            }
        }

        async function startLogging() {
            await fetch('/api/start', { method: 'POST' });
            refreshStatus();
        }

        async function stopLogging() {
            await fetch('/api/stop', { method: 'POST' });
            refreshStatus();
        }

        async function stopServer() {
            await fetch('/api/shutdown', { method: 'POST' });
        }

        const events = new EventSource('/api/log/events');
        events.addEventListener('line', (e) => appendLine(e.data));

        loadConfig();
        loadPorts();
        refreshStatus();
        setInterval(refreshStatus, 2000);
    </script>
</body>
</html>
"##;

/// Shared state behind every handler: the settings snapshot the operator is
/// editing, the capture handle (when logging), the render buffer and the
/// broadcast channel feeding the browser's log stream.
pub struct AppState {
    pub settings: Mutex<Settings>,
    pub capture: tokio::sync::Mutex<Option<CaptureHandle>>,
    pub buffer: Arc<Mutex<OutputBuffer>>,
    pub log_tx: broadcast::Sender<String>,
    pub mono: String,
    pub exe: PathBuf,
    pub cfg_path: PathBuf,
}

impl AppState {
    /// Push a line into the render buffer and the live log stream
    pub fn append_line(&self, line: String) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.push(line.clone());
        }
        // No subscribers is fine; the buffer still has the line
        let _ = self.log_tx.send(line);
    }
}

#[derive(Deserialize)]
struct UpdateField {
    field: String,
    value: serde_json::Value,
}

/// Apply one field update to the in-memory settings. Combo fields only accept
/// labels from the fixed tables; port and the two free-text fields pass through.
fn apply_field(settings: &mut Settings, field: &str, value: &serde_json::Value) -> Result<(), &'static str> {
    match field {
        "port" => value
            .as_str()
            .map(|v| settings.port = v.to_string())
            .ok_or("Invalid value"),
        "interval" => match value.as_str() {
            Some(v) if config::interval_code(v).is_some() => {
                settings.interval = v.to_string();
                Ok(())
            }
            _ => Err("Invalid value"),
        },
        "waveset" => match value.as_str() {
            Some(v) if config::waveset_code(v).is_some() => {
                settings.waveset = v.to_string();
                Ok(())
            }
            _ => Err("Invalid value"),
        },
        "export" => match value.as_str() {
            Some(v) if config::export_code(v).is_some() => {
                settings.export = v.to_string();
                Ok(())
            }
            _ => Err("Invalid value"),
        },
        "device_id" => value
            .as_str()
            .map(|v| settings.device_id = v.to_string())
            .ok_or("Invalid value"),
        "json_url" => value
            .as_str()
            .map(|v| settings.json_url = v.to_string())
            .ok_or("Invalid value"),
        _ => Err("Unknown field"),
    }
}

async fn serve_index() -> impl IntoResponse {
    Html(WEB_UI_HTML)
}

async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let settings = state.settings.lock().unwrap().clone();
    Json(settings)
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdateField>,
) -> impl IntoResponse {
    let mut settings = state.settings.lock().unwrap();
    match apply_field(&mut settings, &payload.field, &payload.value) {
        Ok(()) => (StatusCode::OK, "Field updated").into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn get_ports() -> impl IntoResponse {
    Json(ports::list_ports())
}

async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let logging = state
        .capture
        .lock()
        .await
        .as_ref()
        .map(|h| h.is_running())
        .unwrap_or(false);
    Json(serde_json::json!({ "logging": logging }))
}

async fn get_log(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let lines = state.buffer.lock().unwrap().snapshot();
    Json(lines)
}

// SSE handler - streams relayed output lines to connected clients
async fn log_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = state.log_tx.subscribe();

    let event_stream = stream! {
        loop {
            match rx.recv().await {
                Ok(line) => {
                    yield Ok(SseEvent::default().event("line").data(line));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Slow client; the render buffer is the fallback view
                    yield Ok(SseEvent::default()
                        .event("line")
                        .data(format!("... {} lines skipped ...", n)));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn start_capture(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut capture = state.capture.lock().await;
    if let Some(handle) = capture.take() {
        if handle.is_running() {
            // Only one capture child at a time
            *capture = Some(handle);
            state.append_line("Already logging".to_string());
            return (StatusCode::OK, "Already logging").into_response();
        }
        // The previous run drained on its own; make sure its child is reaped
        handle.stop().await;
    }

    let settings = state.settings.lock().unwrap().clone();
    let exe = state.exe.to_string_lossy().to_string();
    let argv = match command::build_args(&settings, &state.mono, &exe) {
        Ok(argv) => argv,
        Err(e) => {
            eprintln!("✗ Cannot build capture command: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    state.append_line("Starting logging".to_string());
    state.append_line(argv.join(" "));

    let tx = state.log_tx.clone();
    let buffer = state.buffer.clone();
    let on_line = move |line: String| {
        if let Ok(mut buf) = buffer.lock() {
            buf.push(line.clone());
        }
        let _ = tx.send(line);
    };

    match supervisor::spawn(&argv, on_line) {
        Ok(handle) => {
            *capture = Some(handle);
            println!("✓ Capture started on {}", settings.port);
            (StatusCode::OK, "Logging started").into_response()
        }
        Err(e) => {
            eprintln!("✗ Failed to start capture: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn stop_capture(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.append_line("Stopping logging".to_string());
    let handle = state.capture.lock().await.take();
    match handle {
        Some(handle) => {
            handle.stop().await;
            println!("✓ Capture stopped");
            (StatusCode::OK, "Logging stopped").into_response()
        }
        None => (StatusCode::OK, "Not logging").into_response(),
    }
}

async fn shutdown_server(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    println!("\n🛑 Shutdown requested via web UI");

    if let Some(handle) = state.capture.lock().await.take() {
        handle.stop().await;
    }
    state.append_line("Stopping Server, Bye".to_string());

    let settings = state.settings.lock().unwrap().clone();
    if let Err(e) = settings.save_to(&state.cfg_path) {
        eprintln!("✗ Error - preferences not saved: {}", e);
    }
    println!("Completed Shutdown");

    // Exit after a short delay so this response gets flushed first
    thread::spawn(|| {
        thread::sleep(Duration::from_millis(500));
        std::process::exit(0);
    });

    Json(serde_json::json!({
        "success": true,
        "message": "Server shutting down..."
    }))
}

pub async fn run_http_server(state: Arc<AppState>, ip: &str, port: u16) -> Result<()> {
    let app = Router::new()
        .route("/", get(serve_index))
        .route("/api/config", get(get_config))
        .route("/api/config", post(update_config))
        .route("/api/ports", get(get_ports))
        .route("/api/status", get(get_status))
        .route("/api/log", get(get_log))
        .route("/api/log/events", get(log_events))
        .route("/api/start", post(start_capture))
        .route("/api/stop", post(stop_capture))
        .route("/api/shutdown", post(shutdown_server))
        .with_state(state);

    let addr = format!("{}:{}", ip, port);
    println!("🌐 Web interface listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_field_known_fields() {
        let mut s = Settings::default();
        apply_field(&mut s, "port", &json!("/dev/ttyUSB1")).unwrap();
        apply_field(&mut s, "interval", &json!("30 Sec")).unwrap();
        apply_field(&mut s, "waveset", &json!("ECG1, ECG2")).unwrap();
        apply_field(&mut s, "export", &json!("CSV files and JSON URL")).unwrap();
        apply_field(&mut s, "device_id", &json!("D1")).unwrap();
        apply_field(&mut s, "json_url", &json!("http://x")).unwrap();

        assert_eq!(s.port, "/dev/ttyUSB1");
        assert_eq!(s.interval, "30 Sec");
        assert_eq!(s.waveset, "ECG1, ECG2");
        assert!(s.json_export());
        assert_eq!(s.device_id, "D1");
        assert_eq!(s.json_url, "http://x");
    }

    #[test]
    fn test_apply_field_rejects_unknown_field() {
        let mut s = Settings::default();
        assert_eq!(apply_field(&mut s, "volume", &json!("11")), Err("Unknown field"));
    }

    #[test]
    fn test_apply_field_rejects_label_outside_tables() {
        let mut s = Settings::default();
        assert_eq!(apply_field(&mut s, "interval", &json!("2 Sec")), Err("Invalid value"));
        assert_eq!(apply_field(&mut s, "export", &json!(2)), Err("Invalid value"));
        assert_eq!(s, Settings::default());
    }
}
