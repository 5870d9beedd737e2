// VSCWeb - Web control panel for VSCapture physiological data logging
// Serves a local page to configure the capture parameters, start and stop the
// capture process, and watch its console output in the browser
use anyhow::Result;
use clap::Parser;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

mod command;
mod config;
mod httpd;
mod ports;
mod supervisor;

use config::{Args, Settings};
use supervisor::OutputBuffer;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load_from(&args.cfg);
    let exe = args.exe_path();

    println!(
        "Started VSCapture web interface server on {}:{}",
        args.listen, args.web_port
    );
    println!("Capture executable: {}", exe.display());
    println!("Preferences file: {}", args.cfg.display());

    let (log_tx, _) = broadcast::channel(256);
    let state = Arc::new(httpd::AppState {
        settings: Mutex::new(settings),
        capture: tokio::sync::Mutex::new(None),
        buffer: Arc::new(Mutex::new(OutputBuffer::default())),
        log_tx,
        mono: args.mono.clone(),
        exe,
        cfg_path: args.cfg.clone(),
    });

    tokio::select! {
        res = httpd::run_http_server(state.clone(), &args.listen, args.web_port) => res?,
        _ = tokio::signal::ctrl_c() => {
            // Same exit path as the Stop Server button: stop the child, persist prefs
            println!("\n🛑 Ctrl-C, shutting down");
            if let Some(handle) = state.capture.lock().await.take() {
                handle.stop().await;
            }
            let settings = state.settings.lock().unwrap().clone();
            if let Err(e) = settings.save_to(&state.cfg_path) {
                eprintln!("✗ Error - preferences not saved: {}", e);
            }
            println!("Completed Shutdown");
        }
    }

    Ok(())
}
