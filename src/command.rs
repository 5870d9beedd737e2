// Command Module - VSCapture launch argument construction
use anyhow::{anyhow, Result};

use crate::config::Settings;

/// Build the argv for one capture run: mono runtime, capture executable, then
/// the logging flags. Tokens are kept separate end to end; nothing here is ever
/// joined into a shell string and re-split, so device ids and URLs pass through
/// verbatim whatever characters they contain.
pub fn build_args(settings: &Settings, mono: &str, exe: &str) -> Result<Vec<String>> {
    let interval = settings
        .interval_code()
        .ok_or_else(|| anyhow!("unknown interval: {}", settings.interval))?;
    let waveset = settings
        .waveset_code()
        .ok_or_else(|| anyhow!("unknown wave set: {}", settings.waveset))?;
    let export = settings
        .export_code()
        .ok_or_else(|| anyhow!("unknown export option: {}", settings.export))?;

    let mut argv = vec![
        mono.to_string(),
        exe.to_string(),
        "-port".to_string(),
        settings.port.clone(),
        "-interval".to_string(),
        interval.to_string(),
        "-waveset".to_string(),
        waveset.to_string(),
        "-export".to_string(),
        export.to_string(),
    ];

    if settings.json_export() {
        argv.push("-devid".to_string());
        argv.push(settings.device_id.clone());
        argv.push("-url".to_string());
        argv.push(settings.json_url.clone());
    }

    Ok(argv)
}
