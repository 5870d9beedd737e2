// Config Module - Logging preferences, label/code tables and command-line arguments
use anyhow::{anyhow, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Logging interval choices shown in the UI, paired with the codes VSCapture expects
pub const INTERVALS: [(&str, &str); 6] = [
    ("5 Sec", "5"),
    ("10 Sec", "10"),
    ("30 Sec", "30"),
    ("1 Min", "60"),
    ("3 Mins", "180"),
    ("5 Mins", "300"),
];

/// Wave set choices (named groups of signal channels recorded together)
pub const WAVESETS: [(&str, &str); 6] = [
    ("None", "0"),
    ("ECG1, INVP1, INVP2, PLETH", "1"),
    ("ECG1, INVP1, PLETH, CO2, RESP", "2"),
    ("ECG1, PLETH, CO2, RESP, AWP, VOL, FLOW", "3"),
    ("ECG1, ECG2", "4"),
    ("EEG1, EEG2, EEG3, EEG4", "5"),
];

/// Data export choices: local CSV files only, or CSV plus push to a JSON URL
pub const EXPORT_OPTIONS: [(&str, &str); 2] = [
    ("CSV files", "1"),
    ("CSV files and JSON URL", "2"),
];

fn code_for(table: &'static [(&'static str, &'static str)], label: &str) -> Option<&'static str> {
    table.iter().find(|(l, _)| *l == label).map(|(_, c)| *c)
}

fn label_for(table: &'static [(&'static str, &'static str)], code: &str) -> Option<&'static str> {
    table.iter().find(|(_, c)| *c == code).map(|(l, _)| *l)
}

pub fn interval_code(label: &str) -> Option<&'static str> {
    code_for(&INTERVALS, label)
}

pub fn waveset_code(label: &str) -> Option<&'static str> {
    code_for(&WAVESETS, label)
}

pub fn export_code(label: &str) -> Option<&'static str> {
    code_for(&EXPORT_OPTIONS, label)
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Web control panel for VSCapture physiological data logging",
    long_about = "Serves a local web UI to configure the VSCapture logging parameters and to\n\
                  start and stop the capture process, relaying its console output into the page."
)]
pub struct Args {
    /// Address the web UI binds to
    #[arg(long, default_value = "127.0.0.1")]
    pub listen: String,

    /// Port the web UI is served on
    #[arg(short = 'p', long, default_value_t = 9090)]
    pub web_port: u16,

    /// Mono runtime used to launch the capture executable
    #[arg(long, default_value = "/usr/bin/mono-sgen")]
    pub mono: String,

    /// Path to VSCapture.exe (default: next to this binary)
    #[arg(long)]
    pub exe: Option<PathBuf>,

    /// Preferences file path
    #[arg(long, default_value = "vscapture.conf")]
    pub cfg: PathBuf,
}

impl Args {
    pub fn exe_path(&self) -> PathBuf {
        if let Some(ref exe) = self.exe {
            return exe.clone();
        }
        // The capture executable ships alongside the panel binary
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|dir| dir.join("VSCapture.exe")))
            .unwrap_or_else(|| PathBuf::from("VSCapture.exe"))
    }
}

/// The operator-facing logging settings. Interval, wave set and export mode hold
/// the display labels from the tables above; device_id/json_url only matter when
/// the export mode is the JSON variant and are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub port: String,
    pub interval: String,
    pub waveset: String,
    pub export: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub json_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            port: "/dev/ttyUSB0".to_string(),
            interval: "10 Sec".to_string(),
            waveset: "None".to_string(),
            export: "CSV files".to_string(),
            device_id: String::new(),
            json_url: String::new(),
        }
    }
}

impl Settings {
    pub fn interval_code(&self) -> Option<&'static str> {
        interval_code(&self.interval)
    }

    pub fn waveset_code(&self) -> Option<&'static str> {
        waveset_code(&self.waveset)
    }

    pub fn export_code(&self) -> Option<&'static str> {
        export_code(&self.export)
    }

    /// True when the export mode also pushes data to a JSON endpoint
    pub fn json_export(&self) -> bool {
        self.export_code() == Some("2")
    }

    /// Encode as the single preferences line: port_interval_waveset_export
    pub fn encode(&self) -> Result<String> {
        let interval = self
            .interval_code()
            .ok_or_else(|| anyhow!("unknown interval: {}", self.interval))?;
        let waveset = self
            .waveset_code()
            .ok_or_else(|| anyhow!("unknown wave set: {}", self.waveset))?;
        let export = self
            .export_code()
            .ok_or_else(|| anyhow!("unknown export option: {}", self.export))?;
        Ok(format!("{}_{}_{}_{}", self.port, interval, waveset, export))
    }

    fn decode(contents: &str) -> Option<Settings> {
        let parts: Vec<&str> = contents.trim().split('_').collect();
        if parts.len() != 4 {
            return None;
        }
        // A stored port of "None" means no port was ever picked
        let port = if parts[0] == "None" || parts[0].is_empty() {
            Settings::default().port
        } else {
            parts[0].to_string()
        };
        Some(Settings {
            port,
            interval: label_for(&INTERVALS, parts[1])?.to_string(),
            waveset: label_for(&WAVESETS, parts[2])?.to_string(),
            export: label_for(&EXPORT_OPTIONS, parts[3])?.to_string(),
            device_id: String::new(),
            json_url: String::new(),
        })
    }

    /// Read the preferences file. A missing, truncated or unrecognized file is
    /// never an error for the caller; the fixed defaults are used instead.
    pub fn load_from(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => match Settings::decode(&contents) {
                Some(settings) => settings,
                None => {
                    eprintln!(
                        "⚠️  Preferences file {} is unreadable, using defaults",
                        path.display()
                    );
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        }
    }

    /// Overwrite the preferences file with the current settings. Best effort:
    /// callers report a failure to the operator's console and carry on.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let line = self.encode()?;
        std::fs::write(path, line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.port, "/dev/ttyUSB0");
        assert_eq!(s.interval, "10 Sec");
        assert_eq!(s.waveset, "None");
        assert_eq!(s.export, "CSV files");
    }

    #[test]
    fn test_table_lookups() {
        assert_eq!(interval_code("30 Sec"), Some("30"));
        assert_eq!(interval_code("1 Min"), Some("60"));
        assert_eq!(waveset_code("ECG1, ECG2"), Some("4"));
        assert_eq!(export_code("CSV files and JSON URL"), Some("2"));
        assert_eq!(interval_code("2 Sec"), None);
    }

    #[test]
    fn test_encode() {
        let s = Settings {
            port: "/dev/ttyUSB1".to_string(),
            interval: "30 Sec".to_string(),
            waveset: "ECG1, ECG2".to_string(),
            export: "CSV files".to_string(),
            ..Settings::default()
        };
        assert_eq!(s.encode().unwrap(), "/dev/ttyUSB1_30_4_1");
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vscapture.conf");
        let s = Settings {
            port: "/dev/ttyACM0".to_string(),
            interval: "3 Mins".to_string(),
            waveset: "EEG1, EEG2, EEG3, EEG4".to_string(),
            export: "CSV files and JSON URL".to_string(),
            device_id: "D1".to_string(),
            json_url: "http://x".to_string(),
        };
        s.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path);
        assert_eq!(loaded.port, s.port);
        assert_eq!(loaded.interval, s.interval);
        assert_eq!(loaded.waveset, s.waveset);
        assert_eq!(loaded.export, s.export);
        // device_id/json_url are not part of the persisted line
        assert_eq!(loaded.device_id, "");
        assert_eq!(loaded.json_url, "");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Settings::load_from(&dir.path().join("nope.conf"));
        assert_eq!(loaded, Settings::default());
    }

    #[test]
    fn test_load_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vscapture.conf");
        std::fs::write(&path, "/dev/ttyUSB0_10").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn test_load_unknown_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vscapture.conf");
        std::fs::write(&path, "/dev/ttyUSB0_10_9_1").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn test_load_port_none_maps_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vscapture.conf");
        std::fs::write(&path, "None_30_4_1").unwrap();
        let loaded = Settings::load_from(&path);
        assert_eq!(loaded.port, "/dev/ttyUSB0");
        assert_eq!(loaded.interval, "30 Sec");
    }
}
