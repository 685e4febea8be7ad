//! Log capture configuration.
//!
//! Reads/writes JSON at `~/.config/logcap/config.json`. Missing fields and
//! out-of-range values fall back to defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use logcap_protocol::constants::{DEFAULT_POLL_INTERVAL, DEVICE_PLACEHOLDER};
use logcap_protocol::{Channel, RecordLogs};
use serde::{Deserialize, Serialize};

/// Accepted range for the fallback poll interval, in milliseconds.
const POLL_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 10..=60_000;

/// On-disk config format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    record_logs: Option<RecordLogs>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    staging_dir: String,
    #[serde(default)]
    poll_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    channels: Vec<Channel>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    log_path_templates: BTreeMap<Channel, String>,
}

/// Log capture configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Which recordings are kept; `none` disables tailing.
    pub record_logs: RecordLogs,
    /// Directory for recording staging files.
    pub staging_dir: PathBuf,
    /// Fallback poll period for live tails.
    pub poll_interval: Duration,
    /// Channels tailed for each device. Resolved paths for other channels
    /// are ignored.
    pub channels: Vec<Channel>,
    /// Per-channel log path, with `{device}` replaced by the device id.
    pub log_path_templates: BTreeMap<Channel, String>,
    file_path: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            record_logs: RecordLogs::default(),
            staging_dir: default_staging_dir(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            channels: Channel::defaults(),
            log_path_templates: default_log_path_templates(),
            file_path: config_file_path().unwrap_or_else(|_| PathBuf::from("/tmp/logcap.json")),
        }
    }
}

impl CaptureConfig {
    /// Loads configuration from the default location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(config_file_path()?)
    }

    /// Loads configuration from `file_path`; a missing file yields defaults.
    pub fn load_from(file_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let file_path = file_path.into();
        let mut config = CaptureConfig {
            file_path: file_path.clone(),
            ..Default::default()
        };

        if !file_path.exists() {
            return Ok(config);
        }

        let content = std::fs::read_to_string(&file_path)?;
        let Ok(file) = serde_json::from_str::<ConfigFile>(&content) else {
            tracing::warn!(
                path = %file_path.display(),
                "failed to parse log capture config, using defaults"
            );
            return Ok(config);
        };

        if let Some(record_logs) = file.record_logs {
            config.record_logs = record_logs;
        }
        if !file.staging_dir.is_empty() {
            config.staging_dir = PathBuf::from(file.staging_dir);
        }
        if POLL_INTERVAL_RANGE_MS.contains(&file.poll_interval_ms) {
            config.poll_interval = Duration::from_millis(file.poll_interval_ms);
        }
        if !file.channels.is_empty() {
            config.channels = file.channels;
        }
        if !file.log_path_templates.is_empty() {
            config.log_path_templates = file.log_path_templates;
        }

        Ok(config)
    }

    /// Saves configuration to the file it was loaded from.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = ConfigFile {
            record_logs: Some(self.record_logs),
            staging_dir: self.staging_dir.display().to_string(),
            poll_interval_ms: self.poll_interval.as_millis() as u64,
            channels: self.channels.clone(),
            log_path_templates: self.log_path_templates.clone(),
        };

        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.file_path, json)?;

        tracing::debug!(path = %self.file_path.display(), "log capture configuration saved");
        Ok(())
    }

    /// The file this configuration is loaded from and saved to.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("logcap")
}

/// iOS simulator launch logs, as written by the app launcher.
fn default_log_path_templates() -> BTreeMap<Channel, String> {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    let base = format!(
        "{home}/Library/Developer/CoreSimulator/Devices/{DEVICE_PLACEHOLDER}/data/tmp/logcap.last_launch_app_log"
    );

    BTreeMap::from([
        (Channel::STDOUT, format!("{base}.out")),
        (Channel::STDERR, format!("{base}.err")),
    ])
}

fn config_file_path() -> anyhow::Result<PathBuf> {
    let config_dir = config_base_dir()?;
    Ok(config_dir.join("logcap").join("config.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(home).join(".config"))
    }
}
