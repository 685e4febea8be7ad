use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Payload for device-scoped lifecycle hooks (boot, before-launch, shutdown).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub device_id: String,
}

impl DeviceEvent {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }
}

/// Payload for the app launch hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchAppEvent {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bundle_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl LaunchAppEvent {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            bundle_id: String::new(),
            pid: None,
        }
    }
}

/// Final outcome of a test, used to decide whether its artifacts are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
}

/// Which test log recordings are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordLogs {
    /// Log capture is disabled entirely.
    None,
    /// Only recordings of failed tests are saved.
    Failing,
    /// Every recording is saved.
    #[default]
    All,
}

impl RecordLogs {
    /// Whether log sources should be tailed at all.
    pub fn is_enabled(self) -> bool {
        self != RecordLogs::None
    }

    /// Whether a recording for a test with `outcome` should be saved.
    pub fn should_keep(self, outcome: TestOutcome) -> bool {
        match self {
            RecordLogs::None => false,
            RecordLogs::Failing => outcome == TestOutcome::Failed,
            RecordLogs::All => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordLogs::None => "none",
            RecordLogs::Failing => "failing",
            RecordLogs::All => "all",
        }
    }
}

impl fmt::Display for RecordLogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown record-logs mode.
#[derive(Debug, thiserror::Error)]
#[error("unknown record-logs mode: {0} (expected none, failing or all)")]
pub struct ParseRecordLogsError(String);

impl FromStr for RecordLogs {
    type Err = ParseRecordLogsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RecordLogs::None),
            "failing" => Ok(RecordLogs::Failing),
            "all" => Ok(RecordLogs::All),
            other => Err(ParseRecordLogsError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_policy() {
        assert!(!RecordLogs::None.should_keep(TestOutcome::Failed));
        assert!(RecordLogs::Failing.should_keep(TestOutcome::Failed));
        assert!(!RecordLogs::Failing.should_keep(TestOutcome::Passed));
        assert!(RecordLogs::All.should_keep(TestOutcome::Passed));
    }

    #[test]
    fn record_logs_from_str() {
        assert_eq!("ALL".parse::<RecordLogs>().unwrap(), RecordLogs::All);
        assert_eq!(" failing ".parse::<RecordLogs>().unwrap(), RecordLogs::Failing);
        let err = "sometimes".parse::<RecordLogs>().unwrap_err();
        assert!(err.to_string().contains("sometimes"));
    }

    #[test]
    fn launch_event_omits_empty_fields() {
        let event = LaunchAppEvent::new("booted");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"deviceId":"booted"}"#);

        let parsed: LaunchAppEvent =
            serde_json::from_str(r#"{"deviceId":"booted","bundleId":"com.test","pid":8000}"#)
                .unwrap();
        assert_eq!(parsed.pid, Some(8000));
        assert_eq!(parsed.bundle_id, "com.test");
    }
}
