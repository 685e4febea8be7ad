//! Shared types for logcap: log channels, device lifecycle events and the
//! record-logs keep policy.

pub mod channel;
pub mod constants;
pub mod events;

// Re-export primary types for convenience.
pub use channel::{Channel, ChannelPaths};
pub use events::{DeviceEvent, LaunchAppEvent, ParseRecordLogsError, RecordLogs, TestOutcome};
