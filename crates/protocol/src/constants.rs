use std::time::Duration;

/// Fallback poll period for live tails.
///
/// File-change notifications drive most reads; the poll catches anything the
/// watcher misses (network filesystems, coalesced events).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Extension used for recording staging files.
pub const STAGING_FILE_EXTENSION: &str = "log";

/// Separator between the channel tag and the logged line in artifacts.
pub const LINE_SEPARATOR: &str = ": ";

/// Placeholder substituted with the device id in log path templates.
pub const DEVICE_PLACEHOLDER: &str = "{device}";
