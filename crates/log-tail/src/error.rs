//! Error types for log tailing.

use std::path::PathBuf;

use logcap_protocol::Channel;

/// Errors produced when a [`LineSource`](crate::LineSource) is misused.
///
/// Environmental problems (missing files, read failures) are logged and
/// degrade the source instead of surfacing here.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("{channel} log source is already bound to {}", path.display())]
    AlreadyBound { channel: Channel, path: PathBuf },

    #[error("{channel} log source has been disposed")]
    Disposed { channel: Channel },
}
