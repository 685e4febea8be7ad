//! Error types for log recordings.

use crate::RecordingState;

/// Errors produced by [`LogRecording`](crate::LogRecording) lifecycle calls.
///
/// Only call-order mistakes are reported. I/O problems with the staging file
/// or the artifact destination are logged and the recording carries on.
#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("cannot {operation} a log recording that is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: RecordingState,
    },
}
