//! Bounded log recordings.
//!
//! A [`LogRecording`] subscribes to the live sources of a
//! [`TailRegistry`](logcap_tail::TailRegistry) for the duration of one window
//! (a test, or device startup), writes every line to a private staging file
//! as `<channel>: <line>`, and on request moves that file to its final
//! artifact path or deletes it.

pub mod artifact;
pub mod error;
mod recording;
mod staging;

pub use artifact::Artifact;
pub use error::RecordingError;
pub use recording::{LogRecording, RecordingState};
