//! Capability shared by every recorded test artifact.

use std::future::Future;
use std::path::Path;

use crate::RecordingError;

/// Lifecycle contract driven by the artifact manager.
///
/// The manager calls `start` when the artifact's window opens and `stop`
/// when it closes, then exactly one of `save` or `discard` depending on the
/// test outcome.
pub trait Artifact {
    fn start(&self) -> impl Future<Output = Result<(), RecordingError>> + Send;

    fn stop(&self) -> impl Future<Output = Result<(), RecordingError>> + Send;

    /// Persists the artifact at `destination`.
    fn save(&self, destination: &Path) -> impl Future<Output = Result<(), RecordingError>> + Send;

    fn discard(&self) -> impl Future<Output = Result<(), RecordingError>> + Send;
}
