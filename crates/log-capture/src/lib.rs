//! Device log capture for test runs.
//!
//! [`LogCapturePlugin`] follows the device lifecycle (boot, app launches,
//! shutdown) to keep one live tail per log channel, and hands out
//! [`LogRecording`]s that capture what each test, or device startup, wrote
//! to those logs.

pub mod config;
mod plugin;
pub mod resolver;

pub use config::CaptureConfig;
pub use logcap_recording::{Artifact, LogRecording, RecordingError, RecordingState};
pub use plugin::{ArtifactPlugin, CaptureContext, LogCapturePlugin};
pub use resolver::{LogPathResolver, StaticPathResolver, TemplatePathResolver};
