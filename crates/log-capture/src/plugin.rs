//! Device-lifecycle orchestration of log tails and recordings.

use std::future::Future;

use logcap_protocol::{ChannelPaths, DeviceEvent, LaunchAppEvent, TestOutcome};
use logcap_recording::{LogRecording, RecordingState};
use logcap_tail::{ChannelCheckpoints, TailOptions, TailRegistry};
use uuid::Uuid;

use crate::config::CaptureConfig;
use crate::resolver::LogPathResolver;

/// Device lifecycle hooks, called by the artifact manager in order:
/// boot, before-launch, launch, (tests), shutdown, terminate.
///
/// Every hook defaults to doing nothing.
pub trait ArtifactPlugin {
    fn on_boot_device(&mut self, _event: &DeviceEvent) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_before_launch_app(&mut self, _event: &DeviceEvent) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_launch_app(&mut self, _event: &LaunchAppEvent) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_shutdown_device(&mut self, _event: &DeviceEvent) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_terminate(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Per-run state handed to the plugin.
#[derive(Debug, Clone)]
pub struct CaptureContext {
    /// Tags every log event of this run.
    pub run_id: Uuid,
    pub config: CaptureConfig,
}

impl CaptureContext {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            config,
        }
    }
}

/// Keeps one live tail per channel across app relaunches and creates the
/// recordings that capture them.
pub struct LogCapturePlugin<R> {
    resolver: R,
    registry: TailRegistry,
    context: CaptureContext,
    device_id: Option<String>,
    current: Option<CurrentRecording>,
    /// Read progress of the sources released for a relaunch.
    checkpoints: ChannelCheckpoints,
}

struct CurrentRecording {
    recording: LogRecording,
    /// Stopped by a relaunch and to be resumed once sources are rebound.
    suspended: bool,
}

impl<R: LogPathResolver> LogCapturePlugin<R> {
    pub fn new(resolver: R, context: CaptureContext) -> Self {
        Self {
            resolver,
            registry: TailRegistry::new(),
            context,
            device_id: None,
            current: None,
            checkpoints: ChannelCheckpoints::new(),
        }
    }

    /// A recording that starts with everything the device logged since its
    /// logs were (re)bound. Becomes the current recording.
    pub fn create_startup_recording(&mut self) -> LogRecording {
        self.create_recording(true)
    }

    /// A recording of only what is logged while it is open. Becomes the
    /// current recording.
    pub fn create_test_recording(&mut self) -> LogRecording {
        self.create_recording(false)
    }

    /// Whether a test recording with `outcome` should be saved.
    pub fn should_keep(&self, outcome: TestOutcome) -> bool {
        self.context.config.record_logs.should_keep(outcome)
    }

    pub fn registry(&self) -> &TailRegistry {
        &self.registry
    }

    pub fn context(&self) -> &CaptureContext {
        &self.context
    }

    pub fn current_recording(&self) -> Option<&LogRecording> {
        self.current.as_ref().map(|current| &current.recording)
    }

    /// The device most recently booted, if any.
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn create_recording(&mut self, replay_from_start: bool) -> LogRecording {
        let recording = LogRecording::new(
            self.registry.clone(),
            &self.context.config.staging_dir,
            replay_from_start,
        );

        tracing::debug!(
            run_id = %self.context.run_id,
            recording = %recording.id(),
            replay_from_start,
            "created log recording"
        );

        self.current = Some(CurrentRecording {
            recording: recording.clone(),
            suspended: false,
        });
        recording
    }

    fn enabled(&self) -> bool {
        self.context.config.record_logs.is_enabled()
    }

    /// Resolves the device's log paths, keeping only configured channels.
    fn resolve_paths(&self, device_id: &str) -> ChannelPaths {
        let channels = &self.context.config.channels;
        let mut paths = self.resolver.resolve_log_paths(device_id);

        paths.retain(|channel, _| {
            let known = channels.contains(channel);
            if !known {
                tracing::debug!(channel = %channel, "ignoring log path for unconfigured channel");
            }
            known
        });
        paths
    }
}

impl<R: LogPathResolver> ArtifactPlugin for LogCapturePlugin<R> {
    async fn on_boot_device(&mut self, event: &DeviceEvent) {
        tracing::info!(run_id = %self.context.run_id, device = %event.device_id, "device booted");
        self.device_id = Some(event.device_id.clone());
    }

    /// Closes the window of an in-flight recording, then drops the sources
    /// the relaunch is about to replace.
    async fn on_before_launch_app(&mut self, event: &DeviceEvent) {
        if !self.enabled() {
            return;
        }

        if let Some(current) = self.current.as_mut() {
            if current.recording.state().await == RecordingState::Recording {
                match current.recording.stop().await {
                    Ok(()) => current.suspended = true,
                    Err(e) => {
                        tracing::warn!(
                            run_id = %self.context.run_id,
                            error = %e,
                            "failed to stop log recording before relaunch"
                        );
                    }
                }
            }
        }

        self.checkpoints = self.registry.checkpoints().await;
        self.registry.dispose_all().await;
        tracing::debug!(
            run_id = %self.context.run_id,
            device = %event.device_id,
            checkpoints = self.checkpoints.len(),
            "released log sources before app launch"
        );
    }

    /// Binds the freshly launched app's logs and resumes a recording that
    /// spanned the relaunch.
    ///
    /// New log files are read from byte 0. A file the app kept appending to
    /// across the relaunch is read on from its current end, so nothing
    /// written before the launch is replayed.
    async fn on_launch_app(&mut self, event: &LaunchAppEvent) {
        if !self.enabled() {
            return;
        }

        let checkpoints = std::mem::take(&mut self.checkpoints);
        let paths = self.resolve_paths(&event.device_id);
        let (kept, fresh): (ChannelPaths, ChannelPaths) =
            paths.into_iter().partition(|(channel, path)| {
                checkpoints
                    .get(channel)
                    .is_some_and(|checkpoint| checkpoint.is_continued_by(path))
            });

        let poll_interval = self.context.config.poll_interval;
        if !kept.is_empty() {
            let options = TailOptions {
                replay_from_start: false,
                poll_interval,
            };
            self.registry.rebind(&kept, options).await;
        }
        if !fresh.is_empty() {
            let options = TailOptions {
                replay_from_start: true,
                poll_interval,
            };
            self.registry.rebind(&fresh, options).await;
        }

        tracing::info!(
            run_id = %self.context.run_id,
            device = %event.device_id,
            pid = ?event.pid,
            kept = kept.len(),
            fresh = fresh.len(),
            "tailing app logs"
        );

        let Some(current) = self.current.as_mut() else {
            return;
        };
        if !std::mem::take(&mut current.suspended) {
            return;
        }
        if current.recording.state().await != RecordingState::Stopped {
            // Saved or discarded by the artifact manager in the meantime.
            return;
        }

        let sources = self.registry.current_sources().await;
        if let Err(e) = current.recording.resume(&sources).await {
            tracing::warn!(
                run_id = %self.context.run_id,
                error = %e,
                "failed to resume log recording after relaunch"
            );
        }
    }

    async fn on_shutdown_device(&mut self, event: &DeviceEvent) {
        self.registry.dispose_all().await;
        self.checkpoints.clear();
        tracing::info!(run_id = %self.context.run_id, device = %event.device_id, "device shut down");
    }

    async fn on_terminate(&mut self) {
        self.registry.dispose_all().await;
        self.checkpoints.clear();
        self.current = None;
        tracing::info!(run_id = %self.context.run_id, "log capture terminated");
    }
}
