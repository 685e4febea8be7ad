//! The log recording state machine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use logcap_protocol::constants::STAGING_FILE_EXTENSION;
use logcap_tail::{ChannelSources, OnLineFn, Subscription, TailRegistry};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::staging::StagingSink;
use crate::{Artifact, RecordingError};

/// Lifecycle of a [`LogRecording`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Stopped,
    Saved,
    Discarded,
}

impl RecordingState {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Recording => "recording",
            RecordingState::Stopped => "stopped",
            RecordingState::Saved => "saved",
            RecordingState::Discarded => "discarded",
        }
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captures the lines of every channel during one open window.
///
/// `idle → recording → stopped → saved | discarded`. Calls made out of that
/// order fail with [`RecordingError::InvalidTransition`]. Cloning yields
/// another handle to the same recording, so the plugin and the artifact
/// manager can both hold it.
#[derive(Debug, Clone)]
pub struct LogRecording {
    id: Uuid,
    staging_path: PathBuf,
    inner: Arc<Mutex<RecordingInner>>,
}

#[derive(Debug)]
struct RecordingInner {
    state: RecordingState,
    replay_from_start: bool,
    registry: TailRegistry,
    subscriptions: Vec<Subscription>,
    sink: StagingSink,
}

impl LogRecording {
    /// Creates an idle recording staged at `<staging_dir>/<id>.log`.
    pub fn new(registry: TailRegistry, staging_dir: &Path, replay_from_start: bool) -> Self {
        let id = Uuid::new_v4();
        let staging_path = staging_dir.join(format!("{id}.{STAGING_FILE_EXTENSION}"));
        Self::with_staging_path(id, registry, staging_path, replay_from_start)
    }

    /// Creates an idle recording staged at an explicit path.
    pub fn with_staging_path(
        id: Uuid,
        registry: TailRegistry,
        staging_path: PathBuf,
        replay_from_start: bool,
    ) -> Self {
        Self {
            id,
            staging_path,
            inner: Arc::new(Mutex::new(RecordingInner {
                state: RecordingState::Idle,
                replay_from_start,
                registry,
                subscriptions: Vec::new(),
                sink: StagingSink::default(),
            })),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Where lines are staged until the recording is saved or discarded.
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub async fn state(&self) -> RecordingState {
        self.inner.lock().await.state
    }

    /// Whether the window starts with the sources' history.
    pub async fn replay_from_start(&self) -> bool {
        self.inner.lock().await.replay_from_start
    }

    /// Opens the window against the registry's current sources.
    pub async fn start(&self) -> Result<(), RecordingError> {
        let (registry, replay_from_start) = {
            let inner = self.inner.lock().await;
            (inner.registry.clone(), inner.replay_from_start)
        };
        let sources = registry.current_sources().await;
        self.start_with(&sources, replay_from_start).await
    }

    /// Opens the window against `sources`.
    ///
    /// With `replay_from_start`, each subscription first receives the
    /// history its source holds.
    pub async fn start_with(
        &self,
        sources: &ChannelSources,
        replay_from_start: bool,
    ) -> Result<(), RecordingError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_state("start", &[RecordingState::Idle])?;

        inner.replay_from_start = replay_from_start;
        inner.open_window(&self.staging_path, sources, replay_from_start).await;
        inner.state = RecordingState::Recording;

        tracing::info!(
            recording = %self.id,
            channels = sources.len(),
            replay_from_start,
            "log recording started"
        );
        Ok(())
    }

    /// Reopens a stopped window against fresh sources after a relaunch.
    ///
    /// Lines keep being appended to the same staging file. Each subscription
    /// catches up on what its source read since it was bound, so whatever
    /// the relaunched process wrote before this call is captured too.
    pub async fn resume(&self, sources: &ChannelSources) -> Result<(), RecordingError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_state("resume", &[RecordingState::Stopped])?;

        inner.open_window(&self.staging_path, sources, true).await;
        inner.state = RecordingState::Recording;

        tracing::info!(recording = %self.id, channels = sources.len(), "log recording resumed");
        Ok(())
    }

    /// Closes the window.
    ///
    /// Every subscription is cancelled and the staging file is flushed and
    /// closed before this returns; nothing is written to it afterwards.
    pub async fn stop(&self) -> Result<(), RecordingError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_state("stop", &[RecordingState::Recording])?;

        inner.close_window(&self.staging_path).await;
        inner.state = RecordingState::Stopped;

        tracing::info!(recording = %self.id, "log recording stopped");
        Ok(())
    }

    /// Moves the staging file to `destination`.
    ///
    /// A missing staging file or a failed move is logged; the recording is
    /// considered saved either way.
    pub async fn save(&self, destination: &Path) -> Result<(), RecordingError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_state("save", &[RecordingState::Stopped])?;

        match tokio::fs::try_exists(&self.staging_path).await {
            Ok(true) => match move_file(&self.staging_path, destination).await {
                Ok(()) => {
                    tracing::debug!(
                        recording = %self.id,
                        from = %self.staging_path.display(),
                        to = %destination.display(),
                        "saved log recording"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        recording = %self.id,
                        from = %self.staging_path.display(),
                        to = %destination.display(),
                        error = %e,
                        "failed to move staging file"
                    );
                }
            },
            _ => {
                tracing::error!(
                    recording = %self.id,
                    path = %self.staging_path.display(),
                    "did not find staging file"
                );
            }
        }

        inner.state = RecordingState::Saved;
        Ok(())
    }

    /// Deletes the staging file, if any.
    pub async fn discard(&self) -> Result<(), RecordingError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_state("discard", &[RecordingState::Stopped, RecordingState::Idle])?;

        match tokio::fs::remove_file(&self.staging_path).await {
            Ok(()) => {
                tracing::debug!(recording = %self.id, "discarded log recording");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    recording = %self.id,
                    path = %self.staging_path.display(),
                    error = %e,
                    "failed to delete staging file"
                );
            }
        }

        inner.state = RecordingState::Discarded;
        Ok(())
    }
}

impl Artifact for LogRecording {
    async fn start(&self) -> Result<(), RecordingError> {
        LogRecording::start(self).await
    }

    async fn stop(&self) -> Result<(), RecordingError> {
        LogRecording::stop(self).await
    }

    async fn save(&self, destination: &Path) -> Result<(), RecordingError> {
        LogRecording::save(self, destination).await
    }

    async fn discard(&self) -> Result<(), RecordingError> {
        LogRecording::discard(self).await
    }
}

impl RecordingInner {
    fn ensure_state(
        &self,
        operation: &'static str,
        allowed: &[RecordingState],
    ) -> Result<(), RecordingError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }

        tracing::error!(operation, state = %self.state, "log recording used out of order");
        Err(RecordingError::InvalidTransition {
            operation,
            state: self.state,
        })
    }

    async fn open_window(&mut self, staging_path: &Path, sources: &ChannelSources, catch_up: bool) {
        if let Err(e) = self.sink.open(staging_path) {
            tracing::error!(
                path = %staging_path.display(),
                error = %e,
                "failed to open staging file, lines will be dropped"
            );
        }

        for (channel, source) in sources {
            let sink = self.sink.clone();
            let tag = channel.clone();
            let handler: OnLineFn = Box::new(move |line: &str| sink.append(&tag, line));
            self.subscriptions.push(source.subscribe(handler, catch_up).await);
        }
    }

    async fn close_window(&mut self, staging_path: &Path) {
        for subscription in self.subscriptions.drain(..) {
            subscription.cancel().await;
        }

        if !self.sink.is_open() {
            return;
        }

        let sink = self.sink.clone();
        match tokio::task::spawn_blocking(move || sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(path = %staging_path.display(), error = %e, "failed to close staging file");
            }
            Err(e) => {
                tracing::error!(path = %staging_path.display(), error = %e, "staging file close task failed");
            }
        }
    }
}

/// Renames `from` to `to`, copying across filesystems when rename fails.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if let Err(e) = tokio::fs::rename(from, to).await {
        tracing::debug!(error = %e, "rename failed, copying staging file instead");
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use logcap_protocol::{Channel, ChannelPaths};
    use logcap_tail::TailOptions;

    use super::*;

    struct Fixture {
        _tmp: tempfile::TempDir,
        dir: PathBuf,
        stdout: PathBuf,
        stderr: PathBuf,
        registry: TailRegistry,
    }

    impl Fixture {
        async fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let dir = tmp.path().to_path_buf();
            let stdout = dir.join("device.stdout.log");
            let stderr = dir.join("device.stderr.log");
            std::fs::write(&stdout, "").unwrap();
            std::fs::write(&stderr, "").unwrap();

            let registry = TailRegistry::new();
            let fixture = Self {
                _tmp: tmp,
                dir,
                stdout,
                stderr,
                registry,
            };
            fixture.rebind().await;
            fixture
        }

        async fn rebind(&self) {
            let mut paths = ChannelPaths::new();
            paths.insert(Channel::STDOUT, self.stdout.clone());
            paths.insert(Channel::STDERR, self.stderr.clone());
            let options = TailOptions {
                replay_from_start: true,
                ..TailOptions::default()
            };
            self.registry.rebind(&paths, options).await;
        }

        fn recording(&self, replay_from_start: bool) -> LogRecording {
            LogRecording::new(self.registry.clone(), &self.dir.join("staging"), replay_from_start)
        }
    }

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn sorted_lines(content: &str) -> Vec<&str> {
        let mut lines: Vec<&str> = content.lines().collect();
        lines.sort_unstable();
        lines
    }

    #[tokio::test]
    async fn captures_only_lines_inside_the_window() {
        let fx = Fixture::new().await;
        append(&fx.stdout, "before\n");

        let recording = fx.recording(false);
        recording.start().await.unwrap();
        assert_eq!(recording.state().await, RecordingState::Recording);

        append(&fx.stdout, "b\n");
        append(&fx.stderr, "x\n");
        recording.stop().await.unwrap();
        append(&fx.stdout, "after\n");

        let artifact = fx.dir.join("artifacts").join("test.log");
        recording.save(&artifact).await.unwrap();

        let content = std::fs::read_to_string(&artifact).unwrap();
        assert_eq!(sorted_lines(&content), ["stderr: x", "stdout: b"]);
        assert!(!recording.staging_path().exists());
        assert_eq!(recording.state().await, RecordingState::Saved);
    }

    #[tokio::test]
    async fn replay_recording_starts_with_history() {
        let fx = Fixture::new().await;
        append(&fx.stdout, "boot1\nboot2\n");

        let recording = fx.recording(true);
        assert!(recording.replay_from_start().await);
        recording.start().await.unwrap();
        append(&fx.stdout, "live\n");
        recording.stop().await.unwrap();

        let content = std::fs::read_to_string(recording.staging_path()).unwrap();
        assert_eq!(content, "stdout: boot1\nstdout: boot2\nstdout: live\n");
    }

    #[tokio::test]
    async fn nothing_is_written_after_stop() {
        let fx = Fixture::new().await;
        let recording = fx.recording(false);
        recording.start().await.unwrap();
        append(&fx.stdout, "inside\n");
        recording.stop().await.unwrap();

        let stopped = std::fs::read_to_string(recording.staging_path()).unwrap();

        append(&fx.stdout, "outside\n");
        for source in fx.registry.current_sources().await.values() {
            source.pump().await;
        }

        let later = std::fs::read_to_string(recording.staging_path()).unwrap();
        assert_eq!(stopped, "stdout: inside\n");
        assert_eq!(later, stopped);
    }

    #[tokio::test]
    async fn resume_appends_to_the_same_staging_file() {
        let fx = Fixture::new().await;
        let recording = fx.recording(false);
        recording.start().await.unwrap();
        append(&fx.stdout, "first launch\n");
        recording.stop().await.unwrap();

        append(&fx.stdout, "between launches\n");
        std::fs::remove_file(&fx.stdout).unwrap();
        std::fs::write(&fx.stdout, "").unwrap();
        fx.rebind().await;
        append(&fx.stdout, "relaunched\n");

        recording
            .resume(&fx.registry.current_sources().await)
            .await
            .unwrap();
        append(&fx.stdout, "second launch\n");
        recording.stop().await.unwrap();

        let content = std::fs::read_to_string(recording.staging_path()).unwrap();
        assert_eq!(
            content,
            "stdout: first launch\nstdout: relaunched\nstdout: second launch\n"
        );
    }

    #[tokio::test]
    async fn discard_removes_staging_file() {
        let fx = Fixture::new().await;
        let recording = fx.recording(false);
        recording.start().await.unwrap();
        append(&fx.stderr, "noise\n");
        recording.stop().await.unwrap();
        assert!(recording.staging_path().exists());

        recording.discard().await.unwrap();
        assert!(!recording.staging_path().exists());
        assert_eq!(recording.state().await, RecordingState::Discarded);

        let err = recording.save(&fx.dir.join("late.log")).await.unwrap_err();
        assert!(matches!(
            err,
            RecordingError::InvalidTransition {
                operation: "save",
                state: RecordingState::Discarded,
            }
        ));
    }

    #[tokio::test]
    async fn discard_from_idle_is_allowed() {
        let fx = Fixture::new().await;
        let recording = fx.recording(false);
        recording.discard().await.unwrap();
        assert_eq!(recording.state().await, RecordingState::Discarded);
    }

    #[tokio::test]
    async fn save_without_staging_file_is_not_fatal() {
        let fx = Fixture::new().await;
        let recording = fx.recording(false);
        recording.start().await.unwrap();
        recording.stop().await.unwrap();
        std::fs::remove_file(recording.staging_path()).unwrap();

        let artifact = fx.dir.join("missing.log");
        recording.save(&artifact).await.unwrap();
        assert!(!artifact.exists());
        assert_eq!(recording.state().await, RecordingState::Saved);
    }

    #[tokio::test]
    async fn out_of_order_calls_are_rejected() {
        let fx = Fixture::new().await;
        let recording = fx.recording(false);

        assert!(recording.stop().await.is_err());
        assert!(recording.save(&fx.dir.join("a.log")).await.is_err());
        assert!(recording.resume(&ChannelSources::new()).await.is_err());

        recording.start().await.unwrap();
        let err = recording.start().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot start a log recording that is recording"
        );
        assert!(recording.discard().await.is_err());
        assert!(recording.save(&fx.dir.join("a.log")).await.is_err());

        recording.stop().await.unwrap();
        assert!(recording.stop().await.is_err());
        assert!(recording.start().await.is_err());
    }

    #[tokio::test]
    async fn works_through_the_artifact_trait() {
        async fn run<A: Artifact>(artifact: &A, destination: &Path) {
            artifact.start().await.unwrap();
            artifact.stop().await.unwrap();
            artifact.save(destination).await.unwrap();
        }

        let fx = Fixture::new().await;
        let recording = fx.recording(false);
        let destination = fx.dir.join("trait.log");
        run(&recording, &destination).await;

        assert!(destination.exists());
        assert_eq!(recording.state().await, RecordingState::Saved);
    }

    #[tokio::test]
    async fn missing_sources_still_produce_an_empty_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = TailRegistry::new();
        let mut paths = ChannelPaths::new();
        paths.insert(Channel::STDOUT, tmp.path().join("never-created.log"));
        registry.rebind(&paths, TailOptions::default()).await;

        let recording = LogRecording::new(registry, tmp.path(), false);
        recording.start().await.unwrap();
        recording.stop().await.unwrap();

        let destination = tmp.path().join("empty.log");
        recording.save(&destination).await.unwrap();
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "");
    }
}
