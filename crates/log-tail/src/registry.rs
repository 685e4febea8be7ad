//! Per-channel ownership of live line sources.

use std::collections::BTreeMap;
use std::sync::Arc;

use logcap_protocol::{Channel, ChannelPaths};
use tokio::sync::Mutex;

use crate::source::{LineSource, ReadCheckpoint, TailOptions};

/// Snapshot of the live source for each channel.
pub type ChannelSources = BTreeMap<Channel, LineSource>;

/// Read progress of each channel whose source is watching a file.
pub type ChannelCheckpoints = BTreeMap<Channel, ReadCheckpoint>;

/// Owns at most one [`LineSource`] per channel.
///
/// Only the registry creates and disposes sources; everyone else just
/// subscribes to the handles returned by [`current_sources`](Self::current_sources).
/// Cloning yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct TailRegistry {
    inner: Arc<Mutex<ChannelSources>>,
}

impl TailRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the source of every channel present in `paths`.
    ///
    /// The previous source of each such channel is disposed before its
    /// replacement is bound. Channels absent from `paths` are left alone.
    pub async fn rebind(&self, paths: &ChannelPaths, options: TailOptions) {
        let mut sources = self.inner.lock().await;

        for (channel, path) in paths {
            if let Some(previous) = sources.remove(channel) {
                previous.dispose().await;
            }

            let source = LineSource::new(channel.clone());
            if let Err(e) = source.bind(path.clone(), options).await {
                tracing::error!(channel = %channel, error = %e, "failed to bind log source");
                continue;
            }
            sources.insert(channel.clone(), source);
        }

        tracing::info!(channels = paths.len(), "rebound log sources");
    }

    /// Disposes every source. Safe to call when nothing is bound.
    pub async fn dispose_all(&self) {
        let mut sources = self.inner.lock().await;
        if sources.is_empty() {
            return;
        }

        let count = sources.len();
        for (_, source) in std::mem::take(&mut *sources) {
            source.dispose().await;
        }
        tracing::debug!(count, "disposed all log sources");
    }

    /// Returns the sources live right now.
    ///
    /// Relaunches replace sources, so callers must fetch this again after
    /// every relaunch instead of keeping the map.
    pub async fn current_sources(&self) -> ChannelSources {
        self.inner.lock().await.clone()
    }

    /// Returns how far each watching source has read its file.
    pub async fn checkpoints(&self) -> ChannelCheckpoints {
        let sources = self.inner.lock().await;

        let mut checkpoints = ChannelCheckpoints::new();
        for (channel, source) in sources.iter() {
            if let Some(checkpoint) = source.checkpoint().await {
                checkpoints.insert(channel.clone(), checkpoint);
            }
        }
        checkpoints
    }

    /// Returns the live source for `channel`, if any.
    pub async fn source(&self, channel: &Channel) -> Option<LineSource> {
        self.inner.lock().await.get(channel).cloned()
    }

    /// Returns the number of channels with a live source.
    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::SourceStatus;

    fn paths(entries: &[(Channel, &Path)]) -> ChannelPaths {
        entries
            .iter()
            .map(|(channel, path)| (channel.clone(), path.to_path_buf()))
            .collect()
    }

    #[tokio::test]
    async fn rebind_disposes_only_the_previous_source_of_that_channel() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out.log");
        let err = tmp.path().join("err.log");
        std::fs::write(&out, "").unwrap();
        std::fs::write(&err, "").unwrap();

        let registry = TailRegistry::new();
        registry
            .rebind(
                &paths(&[(Channel::STDOUT, out.as_path()), (Channel::STDERR, err.as_path())]),
                TailOptions::default(),
            )
            .await;
        assert_eq!(registry.active_count().await, 2);

        let first_stdout = registry.source(&Channel::STDOUT).await.unwrap();
        let stderr = registry.source(&Channel::STDERR).await.unwrap();

        registry
            .rebind(&paths(&[(Channel::STDOUT, out.as_path())]), TailOptions::default())
            .await;

        let second_stdout = registry.source(&Channel::STDOUT).await.unwrap();
        assert_eq!(first_stdout.status().await, SourceStatus::Disposed);
        assert_eq!(second_stdout.status().await, SourceStatus::Watching);
        assert_eq!(stderr.status().await, SourceStatus::Watching);
        assert_eq!(registry.active_count().await, 2);

        registry.dispose_all().await;
    }

    #[tokio::test]
    async fn rebind_to_missing_path_keeps_an_inert_source() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = TailRegistry::new();

        registry
            .rebind(
                &paths(&[(Channel::STDOUT, tmp.path().join("nope.log").as_path())]),
                TailOptions::default(),
            )
            .await;

        let source = registry.source(&Channel::STDOUT).await.unwrap();
        assert_eq!(source.status().await, SourceStatus::Missing);
    }

    #[tokio::test]
    async fn dispose_all_releases_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out.log");
        std::fs::write(&out, "").unwrap();

        let registry = TailRegistry::new();
        registry.dispose_all().await;

        registry
            .rebind(&paths(&[(Channel::STDOUT, out.as_path())]), TailOptions::default())
            .await;
        let sources = registry.current_sources().await;

        registry.dispose_all().await;
        registry.dispose_all().await;

        assert_eq!(registry.active_count().await, 0);
        assert!(registry.current_sources().await.is_empty());
        for source in sources.values() {
            assert_eq!(source.status().await, SourceStatus::Disposed);
        }
    }

    #[tokio::test]
    async fn checkpoints_skip_inert_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out.log");
        std::fs::write(&out, "one\ntwo\n").unwrap();
        let missing = tmp.path().join("err.log");

        let registry = TailRegistry::new();
        let options = TailOptions {
            replay_from_start: true,
            ..TailOptions::default()
        };
        registry
            .rebind(
                &paths(&[(Channel::STDOUT, out.as_path()), (Channel::STDERR, missing.as_path())]),
                options,
            )
            .await;

        let checkpoints = registry.checkpoints().await;
        assert_eq!(checkpoints.len(), 1);
        let stdout = &checkpoints[&Channel::STDOUT];
        assert_eq!(stdout.path(), out.as_path());
        assert_eq!(stdout.position(), 8);
        assert!(stdout.is_continued_by(&out));

        registry.dispose_all().await;
    }

    #[tokio::test]
    async fn snapshot_is_not_updated_by_later_rebinds() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out.log");
        std::fs::write(&out, "").unwrap();

        let registry = TailRegistry::new();
        registry
            .rebind(&paths(&[(Channel::STDOUT, out.as_path())]), TailOptions::default())
            .await;
        let before = registry.current_sources().await;

        registry
            .rebind(&paths(&[(Channel::STDOUT, out.as_path())]), TailOptions::default())
            .await;

        let stale = &before[&Channel::STDOUT];
        assert_eq!(stale.status().await, SourceStatus::Disposed);
        let fresh = registry.source(&Channel::STDOUT).await.unwrap();
        assert_eq!(fresh.status().await, SourceStatus::Watching);

        registry.dispose_all().await;
    }
}
