//! Single-file log tailer.
//!
//! A source reads a file from an origin offset, holds partial trailing lines
//! until they are completed, and hands every complete line to each
//! subscriber. Reads are triggered by `notify` events on the parent
//! directory, by a fallback poll, and synchronously whenever a subscriber
//! joins or leaves.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use logcap_protocol::Channel;
use logcap_protocol::constants::DEFAULT_POLL_INTERVAL;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::TailError;

/// Callback invoked with each complete line (without its line terminator).
pub type OnLineFn = Box<dyn Fn(&str) + Send + Sync + 'static>;

/// Longest line delivered in one piece. Longer runs without a terminator
/// are split at this size.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Options applied when a source is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailOptions {
    /// Start reading at byte 0 instead of the end of the file.
    ///
    /// Lines before the bind point are only ever delivered to subscribers
    /// that ask for a catch-up; this just decides how far back the history
    /// reaches.
    pub replay_from_start: bool,
    /// Fallback poll period for files the watcher does not report on.
    pub poll_interval: Duration,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            replay_from_start: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// How far a source had read its file, taken before the source is released.
///
/// Used after a relaunch to tell whether the freshly resolved path is still
/// the file that was being read, or a new one.
#[derive(Debug, Clone)]
pub struct ReadCheckpoint {
    path: PathBuf,
    position: u64,
    file: Metadata,
}

impl ReadCheckpoint {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset just past the last complete line read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether `path` still names the checkpointed file, neither replaced
    /// nor truncated below the checkpoint.
    pub fn is_continued_by(&self, path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(on_disk) => same_file(&self.file, &on_disk) && on_disk.len() >= self.position,
            Err(_) => false,
        }
    }
}

/// Lifecycle of a [`LineSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    /// Created, never bound.
    Unbound,
    /// Bound to an existing file and producing lines.
    Watching,
    /// Bound to a path that did not exist. Never produces lines.
    Missing,
    /// A read failed. Never produces lines again.
    Failed,
    /// Released. Never rebound.
    Disposed,
}

/// A tailed log file shared by any number of subscribers.
///
/// Cloning yields another handle to the same source.
#[derive(Clone)]
pub struct LineSource {
    channel: Channel,
    inner: Arc<Mutex<SourceState>>,
}

struct SourceState {
    status: SourceStatus,
    path: Option<PathBuf>,
    reader: Option<BufReader<File>>,
    /// Offset history starts from (0 or the file length at bind).
    origin: u64,
    /// Offset just past the last complete line read.
    position: u64,
    /// Bytes of a line whose terminator has not been written yet.
    partial: Vec<u8>,
    /// Bound mid-line: the first read is the tail of a line and is skipped.
    skip_head: bool,
    subscribers: BTreeMap<u64, OnLineFn>,
    next_id: u64,
    cancel: Option<CancellationToken>,
    watcher: Option<RecommendedWatcher>,
}

/// Handle for one registered line handler.
///
/// Consumed by [`Subscription::cancel`]. A subscription that is dropped
/// without being cancelled stays registered until the source is disposed.
#[must_use = "a subscription keeps receiving lines until it is cancelled"]
pub struct Subscription {
    id: u64,
    channel: Channel,
    source: Option<Arc<Mutex<SourceState>>>,
}

impl LineSource {
    /// Creates an unbound source for `channel`.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            inner: Arc::new(Mutex::new(SourceState {
                status: SourceStatus::Unbound,
                path: None,
                reader: None,
                origin: 0,
                position: 0,
                partial: Vec::new(),
                skip_head: false,
                subscribers: BTreeMap::new(),
                next_id: 0,
                cancel: None,
                watcher: None,
            })),
        }
    }

    /// Binds the source to `path` and starts watching it.
    ///
    /// A missing or unreadable file is logged and leaves the source inert;
    /// only binding twice or binding after [`dispose`](Self::dispose) is an
    /// error.
    pub async fn bind(&self, path: impl Into<PathBuf>, options: TailOptions) -> Result<(), TailError> {
        let path = path.into();
        let mut state = self.inner.lock().await;

        match state.status {
            SourceStatus::Unbound => {}
            SourceStatus::Disposed => {
                return Err(TailError::Disposed {
                    channel: self.channel.clone(),
                });
            }
            _ => {
                return Err(TailError::AlreadyBound {
                    channel: self.channel.clone(),
                    path: state.path.clone().unwrap_or_default(),
                });
            }
        }
        state.path = Some(path.clone());

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    channel = %self.channel,
                    path = %path.display(),
                    "log source is missing"
                );
                state.status = SourceStatus::Missing;
                return Ok(());
            }
            Err(e) => {
                tracing::error!(
                    channel = %self.channel,
                    path = %path.display(),
                    error = %e,
                    "failed to open log source"
                );
                state.status = SourceStatus::Failed;
                return Ok(());
            }
        };

        let origin = if options.replay_from_start {
            0
        } else {
            file.metadata().map(|m| m.len()).unwrap_or(0)
        };

        let mut reader = BufReader::new(file);
        let skip_head = match starts_mid_line(&mut reader, origin) {
            Ok(skip) => skip,
            Err(e) => {
                tracing::error!(channel = %self.channel, error = %e, "failed to seek log source");
                state.status = SourceStatus::Failed;
                return Ok(());
            }
        };

        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        state.reader = Some(reader);
        state.origin = origin;
        state.position = origin;
        state.skip_head = skip_head;
        state.watcher = spawn_watcher(&self.channel, &path, wake_tx);
        state.cancel = Some(cancel.clone());
        state.status = SourceStatus::Watching;

        let inner = Arc::clone(&self.inner);
        let channel = self.channel.clone();
        tokio::spawn(async move {
            watch_loop(channel, inner, wake_rx, cancel, options.poll_interval).await;
        });

        tracing::debug!(
            channel = %self.channel,
            path = %path.display(),
            replay_from_start = options.replay_from_start,
            "started tailing log source"
        );
        Ok(())
    }

    /// Registers `handler` for every line appended from now on.
    ///
    /// Content appended before this call is first delivered to the existing
    /// subscribers, so the new handler never sees it. With `catch_up`, the
    /// handler additionally receives the source's history (everything from
    /// the origin up to this point) exactly once before any live line.
    pub async fn subscribe(&self, handler: OnLineFn, catch_up: bool) -> Subscription {
        let mut state = self.inner.lock().await;

        if state.status != SourceStatus::Watching {
            tracing::debug!(
                channel = %self.channel,
                status = ?state.status,
                "subscribed to inert log source"
            );
            return Subscription {
                id: 0,
                channel: self.channel.clone(),
                source: None,
            };
        }

        state.pump(&self.channel);

        if catch_up && state.status == SourceStatus::Watching {
            match state.read_history() {
                Ok(lines) => {
                    tracing::debug!(
                        channel = %self.channel,
                        lines = lines.len(),
                        "replaying log history"
                    );
                    for line in &lines {
                        handler(line);
                    }
                }
                Err(e) => {
                    tracing::warn!(channel = %self.channel, error = %e, "failed to replay log history");
                }
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, handler);

        Subscription {
            id,
            channel: self.channel.clone(),
            source: Some(Arc::clone(&self.inner)),
        }
    }

    /// Reads anything appended since the last read and delivers it now.
    pub async fn pump(&self) {
        self.inner.lock().await.pump(&self.channel);
    }

    /// Stops watching and releases the file, watcher and subscribers.
    ///
    /// Idempotent. No line is delivered once this returns.
    pub async fn dispose(&self) {
        let mut state = self.inner.lock().await;
        if state.status == SourceStatus::Disposed {
            return;
        }

        state.release();
        state.status = SourceStatus::Disposed;
        tracing::debug!(channel = %self.channel, "disposed log source");
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub async fn status(&self) -> SourceStatus {
        self.inner.lock().await.status
    }

    /// The path this source was bound to, if any.
    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    /// Records how far the bound file has been read.
    ///
    /// Pending content is delivered first. `None` unless the source is
    /// watching a file.
    pub async fn checkpoint(&self) -> Option<ReadCheckpoint> {
        let mut state = self.inner.lock().await;
        state.pump(&self.channel);
        if state.status != SourceStatus::Watching {
            return None;
        }

        let path = state.path.clone()?;
        let file = state.reader.as_ref()?.get_ref().metadata().ok()?;
        Some(ReadCheckpoint {
            path,
            position: state.position,
            file,
        })
    }
}

impl fmt::Debug for LineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineSource")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Unregisters the handler.
    ///
    /// Lines already appended when this is called are delivered first, to
    /// this handler and every other subscriber. The handler is never invoked
    /// after this returns.
    pub async fn cancel(self) {
        let Some(source) = self.source else {
            return;
        };

        let mut state = source.lock().await;
        state.pump(&self.channel);
        state.subscribers.remove(&self.id);
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Whether this subscription is attached to a source that produces nothing.
    pub fn is_inert(&self) -> bool {
        self.source.is_none()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("inert", &self.is_inert())
            .finish()
    }
}

impl SourceState {
    /// Reads new complete lines and hands them to every subscriber.
    fn pump(&mut self, channel: &Channel) {
        if self.status != SourceStatus::Watching {
            return;
        }

        let drained = self.follow_rotation(channel);
        self.deliver(&drained);

        match self.read_new_lines() {
            Ok(lines) => self.deliver(&lines),
            Err(e) => {
                tracing::error!(channel = %channel, error = %e, "failed to read log source");
                self.release();
                self.status = SourceStatus::Failed;
            }
        }
    }

    fn deliver(&self, lines: &[String]) {
        for line in lines {
            for handler in self.subscribers.values() {
                handler(line);
            }
        }
    }

    fn read_new_lines(&mut self) -> std::io::Result<Vec<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Vec::new());
        };

        let mut lines = Vec::new();
        loop {
            if read_capped_line(reader, &mut self.partial)? == 0 {
                break;
            }
            if !is_complete_line(&self.partial) {
                // Writer is mid-line; keep the bytes for the next read.
                break;
            }
            if !self.partial.ends_with(b"\n") {
                tracing::warn!(bytes = self.partial.len(), "log line too long, splitting it");
            }

            self.position += self.partial.len() as u64;
            if std::mem::take(&mut self.skip_head) {
                self.origin = self.position;
            } else {
                lines.push(decode_line(&self.partial));
            }
            self.partial.clear();
        }

        Ok(lines)
    }

    /// Reads every complete line between the origin and the read position.
    fn read_history(&self) -> std::io::Result<Vec<String>> {
        let Some(path) = self.path.as_deref() else {
            return Ok(Vec::new());
        };

        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(self.origin))?;
        let mut reader = BufReader::new(file.take(self.position - self.origin));

        let mut lines = Vec::new();
        let mut buf = Vec::new();
        while read_capped_line(&mut reader, &mut buf)? > 0 {
            lines.push(decode_line(&buf));
            buf.clear();
        }

        Ok(lines)
    }

    /// Restarts from byte 0 when the file was truncated or replaced.
    ///
    /// Complete lines still unread in a replaced file are returned so they
    /// are delivered before the new file's. A path that vanished keeps the
    /// old handle until a new file appears.
    fn follow_rotation(&mut self, channel: &Channel) -> Vec<String> {
        let Some(path) = self.path.clone() else {
            return Vec::new();
        };
        let Ok(on_disk) = std::fs::metadata(&path) else {
            return Vec::new();
        };

        let replaced = match self.reader.as_ref() {
            Some(reader) => reader
                .get_ref()
                .metadata()
                .map(|open| !same_file(&open, &on_disk))
                .unwrap_or(false),
            None => false,
        };

        if replaced {
            let drained = self.read_new_lines().unwrap_or_else(|e| {
                tracing::warn!(channel = %channel, error = %e, "failed to drain replaced log file");
                Vec::new()
            });

            match File::open(&path) {
                Ok(file) => {
                    tracing::info!(channel = %channel, path = %path.display(), "log file replaced, reading new file");
                    self.reader = Some(BufReader::new(file));
                    self.restart();
                }
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "failed to reopen replaced log file");
                }
            }
            return drained;
        }

        let read_to = self.position + self.partial.len() as u64;
        if on_disk.len() < read_to {
            if let Some(reader) = self.reader.as_mut() {
                tracing::info!(channel = %channel, path = %path.display(), "log file truncated, reading from start");
                if let Err(e) = reader.seek(SeekFrom::Start(0)) {
                    tracing::warn!(channel = %channel, error = %e, "failed to rewind truncated log file");
                    return Vec::new();
                }
                self.restart();
            }
        }
        Vec::new()
    }

    fn restart(&mut self) {
        self.origin = 0;
        self.position = 0;
        self.partial.clear();
        self.skip_head = false;
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.watcher = None;
        self.reader = None;
        self.partial.clear();
        self.subscribers.clear();
    }
}

/// Watch task: wakes on file events or the poll tick and pumps the source.
async fn watch_loop(
    channel: Channel,
    inner: Arc<Mutex<SourceState>>,
    mut wake: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(()) = wake.recv() => {}
            _ = ticker.tick() => {}
        }

        let mut state = inner.lock().await;
        if cancel.is_cancelled() || state.status != SourceStatus::Watching {
            break;
        }
        state.pump(&channel);
    }

    tracing::trace!(channel = %channel, "log watch task exited");
}

/// Watches the file's parent directory so that creation and replacement are
/// seen as well as appends. Failure degrades the source to polling.
fn spawn_watcher(
    channel: &Channel,
    path: &Path,
    wake: mpsc::UnboundedSender<()>,
) -> Option<RecommendedWatcher> {
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let dir = target.parent()?.to_path_buf();
    let file_name = target.file_name()?.to_os_string();

    let error_channel = channel.clone();
    let handler = move |res: notify::Result<notify::Event>| match res {
        Ok(event) => {
            if event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(file_name.as_os_str()))
            {
                let _ = wake.send(());
            }
        }
        Err(e) => {
            tracing::warn!(channel = %error_channel, error = %e, "log watcher error");
        }
    };

    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!(channel = %channel, error = %e, "file watcher unavailable, polling only");
            return None;
        }
    };

    if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        tracing::warn!(
            channel = %channel,
            dir = %dir.display(),
            error = %e,
            "failed to watch log directory, polling only"
        );
        return None;
    }

    Some(watcher)
}

/// Seeks to `origin` and reports whether it falls inside a line.
fn starts_mid_line(reader: &mut BufReader<File>, origin: u64) -> std::io::Result<bool> {
    if origin == 0 {
        reader.seek(SeekFrom::Start(0))?;
        return Ok(false);
    }

    let mut previous = [0u8; 1];
    reader.seek(SeekFrom::Start(origin - 1))?;
    reader.read_exact(&mut previous)?;
    Ok(previous[0] != b'\n')
}

/// Reads up to and including the next `\n`, never letting `buf` grow past
/// [`MAX_LINE_BYTES`].
fn read_capped_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    let limit = MAX_LINE_BYTES.saturating_sub(buf.len()) as u64;
    (&mut *reader).take(limit).read_until(b'\n', buf)
}

fn is_complete_line(buf: &[u8]) -> bool {
    buf.ends_with(b"\n") || buf.len() >= MAX_LINE_BYTES
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if raw[..end].ends_with(b"\n") {
        end -= 1;
    }
    if raw[..end].ends_with(b"\r") {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &Metadata, _b: &Metadata) -> bool {
    true
}
