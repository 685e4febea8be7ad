//! Staging file: the append-only buffer behind a recording.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use logcap_protocol::Channel;
use logcap_protocol::constants::LINE_SEPARATOR;

/// Shared writer for a recording's staging file.
///
/// Line handlers run synchronously on the tail side, so the writer sits
/// behind a blocking mutex. `None` means the window is closed.
#[derive(Debug, Clone, Default)]
pub(crate) struct StagingSink {
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl StagingSink {
    /// Opens `path` for appending, creating it and its parent directory.
    pub(crate) fn open(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.lock() = Some(BufWriter::new(file));
        Ok(())
    }

    /// Appends `<channel>: <line>\n`, or drops the line if the sink is closed.
    pub(crate) fn append(&self, channel: &Channel, line: &str) {
        let mut guard = self.lock();
        let Some(writer) = guard.as_mut() else {
            tracing::warn!(channel = %channel, line, "dropped line for closed log recording");
            return;
        };

        if let Err(e) = writeln!(writer, "{channel}{LINE_SEPARATOR}{line}") {
            tracing::warn!(channel = %channel, error = %e, "failed to write line to staging file");
        }
    }

    /// Flushes, syncs and closes the file. Later appends are dropped.
    pub(crate) fn close(&self) -> std::io::Result<()> {
        let Some(writer) = self.lock().take() else {
            return Ok(());
        };

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_tagged_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("staging.log");

        let sink = StagingSink::default();
        sink.open(&path).unwrap();
        assert!(sink.is_open());

        sink.append(&Channel::STDOUT, "hello");
        sink.append(&Channel::STDERR, "oops");
        sink.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "stdout: hello\nstderr: oops\n");
    }

    #[test]
    fn closed_sink_drops_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("staging.log");

        let sink = StagingSink::default();
        sink.open(&path).unwrap();
        sink.append(&Channel::STDOUT, "kept");
        sink.close().unwrap();
        sink.close().unwrap();

        sink.append(&Channel::STDOUT, "dropped");
        assert!(!sink.is_open());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "stdout: kept\n");
    }

    #[test]
    fn reopen_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("staging.log");

        let sink = StagingSink::default();
        sink.open(&path).unwrap();
        sink.append(&Channel::STDOUT, "one");
        sink.close().unwrap();

        sink.open(&path).unwrap();
        sink.append(&Channel::STDOUT, "two");
        sink.close().unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "stdout: one\nstdout: two\n"
        );
    }
}
