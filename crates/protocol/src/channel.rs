use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A named logical log stream, e.g. `stdout` or `stderr`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(Cow<'static, str>);

impl Channel {
    /// The device's standard output log.
    pub const STDOUT: Channel = Channel(Cow::Borrowed("stdout"));

    /// The device's standard error log.
    pub const STDERR: Channel = Channel(Cow::Borrowed("stderr"));

    /// Creates a channel with an arbitrary name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The default channel set: `stdout` and `stderr`.
    pub fn defaults() -> Vec<Channel> {
        vec![Channel::STDOUT, Channel::STDERR]
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Channel {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

/// Log file path per channel, as resolved for one device.
pub type ChannelPaths = BTreeMap<Channel, PathBuf>;
