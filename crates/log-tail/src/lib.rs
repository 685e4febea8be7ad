//! Live tailing of continuously appended log files.
//!
//! A [`LineSource`] follows one file and broadcasts each appended line to
//! every current [`Subscription`]. A [`TailRegistry`] keeps one source per
//! [`Channel`](logcap_protocol::Channel) and replaces them when the producing
//! process is relaunched.

pub mod error;
mod registry;
mod source;

pub use error::TailError;
pub use registry::{ChannelCheckpoints, ChannelSources, TailRegistry};
pub use source::{
    LineSource, MAX_LINE_BYTES, OnLineFn, ReadCheckpoint, SourceStatus, Subscription, TailOptions,
};
