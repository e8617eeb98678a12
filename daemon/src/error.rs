//! Structured error types for tcpconnlat
//!
//! Startup failures (limits, load, attach) are fatal and surface through
//! [`LifecycleError`]. Stream failures ([`ChannelError`], [`DecodeError`]) are
//! handled inside the consumer and never escalate.

use std::{io, path::PathBuf};
use thiserror::Error;

/// Boxed failure from the instrumentation backend (aya or a test double)
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record too short: got {actual} bytes, need at least {expected}")]
    TooShort { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum LimitError {
    #[error("failed to raise RLIMIT_MEMLOCK: {0}")]
    Setrlimit(#[source] io::Error),
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("instrumentation image has no runtime variable named {0}")]
    UnknownVariable(String),

    #[error("runtime variable {name} expects a {expected} value")]
    VariableType { name: String, expected: &'static str },

    #[error("failed to read instrumentation image {path:?}: {source}")]
    ReadImage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no instrumentation image: pass --ebpf-object or build with the 'embedded' feature")]
    NoImage,

    #[error("map already pinned at {0:?}")]
    PinCollision(PathBuf),

    #[error("failed to read kernel BTF: {0}")]
    Btf(#[source] BackendError),

    #[error("failed to load instrumentation image: {0}")]
    Image(#[source] BackendError),

    #[error("program {0} not found in instrumentation image")]
    ProgramNotFound(&'static str),

    #[error("failed to load program {program} for {function}: {source}")]
    Program {
        program: &'static str,
        function: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("map {0} not found in instrumentation image")]
    MapNotFound(&'static str),

    #[error("failed to open output channel {map}: {source}")]
    Channel {
        map: &'static str,
        #[source]
        source: BackendError,
    },
}

#[derive(Error, Debug)]
#[error("failed to attach {program} to {function}: {source}")]
pub struct AttachError {
    pub program: &'static str,
    pub function: &'static str,
    #[source]
    pub source: BackendError,
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("output channel closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Limits(#[from] LimitError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Attach(#[from] AttachError),

    #[error("lifecycle already ran")]
    AlreadyRan,
}
