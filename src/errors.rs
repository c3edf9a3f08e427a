use thiserror::Error;

/// Window-management core errors.
///
/// The input-event and tiling paths are total: they log and swallow the
/// non-fatal variants (`ViewGone`, `NotMapped`) and always return control
/// to the event loop.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed configuration entry (unknown modifier, unknown keysym,
    /// out-of-range value). Logged and skipped per binding at load time.
    #[error("config error: {0}")]
    Config(String),

    /// Operation on a view handle that has already been unregistered.
    #[error("view is gone")]
    ViewGone,

    /// Geometry commit on a view that is not mapped.
    #[error("view is not mapped")]
    NotMapped,

    /// A condition or action command could not be spawned.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// A condition command did not finish within the timeout.
    #[error("condition command timed out")]
    ConditionTimeout,

    /// Runtime-dir or command-file IO failure; the request is ignored.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Event loop setup or dispatch failure.
    #[error("event loop error: {0}")]
    EventLoop(String),

    /// Unrecoverable startup failure (SUID detected, missing runtime dir).
    #[error("fatal: {0}")]
    FatalInit(String),
}

pub type Result<T> = std::result::Result<T, Error>;
