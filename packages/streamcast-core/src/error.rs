//! Centralized error types for the streamcast core library.
//!
//! Mirrors the crate-wide enum + machine-readable classification idiom
//! rather than an HTTP status mapping: the streaming core has no HTTP
//! surface, so `kind()` stands in for what would otherwise be `code()`.

use thiserror::Error;

/// Machine-readable classification of a [`StreamError`].
///
/// Every variant here corresponds 1:1 to a `StreamError` variant; this is
/// the thing worth logging/metric-tagging on, since the `Display` string
/// carries free-text context that varies per occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Ok,
    Fail,
    InvalidArg,
    NotInitialized,
    AlreadyRunning,
    NotRunning,
    CantSetWhileRunning,
    PortBusy,
    ConnectionRefused,
    ClientDisconnected,
    SessionCreateFailed,
    ServerShutdown,
    InputFull,
    NeedMoreInput,
    Timeout,
    EmptySet,
}

/// Crate-wide error type for streamcast-core.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("operation failed: {0}")]
    Fail(String),

    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("component not initialized: {0}")]
    NotInitialized(String),

    #[error("already running: {0}")]
    AlreadyRunning(String),

    #[error("not running: {0}")]
    NotRunning(String),

    #[error("cannot set while running: {0}")]
    CantSetWhileRunning(String),

    #[error("port busy: {0}")]
    PortBusy(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("client disconnected: {0}")]
    ClientDisconnected(String),

    #[error("session create failed: {0}")]
    SessionCreateFailed(String),

    #[error("server shutdown")]
    ServerShutdown,

    #[error("input queue full")]
    InputFull,

    #[error("need more input before output is available")]
    NeedMoreInput,

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("no items in set: {0}")]
    EmptySet(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine error: {0}")]
    Engine(#[from] streamcast_engines::EngineError),
}

impl StreamError {
    /// Returns the machine-readable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Fail(_) => ResultKind::Fail,
            Self::InvalidArg(_) => ResultKind::InvalidArg,
            Self::NotInitialized(_) => ResultKind::NotInitialized,
            Self::AlreadyRunning(_) => ResultKind::AlreadyRunning,
            Self::NotRunning(_) => ResultKind::NotRunning,
            Self::CantSetWhileRunning(_) => ResultKind::CantSetWhileRunning,
            Self::PortBusy(_) => ResultKind::PortBusy,
            Self::ConnectionRefused(_) => ResultKind::ConnectionRefused,
            Self::ClientDisconnected(_) => ResultKind::ClientDisconnected,
            Self::SessionCreateFailed(_) => ResultKind::SessionCreateFailed,
            Self::ServerShutdown => ResultKind::ServerShutdown,
            Self::InputFull => ResultKind::InputFull,
            Self::NeedMoreInput => ResultKind::NeedMoreInput,
            Self::Timeout(_) => ResultKind::Timeout,
            Self::EmptySet(_) => ResultKind::EmptySet,
            Self::Io(_) | Self::Engine(_) => ResultKind::Fail,
        }
    }
}

/// Convenient Result alias for streamcast-core operations.
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_full_has_the_input_full_kind() {
        assert_eq!(StreamError::InputFull.kind(), ResultKind::InputFull);
    }

    #[test]
    fn io_errors_classify_as_fail() {
        let err = StreamError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.kind(), ResultKind::Fail);
    }
}
