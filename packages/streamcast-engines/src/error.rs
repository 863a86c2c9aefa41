//! Error and status types shared by every engine trait.

use thiserror::Error;

/// Outcome of submitting input to a codec/filter engine.
///
/// Mirrors the three-way result a hardware codec reports on `SubmitInput`:
/// accepted, needs another call before it can produce output, or its
/// internal queue is full and the caller must drain `QueryOutput` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Input accepted.
    Ok,
    /// Input accepted, but the engine wants more before it can emit output.
    NeedMoreInput,
    /// The engine's input queue is full; drain output and resubmit.
    InputFull,
}

/// Error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine has not been initialized (no codec configured yet).
    #[error("engine not initialized")]
    NotInitialized,
    /// Caller passed an invalid argument (e.g. unsupported resolution).
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    /// Engine-internal failure.
    #[error("engine failure: {0}")]
    Fail(String),
    /// The engine does not support the requested feature (e.g. HDR).
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Convenience alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
