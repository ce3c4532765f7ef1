// Error types for the task runner

use std::fmt;

use thiserror::Error;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, ParallelError>;

/// Errors raised by the pool and controller themselves.
///
/// Errors returned by the user's operation never appear here: they are
/// forwarded verbatim to the error handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParallelError {
    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reset requested while a generation is still running or draining
    #[error("generation {generation} has not stopped; call wait() before reset()")]
    NotStopped { generation: u64 },
}

impl ParallelError {
    /// Create an invalid configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        ParallelError::InvalidConfig(msg.into())
    }
}

/// Error returned by `Controller::try_call` when the input could not be
/// submitted. Hands the rejected input back to the caller.
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum CallError<I> {
    /// The current generation has been stopped by `wait()`
    Stopped(I),
    /// The current generation can no longer deliver outcomes because a
    /// handler panicked or every worker panicked
    Failed(I),
}

impl<I> CallError<I> {
    /// Recover the input that was not submitted
    pub fn into_inner(self) -> I {
        match self {
            CallError::Stopped(input) | CallError::Failed(input) => input,
        }
    }
}

impl<I> fmt::Debug for CallError<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Stopped(_) => f.write_str("Stopped(..)"),
            CallError::Failed(_) => f.write_str("Failed(..)"),
        }
    }
}

impl<I> fmt::Display for CallError<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Stopped(_) => f.write_str("controller is stopped; call reset() first"),
            CallError::Failed(_) => {
                f.write_str("controller generation failed; call wait() then reset()")
            }
        }
    }
}

impl<I> std::error::Error for CallError<I> {}
