//! Error types for semaphore and channel operations
//!
//! Each operation family gets its own small error enum so callers can match
//! exhaustively on exactly the outcomes that operation can produce. All
//! outcomes propagate as explicit result values; nothing is retried or
//! logged inside the primitives.

use thiserror::Error;

/// Invalid construction parameters, rejected before any shared state exists
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid argument: {0}")]
pub struct InvalidArgument(pub(crate) &'static str);

impl InvalidArgument {
    /// Human-readable description of the rejected parameter
    #[must_use]
    pub fn message(&self) -> &'static str {
        self.0
    }
}

/// Error returned by blocking and async permit acquisition
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The semaphore was closed before or while waiting
    #[error("semaphore closed")]
    Closed,

    /// The wait was abandoned via a cancel token, future drop, or deadline
    #[error("acquire cancelled")]
    Cancelled,
}

/// Error returned by non-blocking permit acquisition
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryAcquireError {
    /// The semaphore was closed
    #[error("semaphore closed")]
    Closed,

    /// No permit is available right now, or earlier waiters are queued
    #[error("no permits available")]
    NoPermits,
}

/// Error returned by checked manual release
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// The semaphore was closed
    #[error("semaphore closed")]
    Closed,

    /// Releasing would push the permit count past the configured maximum.
    /// This signals a double-release bug upstream and is never absorbed.
    #[error("release would exceed the maximum permit count")]
    Overflow,
}

/// Error returned by `send`; the rejected value is handed back to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError<T> {
    /// The channel was completed or aborted; no further sends are accepted
    #[error("channel closed")]
    Closed(T),

    /// The send was abandoned before a slot was granted
    #[error("send cancelled")]
    Cancelled(T),
}

impl<T> SendError<T> {
    /// Recover the value that could not be sent
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(value) | Self::Cancelled(value) => value,
        }
    }
}

/// Error returned by `try_send`; the rejected value is handed back
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The buffer is at capacity right now
    #[error("channel full")]
    Full(T),

    /// The channel was completed or aborted
    #[error("channel closed")]
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recover the value that could not be sent
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }
}

/// Error returned by `recv`.
///
/// End-of-stream is not an error: a completed-and-drained channel yields
/// `Ok(None)` from `recv`, never a `RecvError`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// The channel was aborted and its buffered values discarded
    #[error("channel closed")]
    Closed,

    /// The wait was abandoned before a value was granted
    #[error("receive cancelled")]
    Cancelled,
}

/// Error returned by `try_recv`
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing is buffered right now; more values may still arrive
    #[error("channel empty")]
    Empty,

    /// The channel was aborted
    #[error("channel closed")]
    Closed,
}
