//! Common error types shared across the mydocker crates.
//!
//! Every fallible operation in the runtime maps onto one of a small set of
//! error kinds: bad input, missing resources, illegal state transitions,
//! kernel-level failures (mounts, cgroup writes), spawn failures, plain I/O,
//! and timeouts. Crate-specific code constructs these directly; the API
//! layer translates them into HTTP statuses.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that occur across the mydocker crates.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input: empty command, missing rootfs, bad flag combination.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// A requested resource (container, runner) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource is not in a legal state for the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A kernel interface failed: mount, unmount, pivot_root, cgroup write.
    #[error("kernel: {0}")]
    Kernel(String),

    /// The container child process could not be started.
    #[error("spawn failed: {0}")]
    Spawn(String),

    /// An operation exceeded its allowed time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Creates a new invalid state error.
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Creates a new kernel error.
    #[must_use]
    pub fn kernel(msg: impl Into<String>) -> Self {
        Self::Kernel(msg.into())
    }

    /// Creates a new spawn error.
    #[must_use]
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Creates a new timeout error.
    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is an invalid state error.
    #[must_use]
    pub const fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }

    /// Returns true if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn not_found_error() {
        let err = Error::not_found("container ab12cd34ef56");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: container ab12cd34ef56");
    }

    #[test]
    fn invalid_state_error() {
        let err = Error::invalid_state("container is not running (status: exited)");
        assert!(err.is_invalid_state());
        assert!(err.to_string().starts_with("invalid state:"));
    }

    #[test]
    fn timeout_error() {
        let err = Error::timeout("container did not exit within 5s");
        assert!(err.is_timeout());
    }
}
