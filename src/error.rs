//! # Errors
//!
//! The error kinds surfaced to callers. Every layer maps into these four
//! variants; the facade translates them onto the RPC status channel.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed id, missing required field, or wrong value type.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Entity lookup failed where existence was required.
    #[error("not found: {0}")]
    NotFound(String),

    /// State does not admit the requested transition.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Store failure or unexpected programmer error.
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::FailedPrecondition(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            Error::NotFound(msg) => tonic::Status::not_found(msg),
            Error::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
            Error::Internal(msg) => tonic::Status::internal(msg),
        }
    }
}
