//! Error types for the generation broker.
//!
//! This module defines the central [`Error`] enum, which captures every
//! outcome of a generation request other than success. Each variant maps to
//! exactly one HTTP status in the server crate, and every variant's `Display`
//! output is the message returned to the caller.
//!
//! ## Error Cases
//! - `Validation`: The request body was malformed or a parameter was out of
//!   range. Nothing was admitted.
//! - `CapacityExceeded`: Every admission slot is taken. Transient; the caller
//!   should retry later.
//! - `WorkerReported`: The job was accepted but the worker replied with an
//!   error.
//! - `Timeout`: No reply arrived within the configured bound.
//! - `Transport`: The bus was unreachable or a payload could not be decoded.
//! - `ServiceShutdown`: The broker is shutting down.

use core::fmt;
use core::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the generation broker.
#[derive(Clone, thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// The request failed validation before any admission was consumed.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// No admission slot is available.
    #[error("Queue full, try again later")]
    CapacityExceeded,

    /// The worker processed the job and reported a failure.
    #[error("{message}")]
    WorkerReported { message: String },

    /// No reply arrived on the job's reply channel in time.
    #[error("No reply received within {after:?}")]
    Timeout { after: Duration },

    /// Bus failure or undecodable payload.
    #[error("Bus transport error: {context}")]
    Transport { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub fn transport(context: impl fmt::Display) -> Self {
        Self::Transport {
            context: context.to_string(),
        }
    }
}

/// Which validation rule rejected a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    MissingInput,
    InvalidParameters,
    InvalidTemperature,
    InvalidTopK,
    InvalidTopP,
    InvalidMaxNewTokens,
    TokenLimitExceeded,
    InvalidDoSample,
}

impl ValidationErrorKind {
    /// The request field this rule checks.
    pub const fn field(self) -> &'static str {
        match self {
            Self::MissingInput => "inputs",
            Self::InvalidParameters => "parameters",
            Self::InvalidTemperature => "temperature",
            Self::InvalidTopK => "top_k",
            Self::InvalidTopP => "top_p",
            Self::InvalidMaxNewTokens | Self::TokenLimitExceeded => "max_new_tokens",
            Self::InvalidDoSample => "do_sample",
        }
    }
}

/// A rejected request field together with a caller-facing reason.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[error("{reason}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            field: kind.field(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_caller_message() {
        assert_eq!(
            Error::CapacityExceeded.to_string(),
            "Queue full, try again later"
        );
        assert_eq!(
            Error::WorkerReported {
                message: "oom".into()
            }
            .to_string(),
            "oom"
        );
        let err: Error = ValidationError::new(
            ValidationErrorKind::TokenLimitExceeded,
            "You cannot generate more than 512 new tokens",
        )
        .into();
        assert_eq!(
            err.to_string(),
            "You cannot generate more than 512 new tokens"
        );
    }

    #[test]
    fn kind_names_its_field() {
        let err = ValidationError::new(ValidationErrorKind::InvalidTopP, "bad");
        assert_eq!(err.field, "top_p");
        assert_eq!(ValidationErrorKind::TokenLimitExceeded.field(), "max_new_tokens");
    }
}
