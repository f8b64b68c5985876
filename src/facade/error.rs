//! Error types for the facade client.

use thiserror::Error;

/// Errors raised while talking to the remote configuration service.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FacadeError {
    /// Raised when the request never produced a response.
    #[error("facade transport error: {message}")]
    Transport {
        /// Underlying client error.
        message: String,
    },
    /// Raised when the service answers with a failure status or a job fails.
    #[error("facade request failed with code {code}: {message}")]
    Remote {
        /// HTTP status or job exit code.
        code: i64,
        /// Message reported by the service.
        message: String,
    },
    /// Raised when a job is still pending after the final poll attempt.
    #[error("{label} still pending after {attempts} polls")]
    Timeout {
        /// Job being polled.
        label: String,
        /// Number of polls performed.
        attempts: u32,
    },
    /// Raised when a response body does not have the expected shape.
    #[error("unexpected facade response: {message}")]
    Decode {
        /// Decoder error message.
        message: String,
    },
}
