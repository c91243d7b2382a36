//! Error types for the signaling protocol

use thiserror::Error;

/// Reasons an inbound connection is refused admission to a session
///
/// Each variant maps to a distinct close signal so clients can present an
/// accurate error to the user.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// Session id failed the format constraint (rejected before upgrade)
    #[error("invalid session id")]
    InvalidSessionId,

    /// Session already holds the maximum number of peers
    #[error("session full")]
    SessionFull,

    /// Presented join token does not match the session's token
    #[error("unauthorized")]
    Unauthorized,
}
