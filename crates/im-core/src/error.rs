use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionState;

/// Broad error category used for caller-side handling and retry decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection is not usable right now.
    Connectivity,
    /// No reply arrived before the command deadline.
    Timeout,
    /// Signing materials could not be produced.
    Signing,
    /// Backend rejected the operation.
    Server,
    /// Session is terminated.
    Closed,
    /// Frame could not be encoded or decoded.
    Protocol,
    /// Internal runtime bug or invariant break.
    Internal,
}

/// Caller-facing session error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum ImError {
    /// Command rejected because the session is not connected right now.
    #[error("session is not connected")]
    NotConnected,
    /// No reply arrived within the command deadline.
    #[error("no reply within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    /// Signature provider failed; nothing was sent.
    #[error("signing failed: {0}")]
    SigningFailed(String),
    /// Backend rejected the operation or terminated the session.
    #[error("server error {code}: {reason}")]
    ServerError {
        code: i32,
        reason: String,
        app_code: Option<i32>,
    },
    /// Session is closed; no further operations are possible.
    #[error("session is closed")]
    SessionClosed,
    /// Transport reported a failure.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Frame could not be encoded or decoded.
    #[error("codec failure: {0}")]
    Codec(String),
    /// Operation is not valid in the current lifecycle state.
    #[error("cannot run '{action}' while session is {state:?}")]
    InvalidState { state: SessionState, action: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ImError {
    pub fn server(code: i32, reason: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            reason: reason.into(),
            app_code: None,
        }
    }

    pub fn invalid_state(state: SessionState, action: impl Into<String>) -> Self {
        Self::InvalidState {
            state,
            action: action.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotConnected | Self::Transport(_) => ErrorCategory::Connectivity,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::SigningFailed(_) => ErrorCategory::Signing,
            Self::ServerError { .. } => ErrorCategory::Server,
            Self::SessionClosed => ErrorCategory::Closed,
            Self::Codec(_) => ErrorCategory::Protocol,
            Self::InvalidState { .. } | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the caller may retry the same operation later on this session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connectivity | ErrorCategory::Timeout
        )
    }
}

/// Errors produced by a command codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("failed to encode command: {0}")]
    Encode(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

impl From<CodecError> for ImError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Errors reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport is closed")]
    Closed,
    #[error("network unreachable: {0}")]
    Unreachable(String),
    #[error("transport i/o failure: {0}")]
    Io(String),
}

impl From<TransportError> for ImError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => Self::NotConnected,
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Errors reported by a signature provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature request rejected: {0}")]
    Rejected(String),
    #[error("signature provider unavailable: {0}")]
    Unavailable(String),
}

impl From<SignatureError> for ImError {
    fn from(err: SignatureError) -> Self {
        Self::SigningFailed(err.to_string())
    }
}
