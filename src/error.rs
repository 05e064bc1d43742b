use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Type alias for results within the session core
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the session core.
///
/// Expected authentication outcomes (wrong password, 2FA challenge, tenant
/// ambiguity, expired refresh credential) are *not* errors; they travel as
/// variants of the result types in [`crate::api`]. This enum covers the
/// unexpected channel: transport failures, malformed payloads, and server
/// rejections that callers may still want to inspect by status.
#[derive(Error, Debug)]
pub enum Error {
    /// The server could not be reached at all (DNS, connect, TLS).
    #[error("failed to reach server: {reason}")]
    Transport { reason: String },

    /// The request exceeded the fixed client timeout.
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Non-2xx response, normalized. `message` is the server-provided string
    /// payload, or the JSON-stringified error object when the payload was not
    /// a plain string. Status and raw payload stay inspectable.
    #[error("API request failed: HTTP {status}: {message}")]
    Api {
        status: StatusCode,
        message: String,
        payload: Option<Value>,
    },

    /// The response body could not be decoded into the expected shape.
    #[error("invalid response from server: {reason}")]
    InvalidResponse { reason: String },

    /// Token storage backend failure (read/write of the persisted store).
    #[error("token storage failed: {reason}")]
    Storage { reason: String },
}

impl Error {
    /// HTTP status of the underlying response, when there was one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw server payload of the underlying response, when one was captured.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Error::Api { payload, .. } => payload.as_ref(),
            _ => None,
        }
    }

    /// True when the server explicitly rejected the caller's credentials or
    /// token. This is the only condition that may clear cached session state;
    /// transport failures and timeouts never do.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            Error::Api { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }

    /// True for failures where the server was never reached or never answered.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Timeout { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout {
                seconds: crate::http::REQUEST_TIMEOUT_SECS,
            }
        } else if e.is_decode() {
            Error::InvalidResponse {
                reason: e.to_string(),
            }
        } else {
            Error::Transport {
                reason: e.to_string(),
            }
        }
    }
}
