use serde_json::Value;
use thiserror::Error;

/// Status carried by the redirect control signal
pub const REDIRECT_STATUS: u16 = 307;

/// Status used when an error response omits one
pub const DEFAULT_ERROR_STATUS: u16 = 500;

/// Everything a remote call can fail with.
///
/// Cloneable so one settled failure can be handed to every observer of a
/// shared resource.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// The argument or a refresh payload could not go through the codec
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Non-2xx status or a failure below HTTP
    #[error(
        "Transport error{}: {message}",
        .status.map(|s| format!(" ({})", s)).unwrap_or_default()
    )]
    Transport { status: Option<u16>, message: String },

    /// The remote function answered with an application error
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: Value },

    /// Navigation is in progress; the caller should abandon the call
    #[error("Redirect {status} to {location}")]
    Redirect { status: u16, location: String },

    /// The response body was not a remote function response
    #[error("Decode error: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn encoding(message: impl Into<String>) -> Self {
        RemoteError::Encoding(message.into())
    }

    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        RemoteError::Transport {
            status,
            message: message.into(),
        }
    }

    pub fn http(status: Option<u16>, body: Value) -> Self {
        RemoteError::Http {
            status: status.unwrap_or(DEFAULT_ERROR_STATUS),
            body,
        }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        RemoteError::Redirect {
            status: REDIRECT_STATUS,
            location: location.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        RemoteError::Decode(message.into())
    }

    /// True for the redirect control signal, which is not a failure
    pub fn is_redirect(&self) -> bool {
        matches!(self, RemoteError::Redirect { .. })
    }

    /// Status code associated with the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Transport { status, .. } => *status,
            RemoteError::Http { status, .. } | RemoteError::Redirect { status, .. } => {
                Some(*status)
            }
            RemoteError::Encoding(_) | RemoteError::Decode(_) => None,
        }
    }
}
