use crate::error::RemoteError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of every remote function response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteFunctionResponse {
    Success {
        result: Value,
    },
    Redirect {
        location: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(default)]
        error: Value,
    },
}

impl RemoteFunctionResponse {
    pub fn success(result: Value) -> Self {
        RemoteFunctionResponse::Success { result }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        RemoteFunctionResponse::Redirect {
            location: location.into(),
        }
    }

    pub fn error(status: Option<u16>, error: Value) -> Self {
        RemoteFunctionResponse::Error { status, error }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, RemoteError> {
        serde_json::from_slice(body)
            .map_err(|e| RemoteError::decode(format!("Invalid remote function response: {}", e)))
    }
}

/// Success payload of a command: its own result plus the refreshed queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshes: Option<String>,
}
