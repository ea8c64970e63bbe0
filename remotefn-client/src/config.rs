use anyhow::{Context, Result};
use remotefn_core::RemoteId;
use serde::{Deserialize, Serialize};

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Scheme and host remote calls are sent to
    pub origin: String,
    /// Path prefix the application is mounted under, without trailing slash
    pub base: String,
    /// Directory of the application's internal routes
    pub app_dir: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:5173".to_string(),
            base: String::new(),
            app_dir: "_app".to_string(),
            timeout_ms: 30000,
        }
    }
}

impl ClientConfig {
    pub fn with_origin(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse client configuration")
    }

    /// URL of the remote function `id`
    pub fn endpoint(&self, id: &RemoteId) -> String {
        format!(
            "{}{}/{}/remote/{}",
            self.origin.trim_end_matches('/'),
            self.base.trim_end_matches('/'),
            self.app_dir.trim_matches('/'),
            id
        )
    }
}
