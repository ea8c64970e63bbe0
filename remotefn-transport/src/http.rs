use crate::{Fetch, FetchResponse, RequestInit, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, trace};

/// [`Fetch`] over a real HTTP client
#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    client: reqwest::Client,
    timeout_ms: u64,
}

impl ReqwestFetch {
    pub fn new(timeout_ms: u64) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| {
                TransportError::InvalidRequest(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client, timeout_ms })
    }

    pub fn with_client(client: reqwest::Client, timeout_ms: u64) -> Self {
        Self { client, timeout_ms }
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, url: &str, init: &RequestInit) -> Result<FetchResponse, TransportError> {
        debug!("{} {}", init.method, url);

        let mut request = self.client.request(init.method.clone(), url);
        for (name, value) in &init.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &init.body {
            trace!("Request body: {}", body);
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout_ms)
            } else if e.is_builder() {
                TransportError::InvalidRequest(e.to_string())
            } else {
                TransportError::Request(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        trace!("Response {} body: {}", status, String::from_utf8_lossy(&body));
        Ok(FetchResponse::new(status, body))
    }
}
