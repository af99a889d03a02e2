//! # HTTP Transport
//!
//! POSTs each batch as a JSON array to `{collector}/log-interaction`.
//!
//! A batch counts as delivered only when the collector answers with a 2xx
//! status and a body that is empty or valid JSON. Everything else (network
//! errors, timeouts, other statuses, garbage bodies) is a failure.

use super::Transport;
use crate::config::PipelineConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::time::Duration;

/// Longest error body kept in a [`TransportError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// reqwest-backed collector client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Client posting to `endpoint` with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpTransport {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, TransportError> {
        Self::new(config.endpoint(), config.request_timeout)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, batch: &[Value]) -> Result<(), TransportError> {
        let response = self.client.post(&self.endpoint).json(batch).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if !body.trim().is_empty() {
            serde_json::from_str::<Value>(&body)
                .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        }

        debug!("Collector accepted {} entries ({})", batch.len(), status);
        Ok(())
    }
}
