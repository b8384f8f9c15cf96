use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;

use crate::config::TargetConfig;

/// Raw reply of the target endpoint; the body is not interpreted here.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Sends one chat-completion request. Implementations must be safe to call from many tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, body: &Value) -> Result<TransportResponse, TransportError>;
}

pub struct HttpTransport {
    client: Client,
    target: TargetConfig,
}

impl HttpTransport {
    /// Idle connections are never kept, so each attempt opens and closes its own
    /// socket and the dispatcher's slot count is the number of live connections.
    pub fn try_new(target: TargetConfig, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(0)
            .default_headers(target.headers.clone())
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self { client, target })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, body: &Value) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(self.target.endpoint.clone())
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        Ok(TransportResponse {
            status,
            body: bytes.to_vec(),
        })
    }
}
