use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::SmsConfig;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The provider answered with a non-2xx status.
    #[error("sms gateway rejected the message: {0}")]
    Rejected(String),
    /// Connection failure or timeout; treated like any other failed send.
    #[error("sms gateway unreachable: {0}")]
    Transport(String),
}

/// Outbound SMS channel. Best-effort: callers decide what a failure means,
/// this layer only reports it.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, number: &str, message: &str) -> Result<(), GatewayError>;
}

/// Semaphore-style HTTP gateway: form-encoded POST, any 2xx counts as
/// accepted. "Accepted" is not delivery confirmation; it is still what we
/// key the sent-flags on.
pub struct SemaphoreGateway {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    sender_name: String,
}

impl SemaphoreGateway {
    pub fn new(cfg: &SmsConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_url: cfg.api_url.clone(),
            api_key: cfg.api_key.clone(),
            sender_name: cfg.sender_name.clone(),
        })
    }
}

#[async_trait]
impl SmsGateway for SemaphoreGateway {
    async fn send(&self, number: &str, message: &str) -> Result<(), GatewayError> {
        let form = [
            ("apikey", self.api_key.as_str()),
            ("number", number),
            ("message", message),
            ("sendername", self.sender_name.as_str()),
        ];

        let resp = self
            .http
            .post(&self.api_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(GatewayError::Rejected(format!("{status}: {body}")))
        }
    }
}
