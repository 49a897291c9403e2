//! Optical character recognition service client.
//!
//! The pipeline depends on the [`OcrEngine`] trait so tests can inject a
//! mock; [`HttpOcr`] is the production implementation, posting raw bytes to
//! the configured endpoint and reading back recognized text. An empty
//! response is returned as-is — the extraction layer decides whether empty
//! text is an error.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::OcrConfig;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text in an image (or scanned PDF) byte buffer.
    async fn recognize(&self, bytes: &[u8]) -> Result<String>;
}

/// OCR over HTTP: `POST <endpoint>` with `application/octet-stream` body,
/// response `{"text": "..."}`.
pub struct HttpOcr {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpOcr {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ocr.endpoint not configured"))?;
        let api_key = std::env::var(&config.api_key_env).ok();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            endpoint,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcr {
    async fn recognize(&self, bytes: &[u8]) -> Result<String> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec());
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("OCR service error {}: {}", status, body);
        }

        let json: serde_json::Value = response.json().await?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid OCR response: missing text field"))?;
        Ok(text.to_string())
    }
}

/// Scripted OCR for tests: returns a fixed text, or an error.
#[cfg(test)]
pub struct MockOcr {
    text: Option<String>,
}

#[cfg(test)]
impl MockOcr {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { text: None }
    }
}

#[cfg(test)]
#[async_trait]
impl OcrEngine for MockOcr {
    async fn recognize(&self, _bytes: &[u8]) -> Result<String> {
        match &self.text {
            Some(t) => Ok(t.clone()),
            None => bail!("mock OCR failure"),
        }
    }
}
