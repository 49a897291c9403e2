use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub docai: DocAiConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub invoice: InvoiceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// OCR service endpoint. `recognize` posts raw bytes and expects plain text.
#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_ocr_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: default_ocr_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Structured-document-processing service (schema-driven entity extraction).
#[derive(Debug, Deserialize, Clone)]
pub struct DocAiConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub processor_id: Option<String>,
    #[serde(default = "default_docai_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DocAiConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            processor_id: None,
            api_key_env: default_docai_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Language-model completion service (OpenAI-compatible chat completions).
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default = "default_model_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_model_endpoint(),
            model: default_model_name(),
            api_key_env: default_model_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Fixed per-1000-token rates for cost estimation.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PricingConfig {
    #[serde(default = "default_prompt_rate")]
    pub prompt_rate_per_1k: f64,
    #[serde(default = "default_completion_rate")]
    pub completion_rate_per_1k: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            prompt_rate_per_1k: default_prompt_rate(),
            completion_rate_per_1k: default_completion_rate(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InvoiceConfig {
    #[serde(default = "default_currency")]
    pub default_currency: String,
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        Self {
            default_currency: default_currency(),
        }
    }
}

fn default_ocr_api_key_env() -> String {
    "OCR_API_KEY".to_string()
}
fn default_docai_api_key_env() -> String {
    "DOCAI_API_KEY".to_string()
}
fn default_model_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_model_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model_name() -> String {
    "gpt-4o".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_prompt_rate() -> f64 {
    0.03
}
fn default_completion_rate() -> f64 {
    0.06
}
fn default_currency() -> String {
    "USD".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}
