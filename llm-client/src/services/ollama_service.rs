//! Thin client for the local Ollama API.
//!
//! - `POST {endpoint}/api/generate`   — non-streaming text generation
//! - `GET  {endpoint}/api/tags`       — health probe

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::{LlmModelConfig, LlmProvider};
use crate::error_handler::{AiLlmError, ProviderError, Result, make_snippet};

#[derive(Debug)]
pub struct OllamaService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_generate: String,
    url_tags: String,
}

impl OllamaService {
    pub fn new(cfg: LlmModelConfig) -> Result<Self> {
        if cfg.provider != LlmProvider::Ollama {
            return Err(ProviderError::InvalidProvider.into());
        }
        let endpoint = cfg.endpoint.trim();
        if endpoint.is_empty() || !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ProviderError::InvalidEndpoint(cfg.endpoint.clone()).into());
        }

        let timeout = cfg.timeout_secs.map(Duration::from_secs).unwrap_or(Duration::from_secs(60));
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let base = endpoint.trim_end_matches('/').to_string();
        Ok(Self {
            url_generate: format!("{base}/api/generate"),
            url_tags: format!("{base}/api/tags"),
            client,
            cfg,
        })
    }

    #[instrument(skip_all, fields(model = %self.cfg.model))]
    pub async fn generate(&self, prompt: &str, _system: Option<&str>) -> Result<String> {
        let body = GenerateRequest::from_cfg(&self.cfg, prompt);
        debug!("POST {}", self.url_generate);
        let resp = self.client.post(&self.url_generate).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let url = self.url_generate.clone();
            let text = resp.text().await.unwrap_or_default();
            return Err(AiLlmError::Provider(ProviderError::HttpStatus {
                status,
                url,
                snippet: make_snippet(&text),
            }));
        }

        let out: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("serde error: {e}")))?;
        Ok(out.response)
    }

    pub async fn healthy(&self) -> bool {
        self.client.get(&self.url_tags).send().await.map(|r| r.status().is_success()).unwrap_or(false)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(default)]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

impl<'a> GenerateRequest<'a> {
    fn from_cfg(cfg: &'a LlmModelConfig, prompt: &'a str) -> Self {
        Self {
            model: &cfg.model,
            prompt,
            stream: false,
            options: Some(GenerateOptions {
                temperature: cfg.temperature,
                top_p: cfg.top_p,
                num_predict: cfg.max_tokens,
            }),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(provider: LlmProvider, endpoint: &str) -> LlmModelConfig {
        LlmModelConfig {
            provider,
            model: "llama3".to_string(),
            endpoint: endpoint.to_string(),
            api_key: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn new_rejects_non_ollama_provider() {
        let err = OllamaService::new(cfg(LlmProvider::OpenAi, "http://localhost:11434")).unwrap_err();
        assert!(matches!(err, AiLlmError::Provider(ProviderError::InvalidProvider)));
    }

    #[test]
    fn new_rejects_endpoint_without_a_scheme() {
        let err = OllamaService::new(cfg(LlmProvider::Ollama, "localhost:11434")).unwrap_err();
        assert!(matches!(err, AiLlmError::Provider(ProviderError::InvalidEndpoint(_))));
    }

    #[test]
    fn new_accepts_a_well_formed_endpoint() {
        assert!(OllamaService::new(cfg(LlmProvider::Ollama, "http://localhost:11434")).is_ok());
    }
}
