//! Thin client for the OpenAI-compatible chat completions API.
//!
//! - `POST {endpoint}/v1/chat/completions` — non-streaming chat completion
//! - `GET  {endpoint}/v1/models`           — health probe

use std::time::Duration;

use reqwest::header;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::{LlmModelConfig, LlmProvider};
use crate::error_handler::{AiLlmError, ProviderError, Result, make_snippet};

#[derive(Debug)]
pub struct OpenAiService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_chat: String,
    url_models: String,
}

impl OpenAiService {
    pub fn new(cfg: LlmModelConfig) -> Result<Self> {
        if cfg.provider != LlmProvider::OpenAi {
            return Err(ProviderError::InvalidProvider.into());
        }
        let api_key = cfg.api_key.clone().ok_or(ProviderError::MissingApiKey)?;

        let endpoint = cfg.endpoint.trim();
        if endpoint.is_empty() || !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ProviderError::InvalidEndpoint(cfg.endpoint.clone()).into());
        }

        let timeout = cfg.timeout_secs.map(Duration::from_secs).unwrap_or(Duration::from_secs(60));
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| ProviderError::Decode(format!("invalid API key header: {e}")))?,
        );
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder().timeout(timeout).default_headers(headers).build()?;
        let base = endpoint.trim_end_matches('/').to_string();

        Ok(Self {
            url_chat: format!("{base}/v1/chat/completions"),
            url_models: format!("{base}/v1/models"),
            client,
            cfg,
        })
    }

    #[instrument(skip_all, fields(model = %self.cfg.model))]
    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let body = ChatCompletionRequest::from_cfg(&self.cfg, prompt, system);
        debug!("POST {}", self.url_chat);
        let resp = self.client.post(&self.url_chat).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let url = self.url_chat.clone();
            let text = resp.text().await.unwrap_or_default();
            return Err(AiLlmError::Provider(ProviderError::HttpStatus {
                status,
                url,
                snippet: make_snippet(&text),
            }));
        }

        let out: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("serde error: {e}")))?;

        out.choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| ProviderError::EmptyChoices.into())
    }

    pub async fn healthy(&self) -> bool {
        self.client.get(&self.url_models).send().await.map(|r| r.status().is_success()).unwrap_or(false)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl<'a> ChatCompletionRequest<'a> {
    fn from_cfg(cfg: &'a LlmModelConfig, prompt: &'a str, system: Option<&'a str>) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(sys) = system {
            messages.push(ChatMessage { role: "system", content: Some(sys) });
        }
        messages.push(ChatMessage { role: "user", content: Some(prompt) });
        Self {
            model: &cfg.model,
            messages,
            temperature: cfg.temperature,
            top_p: cfg.top_p,
            max_tokens: cfg.max_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(provider: LlmProvider, endpoint: &str, api_key: Option<&str>) -> LlmModelConfig {
        LlmModelConfig {
            provider,
            model: "gpt-4o-mini".to_string(),
            endpoint: endpoint.to_string(),
            api_key: api_key.map(str::to_string),
            max_tokens: None,
            temperature: None,
            top_p: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn new_rejects_non_openai_provider() {
        let err = OpenAiService::new(cfg(LlmProvider::Ollama, "https://api.openai.com", Some("sk-test"))).unwrap_err();
        assert!(matches!(err, AiLlmError::Provider(ProviderError::InvalidProvider)));
    }

    #[test]
    fn new_rejects_missing_api_key() {
        let err = OpenAiService::new(cfg(LlmProvider::OpenAi, "https://api.openai.com", None)).unwrap_err();
        assert!(matches!(err, AiLlmError::Provider(ProviderError::MissingApiKey)));
    }

    #[test]
    fn new_rejects_endpoint_without_a_scheme() {
        let err = OpenAiService::new(cfg(LlmProvider::OpenAi, "api.openai.com", Some("sk-test"))).unwrap_err();
        assert!(matches!(err, AiLlmError::Provider(ProviderError::InvalidEndpoint(_))));
    }

    #[test]
    fn new_accepts_a_well_formed_config() {
        assert!(OpenAiService::new(cfg(LlmProvider::OpenAi, "https://api.openai.com", Some("sk-test"))).is_ok());
    }
}
