//! Single-profile LLM client used by the review/test-generation workers.
//!
//! Workers never see `OllamaService`/`OpenAiService` directly — only
//! [`LlmClient::invoke`]. The provider set is fixed at compile time, so
//! dispatch is a plain enum match rather than a boxed trait object.

pub mod config;
pub mod error_handler;
pub mod services;

use config::{LlmModelConfig, LlmProvider};
use error_handler::{ConfigError, Result, env_opt_u32, must_env};
use services::ollama_service::OllamaService;
use services::open_ai_service::OpenAiService;

#[derive(Debug)]
enum Inner {
    Ollama(OllamaService),
    OpenAi(OpenAiService),
}

#[derive(Debug)]
pub struct LlmClient {
    inner: Inner,
    cfg: LlmModelConfig,
}

impl LlmClient {
    pub fn new(cfg: LlmModelConfig) -> Result<Self> {
        let inner = match cfg.provider {
            LlmProvider::Ollama => Inner::Ollama(OllamaService::new(cfg.clone())?),
            LlmProvider::OpenAi => Inner::OpenAi(OpenAiService::new(cfg.clone())?),
        };
        Ok(Self { inner, cfg })
    }

    /// Reads a single profile from environment variables:
    /// `LLM_PROVIDER` (`ollama` | `openai`), `LLM_MODEL`, `LLM_ENDPOINT`,
    /// `LLM_API_KEY` (OpenAI only), `LLM_MAX_TOKENS`, `LLM_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let provider = match must_env("LLM_PROVIDER")?.to_lowercase().as_str() {
            "ollama" => LlmProvider::Ollama,
            "openai" => LlmProvider::OpenAi,
            _ => {
                return Err(ConfigError::InvalidFormat {
                    var: "LLM_PROVIDER",
                    reason: "expected `ollama` or `openai`",
                }
                .into());
            }
        };
        Self::new(LlmModelConfig {
            provider,
            model: must_env("LLM_MODEL")?,
            endpoint: must_env("LLM_ENDPOINT")?,
            api_key: std::env::var("LLM_API_KEY").ok(),
            max_tokens: env_opt_u32("LLM_MAX_TOKENS")?,
            temperature: std::env::var("LLM_TEMPERATURE").ok().and_then(|v| v.parse().ok()),
            top_p: None,
            timeout_secs: std::env::var("LLM_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()),
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.cfg.provider
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    pub async fn invoke(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        match &self.inner {
            Inner::Ollama(svc) => svc.generate(prompt, system).await,
            Inner::OpenAi(svc) => svc.generate(prompt, system).await,
        }
    }

    pub async fn healthy(&self) -> bool {
        match &self.inner {
            Inner::Ollama(svc) => svc.healthy().await,
            Inner::OpenAi(svc) => svc.healthy().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_handler::{AiLlmError, ProviderError};
    use std::sync::Mutex;

    // `from_env` reads process-global state; serialize the tests that touch
    // it so they don't see each other's env vars mid-run.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &["LLM_PROVIDER", "LLM_MODEL", "LLM_ENDPOINT", "LLM_API_KEY", "LLM_MAX_TOKENS", "LLM_TEMPERATURE", "LLM_TIMEOUT_SECS"];

    fn clear_env() {
        for var in VARS {
            unsafe { std::env::remove_var(var) };
        }
    }

    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) };
    }

    #[test]
    fn from_env_selects_ollama() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_env("LLM_PROVIDER", "ollama");
        set_env("LLM_MODEL", "llama3");
        set_env("LLM_ENDPOINT", "http://localhost:11434");

        let client = LlmClient::from_env().unwrap();
        assert_eq!(client.provider(), LlmProvider::Ollama);
        assert_eq!(client.model(), "llama3");
        clear_env();
    }

    #[test]
    fn from_env_selects_openai() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_env("LLM_PROVIDER", "OpenAI");
        set_env("LLM_MODEL", "gpt-4o-mini");
        set_env("LLM_ENDPOINT", "https://api.openai.com");
        set_env("LLM_API_KEY", "sk-test");

        let client = LlmClient::from_env().unwrap();
        assert_eq!(client.provider(), LlmProvider::OpenAi);
        clear_env();
    }

    #[test]
    fn from_env_rejects_unknown_provider() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_env("LLM_PROVIDER", "anthropic");
        set_env("LLM_MODEL", "m");
        set_env("LLM_ENDPOINT", "http://localhost");

        let err = LlmClient::from_env().unwrap_err();
        assert!(matches!(err, AiLlmError::Config(ConfigError::InvalidFormat { var: "LLM_PROVIDER", .. })));
        clear_env();
    }

    #[test]
    fn from_env_surfaces_missing_api_key_for_openai() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_env("LLM_PROVIDER", "openai");
        set_env("LLM_MODEL", "gpt-4o-mini");
        set_env("LLM_ENDPOINT", "https://api.openai.com");

        let err = LlmClient::from_env().unwrap_err();
        assert!(matches!(err, AiLlmError::Provider(ProviderError::MissingApiKey)));
        clear_env();
    }
}
