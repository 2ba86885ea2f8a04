use super::llm_provider::LlmProvider;

/// Configuration for a single LLM profile (provider + model + connection
/// parameters). Cheap to clone; used as a cache key for the underlying
/// HTTP client in [`crate::LlmClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct LlmModelConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub timeout_secs: Option<u64>,
}
