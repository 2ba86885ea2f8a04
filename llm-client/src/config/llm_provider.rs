/// Backend used for LLM inference.
///
/// Review/test-generation workers never talk to a provider SDK directly —
/// they only see this enum and [`crate::LlmClient`]. Adding a provider
/// means adding a variant here plus a matching arm in the dispatch methods;
/// there is no `dyn` trait object in this crate on purpose, since the set
/// of providers is fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmProvider {
    /// Local Ollama runtime.
    Ollama,
    /// OpenAI-compatible chat completions API.
    OpenAi,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Ollama => write!(f, "Ollama"),
            LlmProvider::OpenAi => write!(f, "OpenAI"),
        }
    }
}
