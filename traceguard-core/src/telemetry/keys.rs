/// Span attribute keys for intercepted LLM calls.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const LLM_VENDOR: &str = "llm.vendor";
pub const LLM_REQUEST_TYPE: &str = "llm.request.type";
pub const LLM_REQUEST_MODEL: &str = "llm.request.model";
pub const LLM_REQUEST_MAX_TOKENS: &str = "llm.request.max_tokens";
pub const LLM_TEMPERATURE: &str = "llm.temperature";
pub const LLM_TOP_P: &str = "llm.top_p";
pub const LLM_FREQUENCY_PENALTY: &str = "llm.frequency_penalty";
pub const LLM_PRESENCE_PENALTY: &str = "llm.presence_penalty";
pub const LLM_USER: &str = "llm.user";
pub const LLM_HEADERS: &str = "llm.headers";
pub const LLM_CHAT_STOP_SEQUENCES: &str = "llm.chat.stop_sequences";

/// Prefix for `llm.prompts.<i>.role` / `llm.prompts.<i>.content`.
pub const LLM_PROMPTS: &str = "llm.prompts";
/// Prefix for `llm.request.functions.<i>.{name,description,parameters}`.
pub const LLM_REQUEST_FUNCTIONS: &str = "llm.request.functions";

pub const LLM_RESPONSE_MODEL: &str = "llm.response.model";
/// Prefix for `llm.completions.<i>.*`; `<i>` is the choice's reported index.
pub const LLM_COMPLETIONS: &str = "llm.completions";
pub const LLM_USAGE_TOTAL_TOKENS: &str = "llm.usage.total_tokens";
pub const LLM_USAGE_COMPLETION_TOKENS: &str = "llm.usage.completion_tokens";
pub const LLM_USAGE_PROMPT_TOKENS: &str = "llm.usage.prompt_tokens";

pub const OPENAI_API_VERSION: &str = "openai.api_version";
pub const OPENAI_API_BASE: &str = "openai.api_base";
pub const OPENAI_API_TYPE: &str = "openai.api_type";

/// Value of [`LLM_VENDOR`] on every span this crate opens.
pub const VENDOR_OPENAI: &str = "OpenAI";
