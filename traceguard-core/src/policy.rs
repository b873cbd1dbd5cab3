//! Content-tracing policy: may prompt and completion text go on spans?

use crate::config::TracingCfg;
use crate::context::content_tracing_overridden;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPolicy {
    configured: Option<bool>,
    env_var: String,
}

impl ContentPolicy {
    pub fn from_config(cfg: &TracingCfg) -> Self {
        Self {
            configured: cfg.trace_content,
            env_var: cfg.content_env.clone(),
        }
    }

    /// Policy with a fixed base decision; the ambient override still applies.
    pub fn fixed(enabled: bool) -> Self {
        Self {
            configured: Some(enabled),
            env_var: TracingCfg::default().content_env,
        }
    }

    /// Configured value (or environment toggle) OR the ambient override.
    pub fn should_send_prompts(&self) -> bool {
        let base = match self.configured {
            Some(enabled) => enabled,
            None => env_flag(std::env::var(&self.env_var).ok().as_deref()),
        };
        base || content_tracing_overridden()
    }
}

/// Unset or empty reads as "true"; anything else must spell `true`.
pub fn env_flag(raw: Option<&str>) -> bool {
    match raw {
        None | Some("") => true,
        Some(v) => v.eq_ignore_ascii_case("true"),
    }
}
