use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// What happens to a span whose call or stream did not complete normally.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteSpanPolicy {
    /// Mark the span as an error (or, for an abandoned stream, just end it).
    #[default]
    Close,
    /// Leave the span without status and never end it.
    LeaveOpen,
}

fn default_content_env() -> String {
    "TRACELOOP_TRACE_CONTENT".to_string()
}
fn default_tracer_name() -> String {
    "llm_traceguard".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TracingCfg {
    /// Overrides the environment toggle when set.
    #[serde(default)]
    pub trace_content: Option<bool>,
    /// Environment variable consulted when `trace_content` is unset.
    #[serde(default = "default_content_env")]
    pub content_env: String,
    #[serde(default)]
    pub incomplete_spans: IncompleteSpanPolicy,
    #[serde(default = "default_tracer_name")]
    pub tracer_name: String,
}

impl Default for TracingCfg {
    fn default() -> Self {
        Self {
            trace_content: None,
            content_env: default_content_env(),
            incomplete_spans: IncompleteSpanPolicy::default(),
            tracer_name: default_tracer_name(),
        }
    }
}

fn default_package() -> String {
    "openai".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LibraryCfg {
    /// Package whose version decides the method table.
    #[serde(default = "default_package")]
    pub package: String,
    /// Installed version. Without it version detection fails.
    #[serde(default)]
    pub version: Option<String>,
}

impl Default for LibraryCfg {
    fn default() -> Self {
        Self {
            package: default_package(),
            version: None,
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiCfg {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_type: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    /// Name of the environment variable that contains the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for ApiCfg {
    fn default() -> Self {
        Self {
            base_url: None,
            api_type: None,
            api_version: None,
            organization: None,
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub tracing: TracingCfg,
    #[serde(default)]
    pub library: LibraryCfg,
    #[serde(default)]
    pub api: ApiCfg,
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::TraceguardError::from)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| crate::error::TraceguardError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::TraceguardError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::TraceguardError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::TraceguardError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::TraceguardError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }
}
