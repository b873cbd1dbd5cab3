use thiserror::Error;

/// Core error type for traceguard.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum TraceguardError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Package metadata for the target library could not be read.
    #[error("cannot detect version of package {package}: {reason}")]
    VersionDetection { package: String, reason: String },

    /// A request or response did not have the shape an extractor expected.
    #[error("attribute extraction failed: {0}")]
    Extraction(String),

    #[error("no method registered at {0}")]
    UnknownMethod(String),

    #[error("rate limited by provider {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    #[error("provider unavailable: {provider}")]
    ProviderUnavailable { provider: String },

    #[error("upstream error from {provider}: {code} {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TraceguardError {
    pub(crate) fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }
}

pub type CoreResult<T> = std::result::Result<T, TraceguardError>;
