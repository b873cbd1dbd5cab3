use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::version::LibraryVersion;

/// Kind of LLM request a wrapped method performs.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Chat,
    Completion,
    Rerank,
    Unknown,
}

impl RequestType {
    /// Value of the `llm.request.type` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Completion => "completion",
            Self::Rerank => "rerank",
            Self::Unknown => "unknown",
        }
    }
}

/// Version 1 clients are told apart by module path, version 0 by object name.
pub fn request_type_by_module_object(module: &str, object: &str, is_v1: bool) -> RequestType {
    if is_v1 {
        if module.ends_with(".chat.completions") {
            RequestType::Chat
        } else if module.ends_with(".completions") {
            RequestType::Completion
        } else {
            RequestType::Unknown
        }
    } else {
        match object {
            "ChatCompletion" => RequestType::Chat,
            "Completion" => RequestType::Completion,
            _ => RequestType::Unknown,
        }
    }
}

/// Classify against the cached library version; fails only if detection fails.
pub fn classify(module: &str, object: &str, version: &LibraryVersion) -> CoreResult<RequestType> {
    Ok(request_type_by_module_object(module, object, version.is_v1()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::PackageVersions;
    use std::sync::Arc;

    #[test]
    fn v1_classifies_by_module() {
        assert_eq!(
            request_type_by_module_object("openai.resources.chat.completions", "Completions", true),
            RequestType::Chat
        );
        assert_eq!(
            request_type_by_module_object("openai.resources.completions", "Completions", true),
            RequestType::Completion
        );
        assert_eq!(
            request_type_by_module_object("openai.resources.embeddings", "Embeddings", true),
            RequestType::Unknown
        );
        // object name is ignored on v1
        assert_eq!(
            request_type_by_module_object("openai", "ChatCompletion", true),
            RequestType::Unknown
        );
    }

    #[test]
    fn v0_classifies_by_object() {
        assert_eq!(request_type_by_module_object("openai", "Completion", false), RequestType::Completion);
        assert_eq!(request_type_by_module_object("openai", "ChatCompletion", false), RequestType::Chat);
        assert_eq!(request_type_by_module_object("openai", "Embedding", false), RequestType::Unknown);
    }

    #[test]
    fn classify_uses_detected_version() {
        let v0 = LibraryVersion::new("openai", Arc::new(PackageVersions::new().with("openai", "0.28.1")));
        assert_eq!(classify("openai", "ChatCompletion", &v0).unwrap(), RequestType::Chat);

        let missing = LibraryVersion::new("openai", Arc::new(PackageVersions::new()));
        assert!(classify("openai", "ChatCompletion", &missing).is_err());
    }

    #[test]
    fn request_type_labels() {
        assert_eq!(RequestType::Chat.as_str(), "chat");
        assert_eq!(RequestType::Rerank.as_str(), "rerank");
        assert_eq!(serde_json::to_string(&RequestType::Completion).unwrap(), "\"completion\"");
    }
}
