use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CoreResult, TraceguardError};
use crate::payload::Payload;

/// Positional and keyword arguments of one call into a target method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_kwargs(kwargs: Map<String, Value>) -> Self {
        Self {
            args: Vec::new(),
            kwargs,
        }
    }

    /// Build keyword arguments from a typed request; its fields become kwargs.
    pub fn from_request<T: Serialize>(request: &T) -> CoreResult<Self> {
        match serde_json::to_value(request)
            .map_err(|e| TraceguardError::Validation(format!("unserializable request: {e}")))?
        {
            Value::Object(kwargs) => Ok(Self::from_kwargs(kwargs)),
            _ => Err(TraceguardError::Validation(
                "request must serialize to an object".into(),
            )),
        }
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// `stream=True` in the keyword arguments.
    pub fn wants_stream(&self) -> bool {
        self.kwargs
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Boxed stream of response chunks. Single-pass; ends when upstream ends.
pub type ChunkStream = futures::stream::BoxStream<'static, CoreResult<Payload>>;

/// What a target method returns: one value, or a lazy sequence of chunks.
pub enum CallOutput {
    Value(Payload),
    Stream(ChunkStream),
}

impl CallOutput {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    pub fn into_value(self) -> Option<Payload> {
        match self {
            Self::Value(p) => Some(p),
            Self::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<ChunkStream> {
        match self {
            Self::Stream(s) => Some(s),
            Self::Value(_) => None,
        }
    }
}

impl fmt::Debug for CallOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(p) => f.debug_tuple("Value").field(p).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}
