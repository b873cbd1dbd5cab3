use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CoreResult, TraceguardError};

/// An object whose attributes can be read as a field map.
///
/// Implemented for every `Serialize` type; the serialized form is the field map.
pub trait AttributeObject: fmt::Debug + Send + Sync {
    fn to_fields(&self) -> CoreResult<Map<String, Value>>;
    fn as_any(&self) -> &dyn Any;
}

impl<T> AttributeObject for T
where
    T: Serialize + fmt::Debug + Send + Sync + 'static,
{
    fn to_fields(&self) -> CoreResult<Map<String, Value>> {
        let value = serde_json::to_value(self)
            .map_err(|e| TraceguardError::extraction(format!("cannot read object fields: {e}")))?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(TraceguardError::extraction(format!(
                "expected an object, got {}",
                kind_of(&other)
            ))),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A response body or stream chunk as produced by a target method.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Mapping-backed: fields are JSON object entries.
    Mapping(Value),
    /// Attribute-backed: fields are the attributes of a typed object.
    Object(Arc<dyn AttributeObject>),
}

impl Payload {
    pub fn object<T: AttributeObject + 'static>(obj: T) -> Self {
        Self::Object(Arc::new(obj))
    }

    /// Falsy payloads (`null`, `{}`, `[]`, `""`) are not described on the span.
    /// Objects are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Mapping(Value::Null) => true,
            Self::Mapping(Value::Object(m)) => m.is_empty(),
            Self::Mapping(Value::Array(a)) => a.is_empty(),
            Self::Mapping(Value::String(s)) => s.is_empty(),
            Self::Mapping(_) | Self::Object(_) => false,
        }
    }

    /// Normalize to a field map.
    pub fn fields(&self) -> CoreResult<Fields> {
        match self {
            Self::Mapping(Value::Object(map)) => Ok(Fields(map.clone())),
            Self::Mapping(other) => Err(TraceguardError::extraction(format!(
                "expected a mapping, got {}",
                kind_of(other)
            ))),
            Self::Object(obj) => (**obj).to_fields().map(Fields),
        }
    }

    pub fn as_mapping(&self) -> Option<&Value> {
        match self {
            Self::Mapping(v) => Some(v),
            Self::Object(_) => None,
        }
    }

    /// Borrow the typed object back out of an attribute-backed payload.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            Self::Object(obj) => (**obj).as_any().downcast_ref::<T>(),
            Self::Mapping(_) => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Mapping(value)
    }
}

/// Mappings compare by value, objects by identity.
impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Mapping(a), Self::Mapping(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Owned, normalized field map of a payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Map<String, Value>);

impl Fields {
    pub fn view(&self) -> FieldView<'_> {
        FieldView(&self.0)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Borrowed read access to one level of fields.
///
/// `null` entries read the same as missing ones.
#[derive(Debug, Clone, Copy)]
pub struct FieldView<'a>(&'a Map<String, Value>);

impl<'a> FieldView<'a> {
    pub fn from_map(map: &'a Map<String, Value>) -> Self {
        Self(map)
    }

    /// View `value` as a field map; `what` names it in the error.
    pub fn of(value: &'a Value, what: &str) -> CoreResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(TraceguardError::extraction(format!(
                "{what}: expected an object, got {}",
                kind_of(other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn str(&self, key: &str) -> Option<&'a str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn list(&self, key: &str) -> CoreResult<Option<&'a [Value]>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items.as_slice())),
            Some(other) => Err(TraceguardError::extraction(format!(
                "{key}: expected a list, got {}",
                kind_of(other)
            ))),
        }
    }

    pub fn nested(&self, key: &str) -> CoreResult<Option<FieldView<'a>>> {
        self.get(key).map(|v| FieldView::of(v, key)).transpose()
    }

    /// The entity's own `index` field.
    pub fn index(&self) -> CoreResult<usize> {
        self.get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .ok_or_else(|| TraceguardError::extraction("choice without a numeric index"))
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
