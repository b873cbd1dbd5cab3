use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use opentelemetry::trace::{SpanKind, Status};
use opentelemetry::{KeyValue, Value};
use serde_json::json;

use super::span::{SpanTracer, TraceSpan};

/// Everything a [`RecordingTracer`] saw for one span.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSpan {
    pub name: String,
    pub kind: SpanKind,
    pub attributes: BTreeMap<String, Value>,
    pub status: Status,
    pub ended: bool,
}

impl RecordedSpan {
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn str_attr(&self, key: &str) -> Option<String> {
        self.attributes.get(key).map(|v| v.as_str().into_owned())
    }

    /// Keys under `prefix.`, in sorted order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<&str> {
        let dotted = format!("{prefix}.");
        self.attributes
            .keys()
            .filter(|k| k.starts_with(&dotted))
            .map(String::as_str)
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let attributes: serde_json::Map<String, serde_json::Value> = self
            .attributes
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::Bool(b) => json!(b),
                    Value::I64(i) => json!(i),
                    Value::F64(f) => json!(f),
                    other => json!(other.as_str()),
                };
                (k.clone(), value)
            })
            .collect();
        json!({
            "name": self.name,
            "kind": format!("{:?}", self.kind),
            "status": format!("{:?}", self.status),
            "ended": self.ended,
            "attributes": attributes,
        })
    }
}

/// In-memory tracer that keeps every span it starts.
///
/// Cheap to clone; clones share the same store.
#[derive(Debug, Clone)]
pub struct RecordingTracer {
    store: Arc<Mutex<Vec<RecordedSpan>>>,
    recording: bool,
}

impl Default for RecordingTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Vec::new())),
            recording: true,
        }
    }

    /// A tracer whose spans report `is_recording() == false` and drop writes,
    /// like spans rejected by a sampler.
    pub fn non_recording() -> Self {
        Self {
            recording: false,
            ..Self::new()
        }
    }

    pub fn spans(&self) -> Vec<RecordedSpan> {
        lock(&self.store).clone()
    }

    pub fn started(&self) -> usize {
        lock(&self.store).len()
    }

    pub fn ended(&self) -> usize {
        lock(&self.store).iter().filter(|s| s.ended).count()
    }

    pub fn clear(&self) {
        lock(&self.store).clear();
    }
}

impl SpanTracer for RecordingTracer {
    fn start_span(
        &self,
        name: &'static str,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> Box<dyn TraceSpan> {
        let mut record = RecordedSpan {
            name: name.to_string(),
            kind,
            attributes: BTreeMap::new(),
            status: Status::Unset,
            ended: false,
        };
        if self.recording {
            for kv in attributes {
                record.attributes.insert(kv.key.as_str().to_string(), kv.value);
            }
        }
        let mut spans = lock(&self.store);
        spans.push(record);
        Box::new(RecordingSpan {
            store: self.store.clone(),
            slot: spans.len() - 1,
            recording: self.recording,
        })
    }
}

struct RecordingSpan {
    store: Arc<Mutex<Vec<RecordedSpan>>>,
    slot: usize,
    recording: bool,
}

impl RecordingSpan {
    fn with_record(&self, f: impl FnOnce(&mut RecordedSpan)) {
        if let Some(rec) = lock(&self.store).get_mut(self.slot) {
            f(rec);
        }
    }
}

impl TraceSpan for RecordingSpan {
    fn set_attribute(&mut self, attribute: KeyValue) {
        if !self.recording {
            return;
        }
        self.with_record(|rec| {
            if !rec.ended {
                rec.attributes
                    .insert(attribute.key.as_str().to_string(), attribute.value);
            }
        });
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn set_status(&mut self, status: Status) {
        if !self.recording {
            return;
        }
        self.with_record(|rec| {
            if !rec.ended {
                rec.status = status;
            }
        });
    }

    fn end(&mut self) {
        self.with_record(|rec| rec.ended = true);
    }
}

// A panic while holding the lock must not take the tracer down with it.
fn lock(store: &Mutex<Vec<RecordedSpan>>) -> MutexGuard<'_, Vec<RecordedSpan>> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
