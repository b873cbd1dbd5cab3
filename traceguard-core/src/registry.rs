use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::call::{CallArgs, CallOutput};
use crate::error::{CoreResult, TraceguardError};
use crate::method::{LlmMethod, MethodKey};

/// Callable table that application code calls through.
///
/// Instrumentation swaps entries in place; callers holding the registry see
/// the swap on their next call.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<MethodKey, Arc<dyn LlmMethod>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: MethodKey, method: Arc<dyn LlmMethod>) {
        tracing::debug!(method = %key, "registering target method");
        self.write().insert(key, method);
    }

    pub fn get(&self, key: &MethodKey) -> Option<Arc<dyn LlmMethod>> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &MethodKey) -> bool {
        self.read().contains_key(key)
    }

    /// Whether the method at `key` is already wrapped by an instrumentor.
    pub fn is_instrumented(&self, key: &MethodKey) -> bool {
        self.read().get(key).is_some_and(|m| m.is_instrumented())
    }

    /// Install `method` at `key`, returning what was there.
    pub fn replace(&self, key: &MethodKey, method: Arc<dyn LlmMethod>) -> CoreResult<Arc<dyn LlmMethod>> {
        let mut methods = self.write();
        match methods.get_mut(key) {
            Some(slot) => Ok(std::mem::replace(slot, method)),
            None => Err(TraceguardError::UnknownMethod(key.to_string())),
        }
    }

    /// Call whatever is currently registered at `key`.
    pub async fn call(&self, key: &MethodKey, args: CallArgs) -> CoreResult<CallOutput> {
        let method = self
            .get(key)
            .ok_or_else(|| TraceguardError::UnknownMethod(key.to_string()))?;
        method.call(args).await
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<MethodKey, Arc<dyn LlmMethod>>> {
        self.methods.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<MethodKey, Arc<dyn LlmMethod>>> {
        self.methods.write().unwrap_or_else(|p| p.into_inner())
    }
}
