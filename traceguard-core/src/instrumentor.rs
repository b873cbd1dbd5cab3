//! Installs and removes the call interceptor on a [`MethodRegistry`].

use std::sync::{Arc, Mutex, MutexGuard};

use opentelemetry::trace::{Tracer, TracerProvider};

use crate::config::Config;
use crate::error::{CoreResult, TraceguardError};
use crate::interceptor::{InstrumentedMethod, InterceptContext};
use crate::method::{LlmMethod, MethodKey, WRAPPED_METHODS_V0, WRAPPED_METHODS_V1, wrapped_methods};
use crate::policy::ContentPolicy;
use crate::registry::MethodRegistry;
use crate::telemetry::{SpanTracer, tracer_from_provider};
use crate::version::{LibraryVersion, VersionSource};

/// Target library requirement this instrumentation was written against.
pub const INSTRUMENTS: &[&str] = &["openai >= 0.27.0"];

pub fn instrumentation_dependencies() -> &'static [&'static str] {
    INSTRUMENTS
}

type Originals = Vec<(MethodKey, Arc<dyn LlmMethod>)>;

pub struct Instrumentor {
    registry: Arc<MethodRegistry>,
    ctx: Arc<InterceptContext>,
    installed: Mutex<Option<Originals>>,
}

impl Instrumentor {
    pub fn new(
        registry: Arc<MethodRegistry>,
        tracer: Arc<dyn SpanTracer>,
        versions: Arc<dyn VersionSource>,
        cfg: &Config,
    ) -> Self {
        let ctx = InterceptContext {
            tracer,
            version: Arc::new(LibraryVersion::new(cfg.library.package.clone(), versions)),
            content: ContentPolicy::from_config(&cfg.tracing),
            api: cfg.api.clone(),
            incomplete: cfg.tracing.incomplete_spans,
        };
        Self {
            registry,
            ctx: Arc::new(ctx),
            installed: Mutex::new(None),
        }
    }

    /// Build over a tracer taken from `provider`, scoped as `[tracing] tracer_name`.
    pub fn from_provider<P>(
        registry: Arc<MethodRegistry>,
        provider: &P,
        versions: Arc<dyn VersionSource>,
        cfg: &Config,
    ) -> Self
    where
        P: TracerProvider,
        P::Tracer: Send + Sync + 'static,
        <P::Tracer as Tracer>::Span: Send + 'static,
    {
        let tracer = tracer_from_provider(provider, &cfg.tracing.tracer_name);
        Self::new(registry, Arc::new(tracer), versions, cfg)
    }

    pub fn context(&self) -> &InterceptContext {
        &self.ctx
    }

    pub fn is_instrumented(&self) -> bool {
        self.lock().is_some()
    }

    /// Wrap every target method of the detected library version.
    ///
    /// A second call is a no-op, and slots another instrumentor already
    /// wrapped are left alone. Nothing is replaced unless every target is
    /// registered.
    pub fn instrument(&self) -> CoreResult<()> {
        let mut installed = self.lock();
        if installed.is_some() {
            tracing::debug!("openai already instrumented");
            return Ok(());
        }

        let is_v1 = self.ctx.version.is_v1()?;
        let targets = wrapped_methods(is_v1);
        let missing: Vec<String> = targets
            .iter()
            .map(|m| m.key())
            .filter(|k| !self.registry.contains(k))
            .map(|k| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(TraceguardError::UnknownMethod(missing.join(", ")));
        }

        let mut originals = Vec::with_capacity(targets.len());
        for descriptor in targets {
            let key = descriptor.key();
            if self.registry.is_instrumented(&key) {
                tracing::debug!(method = %key, "already instrumented, skipping");
                continue;
            }
            let original = self
                .registry
                .get(&key)
                .ok_or_else(|| TraceguardError::UnknownMethod(key.to_string()))?;
            let wrapper = InstrumentedMethod::new(*descriptor, original.clone(), self.ctx.clone());
            self.registry.replace(&key, Arc::new(wrapper))?;
            originals.push((key, original));
        }

        if originals.is_empty() {
            tracing::debug!("openai already instrumented in registry");
            return Ok(());
        }
        tracing::info!(methods = originals.len(), v1 = is_v1, "instrumented openai");
        *installed = Some(originals);
        Ok(())
    }

    /// Put the original methods back. No-op when not instrumented.
    pub fn uninstrument(&self) -> CoreResult<()> {
        let Some(originals) = self.lock().take() else {
            tracing::debug!("openai not instrumented");
            return Ok(());
        };
        for (key, original) in originals {
            self.registry.replace(&key, original)?;
        }
        tracing::info!("uninstrumented openai");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Originals>> {
        self.installed.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Instrument the target methods in `registry` once.
///
/// Fails when no target method of either library version is registered.
/// Calling it again on the same registry wraps nothing; the returned
/// instrumentor then reports `is_instrumented() == false`.
pub fn init_openai_instrumentor(
    registry: Arc<MethodRegistry>,
    tracer: Arc<dyn SpanTracer>,
    versions: Arc<dyn VersionSource>,
    cfg: &Config,
) -> CoreResult<Instrumentor> {
    let available = WRAPPED_METHODS_V0
        .iter()
        .chain(WRAPPED_METHODS_V1)
        .any(|m| registry.contains(&m.key()));
    if !available {
        return Err(TraceguardError::Validation(
            "need to register openai methods to instrument openai with traceguard".into(),
        ));
    }
    let instrumentor = Instrumentor::new(registry, tracer, versions, cfg);
    instrumentor.instrument()?;
    Ok(instrumentor)
}
