//! Named operation providers and pipelines assembled from them.
//!
//! Operations that need configuration (keys, algorithms, framing options)
//! are registered as [`OperationProvider`]s under a provider id. A
//! [`PipelineFactory`] turns a list of ids plus [`Attributes`] into a
//! type-checked [`Pipeline`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{OperationError, PipelineError};
use crate::hash::{ChecksumOperation, DigestOperation};
use crate::operation::{erase, AnyOperation};
use crate::pipeline::Pipeline;

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Settings handed to operation providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, serde_json::Value>);

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(serde_json::Value::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// OperationProvider
// ---------------------------------------------------------------------------

/// Builds a configured operation on demand.
///
/// Closures `Fn(&Attributes) -> Result<Arc<dyn AnyOperation>, OperationError>`
/// implement it directly.
pub trait OperationProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns an [`OperationError`] if the attributes do not describe a
    /// valid operation.
    fn build(&self, attributes: &Attributes) -> Result<Arc<dyn AnyOperation>, OperationError>;
}

impl<F> OperationProvider for F
where
    F: Fn(&Attributes) -> Result<Arc<dyn AnyOperation>, OperationError> + Send + Sync,
{
    fn build(&self, attributes: &Attributes) -> Result<Arc<dyn AnyOperation>, OperationError> {
        self(attributes)
    }
}

/// Wraps a closure as a shareable provider.
pub fn provider_fn<F>(build: F) -> Arc<dyn OperationProvider>
where
    F: Fn(&Attributes) -> Result<Arc<dyn AnyOperation>, OperationError> + Send + Sync + 'static,
{
    Arc::new(build)
}

// ---------------------------------------------------------------------------
// OperationRegistry
// ---------------------------------------------------------------------------

/// Provider id -> operation provider.
#[derive(Default)]
pub struct OperationRegistry {
    providers: RwLock<HashMap<String, Arc<dyn OperationProvider>>>,
}

impl OperationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `checksum` and `digest`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("checksum", provider_fn(|_| Ok(erase(ChecksumOperation))));
        registry.register("digest", provider_fn(|_| Ok(erase(DigestOperation))));
        registry
    }

    /// Registers `provider` under `id`. Returns false if the id is taken.
    pub fn register(&self, id: impl Into<String>, provider: Arc<dyn OperationProvider>) -> bool {
        let id = id.into();
        let mut providers = self.providers.write();
        if providers.contains_key(&id) {
            tracing::debug!(provider = %id, "operation provider already registered");
            return false;
        }
        providers.insert(id, provider);
        true
    }

    /// Returns false if nothing was registered under `id`.
    pub fn unregister(&self, id: &str) -> bool {
        self.providers.write().remove(id).is_some()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn OperationProvider>> {
        self.providers.read().get(id).cloned()
    }

    /// Builds one operation through the provider registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Failed`] if no provider is registered under
    /// `id`, or the provider's own error.
    pub fn build(
        &self,
        id: &str,
        attributes: &Attributes,
    ) -> Result<Arc<dyn AnyOperation>, OperationError> {
        let provider = self
            .get(id)
            .ok_or_else(|| OperationError::failed(id, "no operation provider registered"))?;
        provider.build(attributes)
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.providers.read().keys().cloned().collect();
        ids.sort();
        f.debug_struct("OperationRegistry")
            .field("providers", &ids)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PipelineFactory
// ---------------------------------------------------------------------------

/// Assembles `Pipeline<I, O>` values from registered providers.
pub struct PipelineFactory<I, O> {
    registry: Arc<OperationRegistry>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I: Send + 'static, O: Send + 'static> PipelineFactory<I, O> {
    #[must_use]
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self {
            registry,
            _types: PhantomData,
        }
    }

    /// Builds the steps named by `step_ids`, in order, and chains them.
    ///
    /// Ids without a registered provider are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Creation`] if a provider fails, if no step
    /// could be built, or if the resulting chain does not lead from `I` to
    /// `O`.
    pub fn build(
        &self,
        step_ids: &[&str],
        attributes: &Attributes,
    ) -> Result<Pipeline<I, O>, PipelineError> {
        let mut operations = Vec::with_capacity(step_ids.len());
        for id in step_ids {
            let Some(provider) = self.registry.get(id) else {
                tracing::warn!(provider = %id, "no operation provider registered, skipping step");
                continue;
            };
            let operation = provider.build(attributes).map_err(|e| {
                PipelineError::creation(format!("operation provider `{id}` failed: {e}"))
            })?;
            operations.push(operation);
        }
        if operations.is_empty() {
            return Err(PipelineError::creation("empty operations list"));
        }
        let pipeline = Pipeline::new().append_all(operations)?;
        pipeline.validate()?;
        Ok(pipeline)
    }
}

impl<I, O> Clone for PipelineFactory<I, O> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            _types: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::formats::{FormatKind, JsonFormat};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    fn registry() -> Arc<OperationRegistry> {
        let registry = OperationRegistry::with_builtins();
        registry.register(
            "format",
            provider_fn(|attributes| {
                let kind = match attributes.get_str("format") {
                    Some("msgpack") => FormatKind::MsgPack,
                    _ => FormatKind::Json,
                };
                Ok(kind.operation::<Ping>())
            }),
        );
        Arc::new(registry)
    }

    #[test]
    fn register_rejects_duplicate_id() {
        let registry = OperationRegistry::new();
        let json = provider_fn(|_| Ok(erase(JsonFormat::<Ping>::new())));
        assert!(registry.register("json", Arc::clone(&json)));
        assert!(!registry.register("json", json));
        assert!(registry.unregister("json"));
        assert!(!registry.unregister("json"));
        assert!(registry.get("json").is_none());
    }

    #[test]
    fn build_unknown_id_fails() {
        let err = OperationRegistry::new()
            .build("missing", &Attributes::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn factory_chains_steps_in_order() {
        let factory = PipelineFactory::<Ping, Bytes>::new(registry());
        let attributes = Attributes::new().with("format", "msgpack");
        let pipeline = factory.build(&["format", "checksum"], &attributes).unwrap();
        assert_eq!(pipeline.len(), 2);
        let bytes = pipeline.execute(Ping { seq: 9 }).unwrap();
        assert_eq!(pipeline.execute_inverse(bytes).unwrap(), Ping { seq: 9 });
    }

    #[test]
    fn factory_skips_unknown_ids() {
        let factory = PipelineFactory::<Ping, Bytes>::new(registry());
        let pipeline = factory
            .build(&["format", "compression"], &Attributes::new())
            .unwrap();
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn factory_fails_when_nothing_was_built() {
        let factory = PipelineFactory::<Ping, Bytes>::new(registry());
        let err = factory.build(&["unknown"], &Attributes::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Creation { .. }));
    }

    #[test]
    fn factory_rejects_misordered_steps() {
        let factory = PipelineFactory::<Ping, Bytes>::new(registry());
        let err = factory
            .build(&["checksum", "format"], &Attributes::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Creation { .. }));
    }

    #[test]
    fn attributes_accessors() {
        let attributes = Attributes::new().with("alg", "sha256").with("rounds", 3);
        assert_eq!(attributes.get_str("alg"), Some("sha256"));
        assert_eq!(attributes.get("rounds"), Some(&serde_json::json!(3)));
        assert_eq!(attributes.names().collect::<Vec<_>>(), vec!["alg", "rounds"]);
    }
}
