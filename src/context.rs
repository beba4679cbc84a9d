use crate::error::Result;
use crate::model::{ModelRegistry, ModelSource, RegistryOptions};
use crate::pool::ConnectionRegistry;
use std::sync::Arc;

/// Everything one convergence run reads: the live connections and the
/// models bound to them. Built per run and passed explicitly.
pub struct SyncContext {
    pub connections: Arc<ConnectionRegistry>,
    pub models: ModelRegistry,
}

impl SyncContext {
    pub fn new(connections: Arc<ConnectionRegistry>, models: ModelRegistry) -> Self {
        Self {
            connections,
            models,
        }
    }

    /// Bind `sources` against `connections` and wrap the result.
    pub fn bind(
        connections: Arc<ConnectionRegistry>,
        sources: Vec<ModelSource>,
        options: &RegistryOptions,
    ) -> Result<Self> {
        let models = ModelRegistry::bind(sources, &connections, options)?;
        Ok(Self::new(connections, models))
    }
}
