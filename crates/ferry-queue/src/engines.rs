//! Registry of backend engine adapters keyed by family.

use std::collections::HashMap;
use std::sync::Arc;

use ferry_transfer_core::{EngineAdapter, EngineKind};

use crate::error::{QueueError, QueueResult};

/// Immutable set of engine adapters the orchestrator can dispatch to.
#[derive(Clone, Default)]
pub struct EngineSet {
    adapters: HashMap<EngineKind, Arc<dyn EngineAdapter>>,
}

impl EngineSet {
    /// Construct an empty adapter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under the kind it reports.
    ///
    /// A later registration for the same kind replaces the earlier one.
    pub fn register(&mut self, adapter: Arc<dyn EngineAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Builder-style registration for wiring code.
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn EngineAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Look up the adapter for a backend family.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::UnknownEngine`] when no adapter is registered.
    pub fn get(&self, kind: EngineKind) -> QueueResult<Arc<dyn EngineAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or(QueueError::UnknownEngine { kind })
    }

    /// The backend families currently registered.
    #[must_use]
    pub fn kinds(&self) -> Vec<EngineKind> {
        self.adapters.keys().copied().collect()
    }
}
