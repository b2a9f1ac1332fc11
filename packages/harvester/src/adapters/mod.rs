//! Source adapters and the selector registry.
//!
//! The registry is assembled once at startup and only read afterwards.
//! New sources register an adapter; the core never changes.
//!
//! ```rust,ignore
//! let registry = AdapterRegistry::builder()
//!     .register(GazetteAdapter::default())
//!     .build();
//! let adapter = registry.resolve("gazette")?;
//! ```

pub mod gazette;

pub use gazette::{GazetteAdapter, GazetteProfile};

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{HarvestError, Result};
use crate::traits::adapter::SourceAdapter;

/// Read-only map from selector to adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Arc<HashMap<String, Arc<dyn SourceAdapter>>>,
}

impl AdapterRegistry {
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder::default()
    }

    /// Registry with every built-in adapter.
    pub fn with_defaults() -> Self {
        Self::builder().register(GazetteAdapter::default()).build()
    }

    pub fn get(&self, selector: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(selector).cloned()
    }

    pub fn resolve(&self, selector: &str) -> Result<Arc<dyn SourceAdapter>> {
        self.get(selector)
            .ok_or_else(|| HarvestError::UnknownAdapter(selector.to_string()))
    }

    /// Registered selectors, sorted.
    pub fn selectors(&self) -> Vec<&str> {
        let mut selectors: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        selectors.sort_unstable();
        selectors
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("selectors", &self.selectors())
            .finish()
    }
}

#[derive(Default)]
pub struct AdapterRegistryBuilder {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistryBuilder {
    /// Register an adapter under its own selector. A later registration
    /// for the same selector replaces the earlier one.
    pub fn register<A: SourceAdapter + 'static>(self, adapter: A) -> Self {
        self.register_arc(Arc::new(adapter))
    }

    pub fn register_arc(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        let selector = adapter.selector().to_string();
        if self.adapters.insert(selector.clone(), adapter).is_some() {
            tracing::warn!(selector = %selector, "adapter selector registered twice");
        }
        self
    }

    pub fn build(self) -> AdapterRegistry {
        AdapterRegistry {
            adapters: Arc::new(self.adapters),
        }
    }
}
