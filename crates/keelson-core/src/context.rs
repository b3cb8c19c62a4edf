//! The root context every operation runs against.

use std::sync::Arc;

use keelson_store::CoordinationStore;

use crate::catalog::Catalog;
use crate::config::KeelsonConfig;
use crate::provider::Provider;

/// Configuration, persisted records and external collaborators, bundled so
/// they can be handed to the task engine and from there to each operation.
#[derive(Clone)]
pub struct Core {
    pub config: Arc<KeelsonConfig>,
    pub catalog: Catalog,
    pub provider: Arc<dyn Provider>,
}

impl Core {
    pub fn new(
        config: KeelsonConfig,
        store: CoordinationStore,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog: Catalog::new(store),
            provider,
        }
    }

    pub fn store(&self) -> &CoordinationStore {
        self.catalog.store()
    }
}
