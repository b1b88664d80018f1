pub mod client;
pub mod firebase;
pub mod memory;
pub mod sse;
pub mod store;

use std::sync::Arc;

pub use client::ChatClient;

use crate::config::FirebaseConfig;
use firebase::FirebaseBackend;
use memory::InMemoryBackend;
use store::{AuthProvider, ObjectStorage, RealtimeStore};

/// The three backend services the client talks to.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn RealtimeStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub storage: Arc<dyn ObjectStorage>,
}

impl Backend {
    pub fn in_memory(backend: InMemoryBackend) -> Self {
        let shared = Arc::new(backend);
        Self {
            store: shared.clone(),
            auth: shared.clone(),
            storage: shared,
        }
    }

    pub fn firebase(config: FirebaseConfig) -> Self {
        let shared = Arc::new(FirebaseBackend::new(config));
        Self {
            store: shared.clone(),
            auth: shared.clone(),
            storage: shared,
        }
    }
}
