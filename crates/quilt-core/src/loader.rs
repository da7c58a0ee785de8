//! Implementation loading.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use quilt_protocols::{KernelError, Manifest};

use crate::traits::ExtensionImpl;

/// Resolves a manifest to its runtime implementation. Hosts supply their own
/// loader for remote or generated extensions.
#[async_trait]
pub trait ExtensionLoader: Send + Sync {
    async fn load(&self, manifest: &Manifest) -> Result<Arc<dyn ExtensionImpl>, KernelError>;
}

/// Loader backed by implementations registered in-process, keyed by
/// extension name.
pub struct LocalLoader {
    implementations: Mutex<HashMap<String, Arc<dyn ExtensionImpl>>>,
}

impl Default for LocalLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalLoader {
    pub fn new() -> Self {
        Self {
            implementations: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>, implementation: Arc<dyn ExtensionImpl>) {
        self.implementations
            .lock()
            .insert(name.into(), implementation);
    }
}

#[async_trait]
impl ExtensionLoader for LocalLoader {
    async fn load(&self, manifest: &Manifest) -> Result<Arc<dyn ExtensionImpl>, KernelError> {
        self.implementations
            .lock()
            .get(&manifest.name)
            .cloned()
            .ok_or_else(|| KernelError::LoaderUnavailable(manifest.name.clone()))
    }
}
