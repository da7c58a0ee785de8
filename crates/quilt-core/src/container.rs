//! Kernel service container.
//!
//! Services are assembled in two passes: instantiate everything, then wire
//! cross-references. The registry itself only tracks registration order and
//! drives the two lifecycle phases: `initialize` in registration order with
//! rollback on failure, `dispose` in reverse order.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use quilt_protocols::KernelError;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceId {
    Manifests,
    Contributions,
    Contexts,
    Engine,
    Hierarchy,
}

impl ServiceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceId::Manifests => "manifests",
            ServiceId::Contributions => "contributions",
            ServiceId::Contexts => "contexts",
            ServiceId::Engine => "engine",
            ServiceId::Hierarchy => "hierarchy",
        }
    }
}

pub trait KernelService: Send + Sync {
    fn service_id(&self) -> ServiceId;

    fn initialize(&self) -> Result<(), KernelError> {
        Ok(())
    }

    fn dispose(&self) {}

    /// Typed retrieval support for [`ServiceRegistry::get_as`].
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

pub struct ServiceRegistry {
    entries: Mutex<Vec<Arc<dyn KernelService>>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, service: Arc<dyn KernelService>) -> Result<(), KernelError> {
        let mut entries = self.entries.lock();
        let id = service.service_id();
        if entries.iter().any(|entry| entry.service_id() == id) {
            return Err(KernelError::ServiceAlreadyRegistered(id.as_str().to_string()));
        }
        debug!(service = id.as_str(), "service registered");
        entries.push(service);
        Ok(())
    }

    pub fn get(&self, id: ServiceId) -> Option<Arc<dyn KernelService>> {
        self.entries
            .lock()
            .iter()
            .find(|entry| entry.service_id() == id)
            .cloned()
    }

    /// Typed handle for a registered service.
    pub fn get_as<T: Send + Sync + 'static>(&self, id: ServiceId) -> Option<Arc<T>> {
        self.get(id).and_then(|svc| svc.as_any().downcast::<T>().ok())
    }

    /// Initialize services in registration order. On failure, services that
    /// already initialized are disposed in reverse before the error returns.
    pub fn initialize_all(&self) -> Result<(), KernelError> {
        let entries = self.entries.lock().clone();
        for (index, service) in entries.iter().enumerate() {
            if let Err(err) = service.initialize() {
                error!(
                    service = service.service_id().as_str(),
                    error = %err,
                    "service initialization failed, rolling back"
                );
                for initialized in entries[..index].iter().rev() {
                    initialized.dispose();
                }
                return Err(KernelError::ServiceInitFailed {
                    service: service.service_id().as_str().to_string(),
                    reason: err.to_string(),
                });
            }
            debug!(service = service.service_id().as_str(), "service initialized");
        }
        Ok(())
    }

    /// Dispose services in reverse registration order.
    pub fn dispose_all(&self) {
        let entries = self.entries.lock().clone();
        for service in entries.iter().rev() {
            debug!(service = service.service_id().as_str(), "service disposed");
            service.dispose();
        }
    }
}

#[cfg(test)]
#[path = "container_tests.rs"]
mod tests;
