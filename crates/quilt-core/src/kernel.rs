//! Kernel assembly and facade.
//!
//! [`Kernel::new`] instantiates every service, wires their cross-references,
//! registers them in the container, and runs the initialize pass. The facade
//! methods delegate; all orchestration logic lives in the services.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use quilt_protocols::{ActivationEventDefinition, KernelError, Manifest};
use serde_json::{Map, Value};
use tracing::info;

use crate::container::{KernelService, ServiceRegistry};
use crate::context::{ActivationContext, ContextManager};
use crate::diagnostics::Diagnostics;
use crate::engine::ActivationEngine;
use crate::events::{EventBus, KernelEvent, SubscriptionId};
use crate::hierarchy::HierarchyManager;
use crate::loader::{ExtensionLoader, LocalLoader};
use crate::registry::contribution::ContributionManager;
use crate::registry::keyword::KeywordRegistry;
use crate::registry::manifest::{AssertionOptions, ManifestRegistry};
use crate::traits::ExtensionApi;

static NEXT_KERNEL_ID: AtomicU64 = AtomicU64::new(1);

pub struct KernelOptions {
    manifests: Vec<Manifest>,
    activation_events: Vec<ActivationEventDefinition>,
    assertion_options: AssertionOptions,
    strict: bool,
    loader: Arc<dyn ExtensionLoader>,
    parent: Option<Arc<Kernel>>,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelOptions {
    pub fn new() -> Self {
        Self {
            manifests: Vec::new(),
            activation_events: Vec::new(),
            assertion_options: AssertionOptions::default(),
            strict: true,
            loader: Arc::new(LocalLoader::new()),
            parent: None,
        }
    }

    pub fn with_manifests(mut self, manifests: Vec<Manifest>) -> Self {
        self.manifests = manifests;
        self
    }

    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifests.push(manifest);
        self
    }

    pub fn with_activation_events(mut self, events: Vec<ActivationEventDefinition>) -> Self {
        self.activation_events = events;
        self
    }

    pub fn with_activation_event(mut self, event: ActivationEventDefinition) -> Self {
        self.activation_events.push(event);
        self
    }

    pub fn with_assertion_options(mut self, options: AssertionOptions) -> Self {
        self.assertion_options = options;
        self
    }

    /// Collect configuration errors instead of failing on the first one.
    pub fn permissive(mut self) -> Self {
        self.strict = false;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn ExtensionLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_parent(mut self, parent: Arc<Kernel>) -> Self {
        self.parent = Some(parent);
        self
    }
}

pub struct Kernel {
    id: u64,
    diagnostics: Arc<Diagnostics>,
    event_bus: Arc<EventBus>,
    services: ServiceRegistry,
    manifests: Arc<ManifestRegistry>,
    contexts: Arc<ContextManager>,
    contributions: Arc<ContributionManager>,
    engine: Arc<ActivationEngine>,
    hierarchy: Arc<HierarchyManager>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Kernel {
    pub fn new(options: KernelOptions) -> Result<Arc<Self>, KernelError> {
        let diagnostics = Arc::new(Diagnostics::new(options.strict));
        let event_bus = Arc::new(EventBus::new());

        let manifests = ManifestRegistry::new(
            options.manifests,
            options.activation_events,
            options.assertion_options.clone(),
            diagnostics.clone(),
        )?;
        let contexts = Arc::new(ContextManager::new(diagnostics.clone()));
        let contributions = Arc::new(ContributionManager::new(
            diagnostics.clone(),
            event_bus.clone(),
            options.assertion_options,
        ));
        let engine = Arc::new(ActivationEngine::new(
            event_bus.clone(),
            options.loader,
            diagnostics.clone(),
        ));
        let hierarchy = Arc::new(HierarchyManager::new());

        contexts.wire(manifests.clone(), contributions.clone());
        contexts.wire_engine(engine.clone());
        contributions.wire(manifests.clone(), contexts.clone());
        engine.wire(manifests.clone(), contexts.clone(), contributions.clone());

        let services = ServiceRegistry::new();
        services.register(manifests.clone() as Arc<dyn KernelService>)?;
        services.register(contributions.clone() as Arc<dyn KernelService>)?;
        services.register(contexts.clone() as Arc<dyn KernelService>)?;
        services.register(engine.clone() as Arc<dyn KernelService>)?;
        services.register(hierarchy.clone() as Arc<dyn KernelService>)?;
        services.initialize_all()?;

        let kernel = Arc::new(Self {
            id: NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed),
            diagnostics,
            event_bus,
            services,
            manifests,
            contexts,
            contributions,
            engine,
            hierarchy,
        });
        if let Some(parent) = options.parent {
            parent.add_hierarchy(&kernel);
        }
        info!(kernel = kernel.id, "kernel ready");
        Ok(kernel)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Fire an activation event; `context` feeds conditional `when` guards.
    pub async fn activate(
        &self,
        event: &str,
        context: Option<&Map<String, Value>>,
        repeat: bool,
    ) -> Result<(), KernelError> {
        self.engine.activate(event, context, repeat).await
    }

    pub fn deactivate(&self, event: &str) -> Result<(), KernelError> {
        self.engine.deactivate(event)
    }

    pub fn is_activated(&self, name: &str) -> bool {
        self.engine.is_activated(name)
    }

    /// Published API of an activated extension.
    pub fn get_extension(&self, name: &str) -> Option<ExtensionApi> {
        self.engine.api(name)
    }

    pub fn get_extension_context(&self, name: &str) -> Option<Arc<ActivationContext>> {
        self.contexts.peek(name)
    }

    /// Registry behind an implemented contribution keyword.
    pub fn get_keyword_impl(&self, keyword: &str) -> Option<Arc<KeywordRegistry>> {
        self.contributions.keyword_impl(keyword)
    }

    /// Admit manifests after construction. The batch is validated against
    /// the already accepted set; accepted names are announced on the bus.
    pub fn dynamic_add_manifests(
        &self,
        manifests: Vec<Manifest>,
    ) -> Result<Vec<String>, KernelError> {
        let names = self.manifests.admit(manifests)?;
        if !names.is_empty() {
            self.event_bus
                .emit(&KernelEvent::ManifestsAdded { names: names.clone() });
        }
        Ok(names)
    }

    pub fn manifest_names(&self) -> Vec<String> {
        self.manifests.names()
    }

    pub fn add_hierarchy(self: &Arc<Self>, child: &Arc<Kernel>) {
        child.hierarchy.set_parent(Some(Arc::downgrade(self)));
        self.hierarchy.add_child(child);
    }

    pub fn remove_hierarchy(&self, child: &Kernel) {
        child.hierarchy.set_parent(None);
        self.hierarchy.remove_child(child.id);
    }

    pub fn hierarchy(&self) -> &Arc<HierarchyManager> {
        &self.hierarchy
    }

    /// Info map resolved through the kernel hierarchy; local keys win.
    pub fn get_context_info(&self) -> Map<String, Value> {
        self.hierarchy.context_info()
    }

    pub fn set_context_info(&self, info: Map<String, Value>) {
        self.hierarchy.set_context_info(info);
    }

    pub fn subscribe(
        &self,
        observer: impl Fn(&KernelEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.event_bus.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.event_bus.unsubscribe(id)
    }

    /// Configuration errors collected so far (permissive mode).
    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.entries()
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Tear the kernel down: unlink from the hierarchy and dispose every
    /// service in reverse registration order.
    pub fn destroy(&self) {
        if let Some(parent) = self.hierarchy.parent() {
            parent.hierarchy.remove_child(self.id);
        }
        self.services.dispose_all();
        info!(kernel = self.id, "kernel destroyed");
    }
}

#[cfg(test)]
#[path = "kernel_tests.rs"]
mod tests;
