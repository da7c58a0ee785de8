//! Activation state machine.
//!
//! Drives extensions through their lifecycle in dependency waves. Members of
//! one wave activate concurrently; waves run in order. Deactivation replays
//! the waves backwards and only proceeds when the event sits on top of the
//! fired-event stack, so nested activations unwind in reverse order.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use futures::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use quilt_protocols::{ConfigError, KernelError, Manifest};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::container::{KernelService, ServiceId};
use crate::context::{ActivationStage, ContextManager};
use crate::diagnostics::Diagnostics;
use crate::events::{EventBus, KernelEvent};
use crate::expr::GuardCache;
use crate::loader::ExtensionLoader;
use crate::registry::contribution::ContributionManager;
use crate::registry::manifest::ManifestRegistry;
use crate::resolver::priority_sequence;
use crate::traits::{ContextValue, ExtensionApi, ExtensionImpl};

pub struct ActivationEngine {
    manifests: OnceLock<Arc<ManifestRegistry>>,
    contexts: OnceLock<Arc<ContextManager>>,
    contributions: OnceLock<Arc<ContributionManager>>,
    event_bus: Arc<EventBus>,
    loader: Arc<dyn ExtensionLoader>,
    diagnostics: Arc<Diagnostics>,
    guards: GuardCache,
    /// Loaded implementations survive deactivation so a reload skips the
    /// loader.
    impls: RwLock<HashMap<String, Arc<dyn ExtensionImpl>>>,
    apis: RwLock<HashMap<String, ExtensionApi>>,
    activated: RwLock<HashSet<String>>,
    fired_events: Mutex<Vec<String>>,
}

impl ActivationEngine {
    pub fn new(
        event_bus: Arc<EventBus>,
        loader: Arc<dyn ExtensionLoader>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            manifests: OnceLock::new(),
            contexts: OnceLock::new(),
            contributions: OnceLock::new(),
            event_bus,
            loader,
            diagnostics,
            guards: GuardCache::new(),
            impls: RwLock::new(HashMap::new()),
            apis: RwLock::new(HashMap::new()),
            activated: RwLock::new(HashSet::new()),
            fired_events: Mutex::new(Vec::new()),
        }
    }

    pub fn wire(
        &self,
        manifests: Arc<ManifestRegistry>,
        contexts: Arc<ContextManager>,
        contributions: Arc<ContributionManager>,
    ) {
        let _ = self.manifests.set(manifests);
        let _ = self.contexts.set(contexts);
        let _ = self.contributions.set(contributions);
    }

    fn manifests(&self) -> &Arc<ManifestRegistry> {
        self.manifests.get().expect("activation engine not wired")
    }

    fn contexts(&self) -> &Arc<ContextManager> {
        self.contexts.get().expect("activation engine not wired")
    }

    fn contributions(&self) -> &Arc<ContributionManager> {
        self.contributions.get().expect("activation engine not wired")
    }

    /// Fire an activation event. A repeated event is a no-op unless `repeat`
    /// is set; `context` feeds the `when` guards of conditional activations.
    pub async fn activate(
        &self,
        event: &str,
        context: Option<&Map<String, Value>>,
        repeat: bool,
    ) -> Result<(), KernelError> {
        if !self.manifests().is_event_defined(event) {
            self.diagnostics
                .report(ConfigError::UndeclaredEvent(event.to_string()))?;
            return Ok(());
        }
        {
            let mut fired = self.fired_events.lock();
            if !repeat {
                if fired.iter().any(|fired_event| fired_event == event) {
                    debug!(event, "activation event already fired");
                    return Ok(());
                }
                // A repeat fire leaves the stack alone so one deactivation
                // still unwinds the event.
                fired.push(event.to_string());
            }
        }

        let mut selected: Vec<Arc<Manifest>> = Vec::new();
        {
            let activated = self.activated.read();
            for (manifest, trigger) in self.manifests().should_activates(event) {
                if activated.contains(&manifest.name) {
                    continue;
                }
                match trigger.when() {
                    None => selected.push(manifest),
                    Some(expr) => match self.guards.evaluate(expr, context) {
                        Ok(true) => selected.push(manifest),
                        Ok(false) => {}
                        Err(err) => self.diagnostics.report(err)?,
                    },
                }
            }
        }
        if selected.is_empty() {
            return Ok(());
        }

        let seeds: Vec<String> = self.activated.read().iter().cloned().collect();
        let waves = priority_sequence(&selected, &seeds)?;
        debug!(event, waves = waves.len(), "activation waves resolved");

        let mut batch = Vec::new();
        for wave in waves {
            try_join_all(wave.iter().map(|name| self.activate_one(name))).await?;
            batch.extend(wave);
        }

        for name in batch {
            if let (Some(implementation), Some(ctx)) = (
                self.impls.read().get(&name).cloned(),
                self.contexts().peek(&name),
            ) {
                implementation.post_activated(&ctx);
            }
        }
        Ok(())
    }

    async fn activate_one(&self, name: &str) -> Result<(), KernelError> {
        if self.activated.read().contains(name) {
            return Ok(());
        }
        let manifest = self
            .manifests()
            .manifest(name)
            .ok_or_else(|| KernelError::ManifestNotFound(name.to_string()))?;

        let implementation = {
            let cached = self.impls.read().get(name).cloned();
            match cached {
                Some(implementation) => implementation,
                None => {
                    let loaded = self.loader.load(&manifest).await?;
                    self.impls
                        .write()
                        .insert(name.to_string(), loaded.clone());
                    loaded
                }
            }
        };

        let ctx = self.contexts().activation_context(name)?;
        ctx.set_stage(ActivationStage::BeforeActivate);
        self.event_bus.emit(&KernelEvent::BeforeActivate {
            extension: name.to_string(),
        });
        implementation
            .before_activate(&ctx)
            .map_err(|err| KernelError::activation(name, &err))?;

        // Keywords go in before the contribution merge so an extension can
        // contribute to its own keyword.
        for definition in &manifest.contribution_keywords {
            if self.contributions().keyword_impl(&definition.name).is_some() {
                continue;
            }
            if let Some(hooks) = implementation.contribution_keyword(definition, &ctx) {
                ctx.register_contribution_keyword(&definition.name, hooks)?;
                if definition.provide_context {
                    let alias = definition.context_name.as_deref().unwrap_or(&definition.name);
                    if !ctx.has_attachment(alias) {
                        if let Some(value) = self
                            .contributions()
                            .keyword_context(&definition.name, name)?
                        {
                            ctx.attach(alias, value)?;
                        }
                    }
                }
            }
        }
        self.contributions().extension_pre_activate(name)?;

        ctx.set_stage(ActivationStage::Activate);
        let api = implementation
            .activate(&ctx)
            .await
            .map_err(|err| KernelError::activation(name, &err))?;
        if let Some(api) = api {
            self.apis.write().insert(name.to_string(), api);
        }
        ctx.set_stage(ActivationStage::Active);
        self.activated.write().insert(name.to_string());
        self.event_bus.emit(&KernelEvent::Activated {
            extension: name.to_string(),
        });
        info!(extension = name, "extension activated");
        Ok(())
    }

    /// Fire a deactivation event. Only proceeds when the event is the most
    /// recently fired activation event; anything else is a no-op.
    pub fn deactivate(&self, event: &str) -> Result<(), KernelError> {
        if !self.manifests().is_event_defined(event) {
            self.diagnostics
                .report(ConfigError::UndeclaredEvent(event.to_string()))?;
            return Ok(());
        }
        {
            let mut fired = self.fired_events.lock();
            match fired.last() {
                Some(top) if top == event => {}
                _ => {
                    debug!(event, "deactivation ignored, event is not on top of the stack");
                    return Ok(());
                }
            }
            fired.retain(|fired_event| fired_event != event);
        }

        let selected: Vec<Arc<Manifest>> = {
            let activated = self.activated.read();
            self.manifests()
                .should_deactivates(event)
                .into_iter()
                .filter(|manifest| activated.contains(&manifest.name))
                .collect()
        };
        if selected.is_empty() {
            return Ok(());
        }
        let members: HashSet<String> = selected.iter().map(|m| m.name.clone()).collect();

        let seeds: Vec<String> = self.activated.read().iter().cloned().collect();
        let waves = priority_sequence(&selected, &seeds)?;

        for wave in waves.iter().rev() {
            for name in wave.iter().rev() {
                if members.contains(name) {
                    self.deactivate_one(name);
                }
            }
        }
        Ok(())
    }

    fn deactivate_one(&self, name: &str) {
        if !self.activated.read().contains(name) {
            return;
        }
        self.event_bus.emit(&KernelEvent::BeforeDeactivate {
            extension: name.to_string(),
        });
        if let (Some(implementation), Some(ctx)) = (
            self.impls.read().get(name).cloned(),
            self.contexts().peek(name),
        ) {
            implementation.deactivate(&ctx);
        }
        self.apis.write().remove(name);
        if let Err(err) = self.contributions().extension_deactivated(name) {
            debug!(extension = name, error = %err, "contribution teardown reported");
        }
        // Observers hear about the deactivation while the context is still
        // alive; destruction follows.
        self.event_bus.emit(&KernelEvent::Deactivated {
            extension: name.to_string(),
        });
        self.contexts().destroy_activation_context(name);
        self.activated.write().remove(name);
        info!(extension = name, "extension deactivated");
    }

    /// Published API of an activated extension.
    pub fn api(&self, name: &str) -> Option<ExtensionApi> {
        self.apis.read().get(name).cloned()
    }

    pub fn is_activated(&self, name: &str) -> bool {
        self.activated.read().contains(name)
    }

    pub fn activated_names(&self) -> Vec<String> {
        self.activated.read().iter().cloned().collect()
    }

    /// Context object `provider` exposes to `contributor`, if the provider
    /// is active and supplies one.
    pub fn provided_context(&self, provider: &str, contributor: &str) -> Option<ContextValue> {
        let implementation = self.impls.read().get(provider).cloned()?;
        let ctx = self.contexts().peek(provider)?;
        implementation.provide_context(contributor, &ctx)
    }
}

impl KernelService for ActivationEngine {
    fn service_id(&self) -> ServiceId {
        ServiceId::Engine
    }

    fn dispose(&self) {
        self.apis.write().clear();
        self.activated.write().clear();
        self.fired_events.lock().clear();
        self.impls.write().clear();
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
