//! Per-extension interaction surfaces.
//!
//! Each extension gets one [`ActivationContext`], built lazily on first
//! access and cached until deactivation. Contexts and keyword surfaces
//! exposed by declared dependencies are merged in as read-only attachments;
//! the first writer wins and a duplicate alias is a reported error.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use quilt_protocols::{
    ConfigError, ContributeMap, ContributionPointMap, KernelError, Manifest,
};
use tracing::debug;

use crate::container::{KernelService, ServiceId};
use crate::diagnostics::Diagnostics;
use crate::engine::ActivationEngine;
use crate::registry::contribution::ContributionManager;
use crate::registry::keyword::{KeywordHooks, KeywordRegistry};
use crate::registry::manifest::ManifestRegistry;
use crate::traits::{ContextValue, Disposer, ExtensionApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationStage {
    /// Contribution merge has not happened yet; dynamic additions made now
    /// are picked up by the merge instead of being broadcast.
    BeforeActivate,
    Activate,
    Active,
}

/// Revocable handle for a keyword implementation registered through an
/// activation context. Revocation is idempotent; the context also enrolls a
/// disposer so an unrevoked registration is cleaned up on deactivation.
#[derive(Clone, Debug)]
pub struct KeywordRegistration {
    manager: Weak<ContributionManager>,
    keyword: String,
}

impl KeywordRegistration {
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn revoke(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.revoke_keyword(&self.keyword);
        }
    }
}

pub struct ActivationContext {
    manifest: Arc<Manifest>,
    stage: RwLock<ActivationStage>,
    attachments: RwLock<HashMap<String, ContextValue>>,
    disposers: Mutex<Vec<Disposer>>,
    manifests: Arc<ManifestRegistry>,
    contributions: Arc<ContributionManager>,
    engine: Weak<ActivationEngine>,
    diagnostics: Arc<Diagnostics>,
}

impl std::fmt::Debug for ActivationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationContext")
            .field("extension", &self.manifest.name)
            .field("stage", &*self.stage.read())
            .finish_non_exhaustive()
    }
}

impl ActivationContext {
    pub fn extension_name(&self) -> &str {
        &self.manifest.name
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    pub fn stage(&self) -> ActivationStage {
        *self.stage.read()
    }

    pub(crate) fn set_stage(&self, stage: ActivationStage) {
        *self.stage.write() = stage;
    }

    /// First writer wins; a duplicate alias is reported and the original
    /// attachment kept.
    pub(crate) fn attach(&self, alias: &str, value: ContextValue) -> Result<(), KernelError> {
        let mut attachments = self.attachments.write();
        if attachments.contains_key(alias) {
            drop(attachments);
            return self.diagnostics.report(ConfigError::ContextNameConflict {
                extension: self.manifest.name.clone(),
                name: alias.to_string(),
            });
        }
        attachments.insert(alias.to_string(), value);
        Ok(())
    }

    pub fn has_attachment(&self, alias: &str) -> bool {
        self.attachments.read().contains_key(alias)
    }

    pub fn attachment_value(&self, alias: &str) -> Option<ContextValue> {
        self.attachments.read().get(alias).cloned()
    }

    /// Typed attachment lookup.
    pub fn attachment<T: Send + Sync + 'static>(&self, alias: &str) -> Option<Arc<T>> {
        self.attachment_value(alias)
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// API of a declared dependency. Accessing an undeclared extension is a
    /// reported error.
    pub fn get_extension(&self, name: &str) -> Result<Option<ExtensionApi>, KernelError> {
        if !self.manifest.declares_dependency(name) {
            self.diagnostics
                .report(ConfigError::UndeclaredDependencyAccess {
                    extension: self.manifest.name.clone(),
                    dependency: name.to_string(),
                })?;
            return Ok(None);
        }
        Ok(self.engine.upgrade().and_then(|engine| engine.api(name)))
    }

    /// Register the runtime implementation for a keyword this extension
    /// declares. The registration is also revoked automatically on
    /// deactivation.
    pub fn register_contribution_keyword(
        &self,
        keyword: &str,
        hooks: Arc<dyn KeywordHooks>,
    ) -> Result<KeywordRegistration, KernelError> {
        let registration = KeywordRegistration {
            manager: Arc::downgrade(&self.contributions),
            keyword: keyword.to_string(),
        };
        let Some(definition) = self.manifest.keyword(keyword) else {
            self.diagnostics
                .report(ConfigError::UndeclaredKeywordRegistration {
                    extension: self.manifest.name.clone(),
                    keyword: keyword.to_string(),
                })?;
            return Ok(registration);
        };
        self.contributions
            .implement_keyword(&self.manifest.name, definition, hooks)?;
        let cleanup = registration.clone();
        self.add_disposer(Box::new(move || cleanup.revoke()));
        Ok(registration)
    }

    /// Implementation of a keyword this extension declares.
    pub fn get_contribution_keyword_impl(
        &self,
        keyword: &str,
    ) -> Result<Option<Arc<KeywordRegistry>>, KernelError> {
        if self.manifest.keyword(keyword).is_none() {
            self.diagnostics
                .report(ConfigError::UndeclaredKeywordRegistration {
                    extension: self.manifest.name.clone(),
                    keyword: keyword.to_string(),
                })?;
            return Ok(None);
        }
        Ok(self.contributions.keyword_impl(keyword))
    }

    pub fn add_disposer(&self, disposer: Disposer) {
        self.disposers.lock().push(disposer);
    }

    /// Add contributions at runtime. They are re-validated, merged into the
    /// overlay, and broadcast immediately unless still before activation.
    pub fn add_contributes(&self, additions: ContributeMap) -> Result<(), KernelError> {
        let errors = self
            .manifests
            .validate_dynamic_contributes(&self.manifest, &additions);
        if !errors.is_empty() {
            for err in errors {
                self.diagnostics.report(err)?;
            }
            return Ok(());
        }
        self.manifests
            .add_dynamic_contributes(&self.manifest.name, &additions);
        if self.stage() != ActivationStage::BeforeActivate {
            self.contributions
                .add_contributions(&self.manifest.name, &additions)?;
        }
        Ok(())
    }

    pub fn add_contribution_points(
        &self,
        additions: ContributionPointMap,
    ) -> Result<(), KernelError> {
        let errors = self
            .manifests
            .validate_dynamic_contribution_points(&self.manifest, &additions);
        if !errors.is_empty() {
            for err in errors {
                self.diagnostics.report(err)?;
            }
            return Ok(());
        }
        self.manifests
            .add_dynamic_contribution_points(&self.manifest.name, &additions);
        if self.stage() != ActivationStage::BeforeActivate {
            self.contributions
                .add_contribution_points(&self.manifest.name, &additions)?;
        }
        Ok(())
    }

    /// Remove dynamically added contributions by name.
    pub fn remove_contributes(&self, keyword: &str, names: &[String]) -> Result<(), KernelError> {
        let removed = self
            .manifests
            .remove_dynamic_contributes(&self.manifest.name, keyword, names);
        if removed.is_empty() {
            return Ok(());
        }
        if self.stage() != ActivationStage::BeforeActivate {
            let mut map = ContributeMap::new();
            map.insert(keyword.to_string(), removed);
            self.contributions
                .remove_contributions(&self.manifest.name, &map)?;
        }
        Ok(())
    }

    pub fn remove_contribution_points(
        &self,
        keyword: &str,
        names: &[String],
    ) -> Result<(), KernelError> {
        let removed = self
            .manifests
            .remove_dynamic_contribution_points(&self.manifest.name, keyword, names);
        if removed.is_empty() {
            return Ok(());
        }
        if self.stage() != ActivationStage::BeforeActivate {
            let mut map = ContributionPointMap::new();
            map.insert(keyword.to_string(), removed);
            self.contributions
                .remove_contribution_points(&self.manifest.name, &map)?;
        }
        Ok(())
    }

    /// Disposers run once, in registration order.
    pub(crate) fn run_disposers(&self) {
        let disposers: Vec<Disposer> = {
            let mut guard = self.disposers.lock();
            guard.drain(..).collect()
        };
        for disposer in disposers {
            disposer();
        }
    }
}

/// Context handed to keyword implementations when contributions flow in.
/// Exposes only the contributor's identity and declared dependencies.
pub struct RequestContributionContext {
    contributor: String,
    keyword: String,
    dependencies: Vec<String>,
}

impl RequestContributionContext {
    pub fn new(
        contributor: impl Into<String>,
        keyword: impl Into<String>,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            contributor: contributor.into(),
            keyword: keyword.into(),
            dependencies,
        }
    }

    pub fn contributor(&self) -> &str {
        &self.contributor
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

pub struct ContextManager {
    diagnostics: Arc<Diagnostics>,
    manifests: OnceLock<Arc<ManifestRegistry>>,
    contributions: OnceLock<Arc<ContributionManager>>,
    engine: OnceLock<Arc<ActivationEngine>>,
    pool: Mutex<HashMap<String, Arc<ActivationContext>>>,
    request_pool: Mutex<HashMap<(String, String), Arc<RequestContributionContext>>>,
}

impl ContextManager {
    pub fn new(diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            diagnostics,
            manifests: OnceLock::new(),
            contributions: OnceLock::new(),
            engine: OnceLock::new(),
            pool: Mutex::new(HashMap::new()),
            request_pool: Mutex::new(HashMap::new()),
        }
    }

    pub fn wire(&self, manifests: Arc<ManifestRegistry>, contributions: Arc<ContributionManager>) {
        let _ = self.manifests.set(manifests);
        let _ = self.contributions.set(contributions);
    }

    /// Wired separately; the engine is constructed after the managers it
    /// depends on.
    pub fn wire_engine(&self, engine: Arc<ActivationEngine>) {
        let _ = self.engine.set(engine);
    }

    fn manifests(&self) -> &Arc<ManifestRegistry> {
        self.manifests.get().expect("context manager not wired")
    }

    fn contributions(&self) -> &Arc<ContributionManager> {
        self.contributions.get().expect("context manager not wired")
    }

    /// Cached context for an extension, built on first access.
    pub fn activation_context(&self, name: &str) -> Result<Arc<ActivationContext>, KernelError> {
        if let Some(ctx) = self.pool.lock().get(name) {
            return Ok(ctx.clone());
        }

        let manifest = self
            .manifests()
            .manifest(name)
            .ok_or_else(|| KernelError::ManifestNotFound(name.to_string()))?;

        let engine = match self.engine.get() {
            Some(engine) => Arc::downgrade(engine),
            None => Weak::new(),
        };
        let ctx = Arc::new(ActivationContext {
            manifest: manifest.clone(),
            stage: RwLock::new(ActivationStage::BeforeActivate),
            attachments: RwLock::new(HashMap::new()),
            disposers: Mutex::new(Vec::new()),
            manifests: self.manifests().clone(),
            contributions: self.contributions().clone(),
            engine,
            diagnostics: self.diagnostics.clone(),
        });
        self.attach_dependency_surfaces(&ctx, &manifest)?;

        let mut pool = self.pool.lock();
        if let Some(existing) = pool.get(name) {
            return Ok(existing.clone());
        }
        pool.insert(name.to_string(), ctx.clone());
        Ok(ctx)
    }

    /// Merge in what declared dependencies expose: their provided context
    /// under the manifest's alias, and keyword surfaces under each keyword's
    /// context alias.
    fn attach_dependency_surfaces(
        &self,
        ctx: &Arc<ActivationContext>,
        manifest: &Manifest,
    ) -> Result<(), KernelError> {
        for dep_name in manifest.dependencies.keys() {
            let Some(dep) = self.manifests().manifest(dep_name) else {
                continue;
            };
            if dep.provide_context {
                match &dep.context_name {
                    None => {
                        self.diagnostics
                            .report(ConfigError::MissingContextName(dep.name.clone()))?;
                    }
                    Some(alias) => {
                        if let Some(engine) = self.engine.get() {
                            if let Some(value) = engine.provided_context(&dep.name, &manifest.name)
                            {
                                ctx.attach(alias, value)?;
                            }
                        }
                    }
                }
            }
            for def in &dep.contribution_keywords {
                if !def.provide_context {
                    continue;
                }
                let alias = def.context_name.as_deref().unwrap_or(&def.name);
                if ctx.has_attachment(alias) {
                    continue;
                }
                if let Some(value) = self
                    .contributions()
                    .keyword_context(&def.name, &manifest.name)?
                {
                    ctx.attach(alias, value)?;
                }
            }
        }
        Ok(())
    }

    /// Context without building it.
    pub fn peek(&self, name: &str) -> Option<Arc<ActivationContext>> {
        self.pool.lock().get(name).cloned()
    }

    pub fn destroy_activation_context(&self, name: &str) {
        if let Some(ctx) = self.pool.lock().remove(name) {
            ctx.run_disposers();
            debug!(extension = name, "activation context destroyed");
        }
        self.request_pool
            .lock()
            .retain(|(contributor, _), _| contributor != name);
    }

    /// Cached per `(contributor, keyword)` pair.
    pub fn request_contribution_context(
        &self,
        contributor: &str,
        keyword: &str,
    ) -> Result<Arc<RequestContributionContext>, KernelError> {
        let key = (contributor.to_string(), keyword.to_string());
        if let Some(ctx) = self.request_pool.lock().get(&key) {
            return Ok(ctx.clone());
        }
        let manifest = self
            .manifests()
            .manifest(contributor)
            .ok_or_else(|| KernelError::ManifestNotFound(contributor.to_string()))?;
        let ctx = Arc::new(RequestContributionContext::new(
            contributor,
            keyword,
            manifest.dependencies.keys().cloned().collect(),
        ));
        self.request_pool.lock().insert(key, ctx.clone());
        Ok(ctx)
    }
}

impl KernelService for ContextManager {
    fn service_id(&self) -> ServiceId {
        ServiceId::Contexts
    }

    fn dispose(&self) {
        let contexts: Vec<Arc<ActivationContext>> =
            self.pool.lock().drain().map(|(_, ctx)| ctx).collect();
        for ctx in contexts {
            ctx.run_disposers();
        }
        self.request_pool.lock().clear();
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
