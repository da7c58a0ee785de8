//! Keyword implementation table and contribution routing.
//!
//! The [`ContributionManager`] holds at most one [`KeywordRegistry`] per
//! keyword and routes contribution batches from contributors to it. The
//! manifest registry and context manager are wired in after construction
//! because the three services reference each other.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use quilt_protocols::{
    ConfigError, ContributeMap, ContributionKeywordDefinition, ContributionPointMap, KernelError,
};
use tracing::debug;

use crate::container::{KernelService, ServiceId};
use crate::context::ContextManager;
use crate::diagnostics::Diagnostics;
use crate::events::{EventBus, KernelEvent};
use crate::registry::keyword::{KeywordHooks, KeywordRegistry};
use crate::registry::manifest::{AssertionOptions, ManifestRegistry};
use crate::traits::ContextValue;

pub struct ContributionManager {
    diagnostics: Arc<Diagnostics>,
    event_bus: Arc<EventBus>,
    options: AssertionOptions,
    manifests: OnceLock<Arc<ManifestRegistry>>,
    contexts: OnceLock<Arc<ContextManager>>,
    keywords: DashMap<String, Arc<KeywordRegistry>>,
}

impl ContributionManager {
    pub fn new(
        diagnostics: Arc<Diagnostics>,
        event_bus: Arc<EventBus>,
        options: AssertionOptions,
    ) -> Self {
        Self {
            diagnostics,
            event_bus,
            options,
            manifests: OnceLock::new(),
            contexts: OnceLock::new(),
            keywords: DashMap::new(),
        }
    }

    pub fn wire(&self, manifests: Arc<ManifestRegistry>, contexts: Arc<ContextManager>) {
        let _ = self.manifests.set(manifests);
        let _ = self.contexts.set(contexts);
    }

    fn manifests(&self) -> &Arc<ManifestRegistry> {
        self.manifests.get().expect("contribution manager not wired")
    }

    fn contexts(&self) -> &Arc<ContextManager> {
        self.contexts.get().expect("contribution manager not wired")
    }

    /// Install the runtime implementation for a keyword. A second
    /// implementation for the same keyword is a reported error.
    pub fn implement_keyword(
        &self,
        owner: &str,
        definition: &ContributionKeywordDefinition,
        hooks: Arc<dyn KeywordHooks>,
    ) -> Result<(), KernelError> {
        if self.keywords.contains_key(&definition.name) {
            return self
                .diagnostics
                .report(ConfigError::KeywordAlreadyImplemented(
                    definition.name.clone(),
                ));
        }
        self.keywords.insert(
            definition.name.clone(),
            Arc::new(KeywordRegistry::new(
                definition.clone(),
                owner,
                hooks,
                self.options.clone(),
                self.diagnostics.clone(),
            )),
        );
        debug!(keyword = %definition.name, owner, "keyword implemented");
        self.event_bus.emit(&KernelEvent::KeywordImplemented {
            extension: owner.to_string(),
            keyword: definition.name.clone(),
        });
        Ok(())
    }

    /// Remove a keyword implementation. Revoking an unimplemented keyword is
    /// a no-op.
    pub fn revoke_keyword(&self, keyword: &str) {
        if let Some((_, registry)) = self.keywords.remove(keyword) {
            registry.destroy();
            debug!(keyword, "keyword revoked");
            self.event_bus.emit(&KernelEvent::KeywordRevoked {
                keyword: keyword.to_string(),
            });
        }
    }

    pub fn keyword_impl(&self, keyword: &str) -> Option<Arc<KeywordRegistry>> {
        self.keywords.get(keyword).map(|entry| entry.value().clone())
    }

    pub fn implemented_keywords(&self) -> Vec<String> {
        self.keywords.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Context object the keyword implementation exposes to `contributor`.
    /// Asking for one from an unimplemented keyword is a reported error.
    pub fn keyword_context(
        &self,
        keyword: &str,
        contributor: &str,
    ) -> Result<Option<ContextValue>, KernelError> {
        match self.keyword_impl(keyword) {
            Some(registry) => Ok(registry.keyword_context(contributor)),
            None => {
                self.diagnostics
                    .report(ConfigError::KeywordNotImplemented(keyword.to_string()))?;
                Ok(None)
            }
        }
    }

    /// Push an extension's merged contribution points and contributions to
    /// the implementing keywords, points first so same-extension `cp`
    /// targets resolve.
    pub fn extension_pre_activate(&self, name: &str) -> Result<(), KernelError> {
        let points = self.manifests().merged_contribution_points(name);
        if !points.is_empty() {
            self.add_contribution_points(name, &points)?;
        }
        let contributes = self.manifests().merged_contributes(name);
        if !contributes.is_empty() {
            self.add_contributions(name, &contributes)?;
        }
        Ok(())
    }

    /// Withdraw everything the extension contributed, contributions first so
    /// points outlive their dependents.
    pub fn extension_deactivated(&self, name: &str) -> Result<(), KernelError> {
        let contributes = self.manifests().merged_contributes(name);
        if !contributes.is_empty() {
            self.remove_contributions(name, &contributes)?;
        }
        let points = self.manifests().merged_contribution_points(name);
        if !points.is_empty() {
            self.remove_contribution_points(name, &points)?;
        }
        Ok(())
    }

    pub fn add_contribution_points(
        &self,
        contributor: &str,
        additions: &ContributionPointMap,
    ) -> Result<(), KernelError> {
        for (keyword, defs) in additions {
            let Some(registry) = self.keyword_impl(keyword) else {
                self.diagnostics
                    .report(ConfigError::KeywordNotImplemented(keyword.clone()))?;
                continue;
            };
            let ctx = self
                .contexts()
                .request_contribution_context(contributor, keyword)?;
            registry.request_contribution_points(&ctx, defs)?;
        }
        self.event_bus.emit(&KernelEvent::ContributionPointsAdded {
            contributor: contributor.to_string(),
            contribution_points: additions.clone(),
        });
        Ok(())
    }

    pub fn add_contributions(
        &self,
        contributor: &str,
        additions: &ContributeMap,
    ) -> Result<(), KernelError> {
        for (keyword, defs) in additions {
            let Some(registry) = self.keyword_impl(keyword) else {
                self.diagnostics
                    .report(ConfigError::KeywordNotImplemented(keyword.clone()))?;
                continue;
            };
            let ctx = self
                .contexts()
                .request_contribution_context(contributor, keyword)?;
            registry.request_contributions(&ctx, defs)?;
        }
        self.event_bus.emit(&KernelEvent::ContributesAdded {
            contributor: contributor.to_string(),
            contributes: additions.clone(),
        });
        Ok(())
    }

    pub fn remove_contribution_points(
        &self,
        contributor: &str,
        removals: &ContributionPointMap,
    ) -> Result<(), KernelError> {
        for (keyword, defs) in removals {
            // Revoked keywords already dropped their entries.
            let Some(registry) = self.keyword_impl(keyword) else {
                continue;
            };
            let ctx = self
                .contexts()
                .request_contribution_context(contributor, keyword)?;
            registry.request_revoke_contribution_points(&ctx, defs)?;
        }
        self.event_bus.emit(&KernelEvent::ContributionPointsRemoved {
            contributor: contributor.to_string(),
            contribution_points: removals.clone(),
        });
        Ok(())
    }

    pub fn remove_contributions(
        &self,
        contributor: &str,
        removals: &ContributeMap,
    ) -> Result<(), KernelError> {
        for (keyword, defs) in removals {
            let Some(registry) = self.keyword_impl(keyword) else {
                continue;
            };
            let ctx = self
                .contexts()
                .request_contribution_context(contributor, keyword)?;
            registry.request_revoke_contributions(&ctx, defs)?;
        }
        self.event_bus.emit(&KernelEvent::ContributesRemoved {
            contributor: contributor.to_string(),
            contributes: removals.clone(),
        });
        Ok(())
    }
}

impl KernelService for ContributionManager {
    fn service_id(&self) -> ServiceId {
        ServiceId::Contributions
    }

    fn dispose(&self) {
        for entry in self.keywords.iter() {
            entry.value().destroy();
        }
        self.keywords.clear();
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
#[path = "contribution_tests.rs"]
mod tests;
