//! Per-keyword contribution registry.
//!
//! One [`KeywordRegistry`] exists per implemented keyword. It accepts
//! contribution points and contributions per contributor, resolves `cp`
//! targets (including `:`-separated dynamic sub-paths), and exposes the
//! query surface. Keyword-specific behavior plugs in through
//! [`KeywordHooks`].

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use quilt_protocols::{
    ConfigError, ContributeDefinition, ContributionKeywordDefinition,
    ContributionPointDefinition, DYNAMIC_SPLITTER, KernelError,
};
use tracing::debug;

use crate::context::RequestContributionContext;
use crate::diagnostics::Diagnostics;
use crate::registry::manifest::AssertionOptions;
use crate::traits::ContextValue;

/// Specialization seam for a keyword implementation. All hooks default to
/// pass-through; a `before_*` hook returning `false` skips the batch without
/// reporting an error.
pub trait KeywordHooks: Send + Sync {
    fn before_request_contribution_points(
        &self,
        _ctx: &RequestContributionContext,
        _defs: &[ContributionPointDefinition],
    ) -> bool {
        true
    }

    fn after_request_contribution_points(
        &self,
        _ctx: &RequestContributionContext,
        _defs: &[ContributionPointDefinition],
    ) {
    }

    fn before_revoke_contribution_points(
        &self,
        _ctx: &RequestContributionContext,
        _defs: &[ContributionPointDefinition],
    ) -> bool {
        true
    }

    fn after_revoke_contribution_points(
        &self,
        _ctx: &RequestContributionContext,
        _defs: &[ContributionPointDefinition],
    ) {
    }

    fn before_request_contributions(
        &self,
        _ctx: &RequestContributionContext,
        _defs: &[ContributeDefinition],
    ) -> bool {
        true
    }

    fn after_request_contributions(
        &self,
        _ctx: &RequestContributionContext,
        _defs: &[ContributeDefinition],
    ) {
    }

    fn before_revoke_contributions(
        &self,
        _ctx: &RequestContributionContext,
        _defs: &[ContributeDefinition],
    ) -> bool {
        true
    }

    fn after_revoke_contributions(
        &self,
        _ctx: &RequestContributionContext,
        _defs: &[ContributeDefinition],
    ) {
    }

    /// Context object contributors see when the keyword definition sets
    /// `provideContext`.
    fn keyword_context(&self, _contributor: &str) -> Option<ContextValue> {
        None
    }

    /// Runs once when the keyword implementation is revoked.
    fn destroy(&self) {}
}

/// Hook set with every default, for keywords that only need bookkeeping.
pub struct NoHooks;

impl KeywordHooks for NoHooks {}

pub struct KeywordRegistry {
    definition: ContributionKeywordDefinition,
    owner: String,
    hooks: Arc<dyn KeywordHooks>,
    options: AssertionOptions,
    diagnostics: Arc<Diagnostics>,
    contribution_points: RwLock<BTreeMap<String, Vec<ContributionPointDefinition>>>,
    contributions: RwLock<BTreeMap<String, Vec<ContributeDefinition>>>,
}

impl KeywordRegistry {
    pub fn new(
        definition: ContributionKeywordDefinition,
        owner: impl Into<String>,
        hooks: Arc<dyn KeywordHooks>,
        options: AssertionOptions,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            definition,
            owner: owner.into(),
            hooks,
            options,
            diagnostics,
            contribution_points: RwLock::new(BTreeMap::new()),
            contributions: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn definition(&self) -> &ContributionKeywordDefinition {
        &self.definition
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn keyword_context(&self, contributor: &str) -> Option<ContextValue> {
        self.hooks.keyword_context(contributor)
    }

    /// Register contribution points for one contributor. Any invalid entry
    /// invalidates the whole batch; nothing is registered. Contributors on
    /// the ignore list skip the checks and the `before_*` hook.
    pub fn request_contribution_points(
        &self,
        ctx: &RequestContributionContext,
        defs: &[ContributionPointDefinition],
    ) -> Result<(), KernelError> {
        if self.need_check_contribution_point(ctx.contributor()) {
            let mut errors = Vec::new();
            for def in defs {
                if def.support_dynamics && !self.definition.support_dynamics {
                    errors.push(ConfigError::DynamicsNotSupported {
                        keyword: self.definition.name.clone(),
                        name: def.name.clone(),
                    });
                }
            }
            if !errors.is_empty() {
                for err in errors {
                    self.diagnostics.report(err)?;
                }
                return Ok(());
            }

            if !self.hooks.before_request_contribution_points(ctx, defs) {
                return Ok(());
            }
        }
        self.contribution_points
            .write()
            .entry(ctx.contributor().to_string())
            .or_default()
            .extend(defs.iter().cloned());
        self.hooks.after_request_contribution_points(ctx, defs);
        debug!(
            keyword = %self.definition.name,
            contributor = ctx.contributor(),
            count = defs.len(),
            "contribution points registered"
        );
        Ok(())
    }

    pub fn request_revoke_contribution_points(
        &self,
        ctx: &RequestContributionContext,
        defs: &[ContributionPointDefinition],
    ) -> Result<(), KernelError> {
        if !self.hooks.before_revoke_contribution_points(ctx, defs) {
            return Ok(());
        }
        if let Some(entries) = self
            .contribution_points
            .write()
            .get_mut(ctx.contributor())
        {
            entries.retain(|entry| !defs.iter().any(|def| def.name == entry.name));
        }
        self.hooks.after_revoke_contribution_points(ctx, defs);
        Ok(())
    }

    /// Register contributions for one contributor. Each entry's `cp` target
    /// must resolve among all contributors' points; dynamic sub-paths need
    /// dynamics support on both the keyword and the resolved point. Any
    /// violation invalidates the whole batch. Contributors on the ignore
    /// list skip the checks and the `before_*` hook.
    pub fn request_contributions(
        &self,
        ctx: &RequestContributionContext,
        defs: &[ContributeDefinition],
    ) -> Result<(), KernelError> {
        if self.need_check_contribute(ctx.contributor()) {
            let mut errors = Vec::new();
            for def in defs {
                if def.support_dynamics && !self.definition.support_dynamics {
                    errors.push(ConfigError::DynamicsNotSupported {
                        keyword: self.definition.name.clone(),
                        name: def.name.clone(),
                    });
                }
                if self.definition.support_contribution_point {
                    match def.cp.as_deref() {
                        None => errors.push(ConfigError::MissingContributionPoint {
                            keyword: self.definition.name.clone(),
                            name: def.name.clone(),
                        }),
                        Some(cp) => self.check_cp_target(def, cp, &mut errors),
                    }
                }
            }
            if !errors.is_empty() {
                for err in errors {
                    self.diagnostics.report(err)?;
                }
                return Ok(());
            }

            if !self.hooks.before_request_contributions(ctx, defs) {
                return Ok(());
            }
        }
        self.contributions
            .write()
            .entry(ctx.contributor().to_string())
            .or_default()
            .extend(defs.iter().cloned());
        self.hooks.after_request_contributions(ctx, defs);
        debug!(
            keyword = %self.definition.name,
            contributor = ctx.contributor(),
            count = defs.len(),
            "contributions registered"
        );
        Ok(())
    }

    pub fn request_revoke_contributions(
        &self,
        ctx: &RequestContributionContext,
        defs: &[ContributeDefinition],
    ) -> Result<(), KernelError> {
        if !self.hooks.before_revoke_contributions(ctx, defs) {
            return Ok(());
        }
        if let Some(entries) = self.contributions.write().get_mut(ctx.contributor()) {
            entries.retain(|entry| !defs.iter().any(|def| def.name == entry.name));
        }
        self.hooks.after_revoke_contributions(ctx, defs);
        Ok(())
    }

    fn check_cp_target(&self, def: &ContributeDefinition, cp: &str, errors: &mut Vec<ConfigError>) {
        let (static_part, dynamic_part) = match cp.split_once(DYNAMIC_SPLITTER) {
            Some((static_part, dynamic_part)) => (static_part, Some(dynamic_part)),
            None => (cp, None),
        };

        let Some((_, point)) = self.find_contribution_point_definition(static_part) else {
            errors.push(ConfigError::UnresolvedContributionPoint {
                keyword: self.definition.name.clone(),
                name: def.name.clone(),
                cp: cp.to_string(),
            });
            return;
        };

        if dynamic_part.is_some() {
            if !self.definition.support_dynamics {
                errors.push(ConfigError::DynamicsNotSupported {
                    keyword: self.definition.name.clone(),
                    name: def.name.clone(),
                });
            } else if !point.support_dynamics {
                errors.push(ConfigError::DynamicSubPathNotSupported {
                    keyword: self.definition.name.clone(),
                    cp: static_part.to_string(),
                });
            }
        }
    }

    fn need_check_contribute(&self, contributor: &str) -> bool {
        !self
            .options
            .ignore_contributes_check_manifests
            .iter()
            .any(|name| name == contributor)
    }

    fn need_check_contribution_point(&self, contributor: &str) -> bool {
        !self
            .options
            .ignore_contribution_point_check_manifests
            .iter()
            .any(|name| name == contributor)
    }

    /// Whether any contributor registered a point with this name.
    pub fn is_contribution_point_exist(&self, name: &str) -> bool {
        self.find_contribution_point_definition(name).is_some()
    }

    /// Whether any contributor registered a contribution with this name.
    pub fn is_contribute_exist(&self, name: &str) -> bool {
        self.find_contribute_owner(name).is_some()
    }

    /// Whether `contributor` itself registered the contribution. Keywords on
    /// the skip list and exempted contributors always pass.
    pub fn is_contribute_valid(&self, contributor: &str, name: &str) -> bool {
        if !self.need_check_contribute(contributor) {
            return true;
        }
        if self
            .options
            .skip_contribute_check_keywords
            .iter()
            .any(|keyword| keyword == &self.definition.name)
        {
            return true;
        }
        self.contributions
            .read()
            .get(contributor)
            .is_some_and(|entries| entries.iter().any(|entry| entry.name == name))
    }

    pub fn is_contribution_point_valid(&self, contributor: &str, name: &str) -> bool {
        if !self.need_check_contribution_point(contributor) {
            return true;
        }
        if self
            .options
            .skip_contribute_check_keywords
            .iter()
            .any(|keyword| keyword == &self.definition.name)
        {
            return true;
        }
        self.contribution_points
            .read()
            .get(contributor)
            .is_some_and(|entries| entries.iter().any(|entry| entry.name == name))
    }

    /// Strip a dynamic sub-path down to the resolvable static point name.
    pub fn resolve_contribution_point_name(&self, cp: &str) -> Option<String> {
        let static_part = cp.split_once(DYNAMIC_SPLITTER).map_or(cp, |(s, _)| s);
        self.find_contribution_point_definition(static_part)
            .map(|(_, def)| def.name)
    }

    /// Find a point by name across all contributors, returning the
    /// contributor that registered it.
    pub fn find_contribution_point_definition(
        &self,
        name: &str,
    ) -> Option<(String, ContributionPointDefinition)> {
        let points = self.contribution_points.read();
        for (contributor, entries) in points.iter() {
            if let Some(def) = entries.iter().find(|def| def.name == name) {
                return Some((contributor.clone(), def.clone()));
            }
        }
        None
    }

    pub fn find_contribute(&self, contributor: &str, name: &str) -> Option<ContributeDefinition> {
        self.contributions
            .read()
            .get(contributor)
            .and_then(|entries| entries.iter().find(|def| def.name == name).cloned())
    }

    fn find_contribute_owner(&self, name: &str) -> Option<String> {
        let contributions = self.contributions.read();
        for (contributor, entries) in contributions.iter() {
            if entries.iter().any(|def| def.name == name) {
                return Some(contributor.clone());
            }
        }
        None
    }

    pub fn contributions_of(&self, contributor: &str) -> Vec<ContributeDefinition> {
        self.contributions
            .read()
            .get(contributor)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contribution_points_of(&self, contributor: &str) -> Vec<ContributionPointDefinition> {
        self.contribution_points
            .read()
            .get(contributor)
            .cloned()
            .unwrap_or_default()
    }

    /// Revoke the implementation: run the destructor and clear all state.
    pub fn destroy(&self) {
        self.hooks.destroy();
        self.contribution_points.write().clear();
        self.contributions.write().clear();
    }
}

#[cfg(test)]
#[path = "keyword_tests.rs"]
mod tests;
