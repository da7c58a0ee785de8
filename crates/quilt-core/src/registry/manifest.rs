//! Manifest registry: validated manifest set, lookup indices, auto-replenish
//! synthesis, and the dynamic overlay.
//!
//! Manifests are immutable once accepted. Everything added at runtime, both
//! auto-replenish synthesis and dynamic contributions from activation
//! contexts, lives in a per-extension [`Overlay`] merged with the static
//! declarations at the point of use.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use quilt_protocols::{
    ActivationEvent, ActivationEventDefinition, ConfigError, ContributeDefinition, ContributeMap,
    ContributionKeywordDefinition, ContributionPointDefinition, ContributionPointMap, KernelError,
    Manifest, merge_definitions, substitute_name,
};
use tracing::{debug, info};

use crate::container::{KernelService, ServiceId};
use crate::diagnostics::Diagnostics;

/// Escape hatches for the naming checks, listing manifests or keywords that
/// predate the rules.
#[derive(Debug, Clone, Default)]
pub struct AssertionOptions {
    /// Manifests whose contribution entries skip the namespace-prefix rule.
    pub ignore_contributes_namespace_manifests: Vec<String>,
    /// Manifests whose keyword declarations skip the prefix rule.
    pub ignore_keyword_namespace_manifests: Vec<String>,
    /// Keywords whose contribution-validity queries always pass.
    pub skip_contribute_check_keywords: Vec<String>,
    /// Contributors whose contribution batches bypass the registration
    /// checks entirely.
    pub ignore_contributes_check_manifests: Vec<String>,
    /// Contributors whose contribution-point batches bypass the registration
    /// checks entirely.
    pub ignore_contribution_point_check_manifests: Vec<String>,
}

/// Runtime additions for one extension, keyed separately from its manifest.
#[derive(Debug, Clone, Default)]
pub struct Overlay {
    pub contributes: ContributeMap,
    pub contribution_points: ContributionPointMap,
}

#[derive(Default)]
struct Inner {
    manifests: Vec<Arc<Manifest>>,
    by_name: HashMap<String, Arc<Manifest>>,
    by_activation: HashMap<String, Vec<(Arc<Manifest>, ActivationEvent)>>,
    by_deactivation: HashMap<String, Vec<Arc<Manifest>>>,
    overlays: HashMap<String, Overlay>,
}

pub struct ManifestRegistry {
    diagnostics: Arc<Diagnostics>,
    options: AssertionOptions,
    event_definitions: Vec<ActivationEventDefinition>,
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for ManifestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestRegistry").finish_non_exhaustive()
    }
}

impl ManifestRegistry {
    pub fn new(
        manifests: Vec<Manifest>,
        event_definitions: Vec<ActivationEventDefinition>,
        options: AssertionOptions,
        diagnostics: Arc<Diagnostics>,
    ) -> Result<Arc<Self>, KernelError> {
        let registry = Arc::new(Self {
            diagnostics,
            options,
            event_definitions,
            inner: RwLock::new(Inner::default()),
        });
        registry.validate_event_definitions()?;
        registry.admit(manifests)?;
        Ok(registry)
    }

    /// The event-definition set is checked before any index exists: it must
    /// be non-empty and contain at most one root event.
    fn validate_event_definitions(&self) -> Result<(), KernelError> {
        if self.event_definitions.is_empty() {
            return self.diagnostics.report(ConfigError::NoEventDefinitions);
        }
        let roots: Vec<&str> = self
            .event_definitions
            .iter()
            .filter(|def| def.is_root())
            .map(|def| def.name.as_str())
            .collect();
        if roots.len() > 1 {
            return self
                .diagnostics
                .report(ConfigError::MultipleRootEvents(roots.join(", ")));
        }
        Ok(())
    }

    /// Validate and accept a batch of manifests. The initial set and dynamic
    /// additions share this path; in strict mode any violation surfaces
    /// before anything is merged, so there is no partial acceptance.
    pub fn admit(&self, incoming: Vec<Manifest>) -> Result<Vec<String>, KernelError> {
        let incoming: Vec<Arc<Manifest>> = incoming.into_iter().map(Arc::new).collect();

        let existing: Vec<Arc<Manifest>> = self.inner.read().manifests.clone();
        let accepted: HashSet<String> = existing.iter().map(|m| m.name.clone()).collect();

        let mut all: Vec<Arc<Manifest>> = existing;
        all.extend(incoming.iter().cloned());

        let assertion = ManifestAssertion {
            manifests: &all,
            event_definitions: &self.event_definitions,
            options: &self.options,
        };
        for err in assertion.validate(&accepted) {
            self.diagnostics.report(err)?;
        }

        let replenished = self.synthesize_auto_replenish(&incoming, &all);

        let mut inner = self.inner.write();
        for manifest in &incoming {
            inner.manifests.push(manifest.clone());
            inner
                .by_name
                .insert(manifest.name.clone(), manifest.clone());
            for event in &manifest.activation_events {
                inner
                    .by_activation
                    .entry(event.name().to_string())
                    .or_default()
                    .push((manifest.clone(), event.clone()));
            }
            for event in &manifest.deactivation_events {
                inner
                    .by_deactivation
                    .entry(event.clone())
                    .or_default()
                    .push(manifest.clone());
            }
        }
        for (owner, overlay) in replenished {
            let entry = inner.overlays.entry(owner).or_default();
            merge_definitions(&mut entry.contributes, &overlay.contributes);
            merge_definitions(&mut entry.contribution_points, &overlay.contribution_points);
        }

        let names: Vec<String> = incoming.iter().map(|m| m.name.clone()).collect();
        debug!(count = names.len(), "manifests admitted");
        Ok(names)
    }

    /// Expand auto-replenish templates for the incoming manifests' entries.
    /// Keyword definitions from the full set apply, so a new contributor to
    /// an established keyword gains its satellite declarations too. Output
    /// goes to the keyword owner's overlay.
    fn synthesize_auto_replenish(
        &self,
        incoming: &[Arc<Manifest>],
        all: &[Arc<Manifest>],
    ) -> HashMap<String, Overlay> {
        let mut keywords: HashMap<&str, (&str, &ContributionKeywordDefinition)> = HashMap::new();
        for manifest in all {
            for def in &manifest.contribution_keywords {
                keywords
                    .entry(def.name.as_str())
                    .or_insert((manifest.name.as_str(), def));
            }
        }

        let mut overlays: HashMap<String, Overlay> = HashMap::new();
        for manifest in incoming {
            for (keyword, entries) in &manifest.contributes {
                let Some((owner, def)) = keywords.get(keyword.as_str()) else {
                    continue;
                };
                for entry in entries {
                    if let Some(templates) = &def.contribute_auto_replenish {
                        let overlay = overlays.entry(owner.to_string()).or_default();
                        for (target, defs) in templates {
                            for template in defs {
                                let mut synthesized = template.clone();
                                synthesized.name = substitute_name(&template.name, &entry.name);
                                synthesized.cp = template
                                    .cp
                                    .as_deref()
                                    .map(|cp| substitute_name(cp, &entry.name));
                                synthesized.is_replenish = true;
                                synthesized.replenish_by = Some(manifest.name.clone());
                                overlay
                                    .contributes
                                    .entry(target.clone())
                                    .or_default()
                                    .push(synthesized);
                            }
                        }
                    }
                    if let Some(templates) = &def.contribution_point_auto_replenish {
                        let overlay = overlays.entry(owner.to_string()).or_default();
                        for (target, defs) in templates {
                            for template in defs {
                                let mut synthesized = template.clone();
                                synthesized.name = substitute_name(&template.name, &entry.name);
                                synthesized.is_replenish = true;
                                synthesized.replenish_by = Some(manifest.name.clone());
                                overlay
                                    .contribution_points
                                    .entry(target.clone())
                                    .or_default()
                                    .push(synthesized);
                            }
                        }
                    }
                }
            }
        }
        overlays
    }

    pub fn manifest(&self, name: &str) -> Option<Arc<Manifest>> {
        self.inner.read().by_name.get(name).cloned()
    }

    pub fn manifests(&self) -> Vec<Arc<Manifest>> {
        self.inner.read().manifests.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .manifests
            .iter()
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn options(&self) -> &AssertionOptions {
        &self.options
    }

    pub fn event_definitions(&self) -> &[ActivationEventDefinition] {
        &self.event_definitions
    }

    pub fn is_event_defined(&self, event: &str) -> bool {
        self.event_definitions.iter().any(|def| def.name == event)
    }

    /// Manifests activating on `event`, paired with the matching event
    /// reference (which may carry a `when` guard).
    pub fn should_activates(&self, event: &str) -> Vec<(Arc<Manifest>, ActivationEvent)> {
        self.inner
            .read()
            .by_activation
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    /// Manifests tied to `event` for deactivation: the union of the
    /// activation group and the explicit deactivation group.
    pub fn should_deactivates(&self, event: &str) -> Vec<Arc<Manifest>> {
        let inner = self.inner.read();
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        if let Some(entries) = inner.by_activation.get(event) {
            for (manifest, _) in entries {
                if seen.insert(manifest.name.clone()) {
                    result.push(manifest.clone());
                }
            }
        }
        if let Some(entries) = inner.by_deactivation.get(event) {
            for manifest in entries {
                if seen.insert(manifest.name.clone()) {
                    result.push(manifest.clone());
                }
            }
        }
        result
    }

    pub fn find_keyword_definition(
        &self,
        keyword: &str,
    ) -> Option<(String, ContributionKeywordDefinition)> {
        let inner = self.inner.read();
        for manifest in &inner.manifests {
            if let Some(def) = manifest.keyword(keyword) {
                return Some((manifest.name.clone(), def.clone()));
            }
        }
        None
    }

    pub fn overlay(&self, name: &str) -> Overlay {
        self.inner
            .read()
            .overlays
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Static declarations plus overlay, in declaration order.
    pub fn merged_contributes(&self, name: &str) -> ContributeMap {
        let mut merged = self
            .manifest(name)
            .map(|m| m.contributes.clone())
            .unwrap_or_default();
        merge_definitions(&mut merged, &self.overlay(name).contributes);
        merged
    }

    pub fn merged_contribution_points(&self, name: &str) -> ContributionPointMap {
        let mut merged = self
            .manifest(name)
            .map(|m| m.contribution_points.clone())
            .unwrap_or_default();
        merge_definitions(&mut merged, &self.overlay(name).contribution_points);
        merged
    }

    pub fn add_dynamic_contributes(&self, name: &str, additions: &ContributeMap) {
        let mut inner = self.inner.write();
        let overlay = inner.overlays.entry(name.to_string()).or_default();
        merge_definitions(&mut overlay.contributes, additions);
    }

    pub fn add_dynamic_contribution_points(&self, name: &str, additions: &ContributionPointMap) {
        let mut inner = self.inner.write();
        let overlay = inner.overlays.entry(name.to_string()).or_default();
        merge_definitions(&mut overlay.contribution_points, additions);
    }

    /// Remove overlay contributions by name, returning what was removed so
    /// the caller can broadcast the revocation.
    pub fn remove_dynamic_contributes(
        &self,
        name: &str,
        keyword: &str,
        names: &[String],
    ) -> Vec<ContributeDefinition> {
        let mut inner = self.inner.write();
        let Some(overlay) = inner.overlays.get_mut(name) else {
            return Vec::new();
        };
        let Some(defs) = overlay.contributes.get_mut(keyword) else {
            return Vec::new();
        };
        let (removed, kept) = defs
            .drain(..)
            .partition(|def| names.contains(&def.name));
        *defs = kept;
        removed
    }

    pub fn remove_dynamic_contribution_points(
        &self,
        name: &str,
        keyword: &str,
        names: &[String],
    ) -> Vec<ContributionPointDefinition> {
        let mut inner = self.inner.write();
        let Some(overlay) = inner.overlays.get_mut(name) else {
            return Vec::new();
        };
        let Some(defs) = overlay.contribution_points.get_mut(keyword) else {
            return Vec::new();
        };
        let (removed, kept) = defs
            .drain(..)
            .partition(|def| names.contains(&def.name));
        *defs = kept;
        removed
    }

    /// Re-run the naming checks for contributions an extension adds at
    /// runtime. Violations are returned, not reported; the caller decides.
    pub fn validate_dynamic_contributes(
        &self,
        contributor: &Manifest,
        additions: &ContributeMap,
    ) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        for (keyword, defs) in additions {
            let Some((_, definition)) = self.find_keyword_definition(keyword) else {
                errors.push(ConfigError::UnknownKeyword {
                    extension: contributor.name.clone(),
                    keyword: keyword.clone(),
                });
                continue;
            };
            for def in defs {
                check_contribute(
                    &mut errors,
                    &contributor.name,
                    keyword,
                    &definition,
                    def,
                    &self.options,
                );
                if !definition.disable_name_unique && self.contribute_name_exists(keyword, &def.name)
                {
                    errors.push(ConfigError::DuplicateContributionName {
                        keyword: keyword.clone(),
                        name: def.name.clone(),
                    });
                }
            }
        }
        errors
    }

    pub fn validate_dynamic_contribution_points(
        &self,
        contributor: &Manifest,
        additions: &ContributionPointMap,
    ) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        for (keyword, defs) in additions {
            let Some((_, definition)) = self.find_keyword_definition(keyword) else {
                errors.push(ConfigError::UnknownKeyword {
                    extension: contributor.name.clone(),
                    keyword: keyword.clone(),
                });
                continue;
            };
            for def in defs {
                check_contribution_point(
                    &mut errors,
                    &contributor.name,
                    keyword,
                    &definition,
                    def,
                    &self.options,
                );
                if !definition.disable_name_unique
                    && self.contribution_point_name_exists(keyword, &def.name)
                {
                    errors.push(ConfigError::DuplicateContributionPointName {
                        keyword: keyword.clone(),
                        name: def.name.clone(),
                    });
                }
            }
        }
        errors
    }

    fn contribute_name_exists(&self, keyword: &str, name: &str) -> bool {
        let inner = self.inner.read();
        inner.manifests.iter().any(|m| {
            m.contributes
                .get(keyword)
                .is_some_and(|defs| defs.iter().any(|d| d.name == name))
        }) || inner.overlays.values().any(|overlay| {
            overlay
                .contributes
                .get(keyword)
                .is_some_and(|defs| defs.iter().any(|d| d.name == name))
        })
    }

    fn contribution_point_name_exists(&self, keyword: &str, name: &str) -> bool {
        let inner = self.inner.read();
        inner.manifests.iter().any(|m| {
            m.contribution_points
                .get(keyword)
                .is_some_and(|defs| defs.iter().any(|d| d.name == name))
        }) || inner.overlays.values().any(|overlay| {
            overlay
                .contribution_points
                .get(keyword)
                .is_some_and(|defs| defs.iter().any(|d| d.name == name))
        })
    }
}

impl KernelService for ManifestRegistry {
    fn service_id(&self) -> ServiceId {
        ServiceId::Manifests
    }

    fn initialize(&self) -> Result<(), KernelError> {
        info!(
            manifests = self.inner.read().manifests.len(),
            events = self.event_definitions.len(),
            "manifest registry ready"
        );
        Ok(())
    }

    fn dispose(&self) {
        *self.inner.write() = Inner::default();
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Static validation over a full manifest set. `accepted` names passed
/// earlier validation; their per-manifest checks are skipped, but they still
/// participate in the global ones.
struct ManifestAssertion<'a> {
    manifests: &'a [Arc<Manifest>],
    event_definitions: &'a [ActivationEventDefinition],
    options: &'a AssertionOptions,
}

impl ManifestAssertion<'_> {
    fn validate(&self, accepted: &HashSet<String>) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        self.check_unique_names(&mut errors);
        let keywords = self.check_unique_keywords(&mut errors);

        for manifest in self.manifests {
            if accepted.contains(&manifest.name) {
                continue;
            }
            self.check_manifest(&mut errors, manifest, &keywords);
        }

        self.check_entry_uniqueness(&mut errors, &keywords, accepted);
        errors
    }

    fn check_unique_names(&self, errors: &mut Vec<ConfigError>) {
        let mut seen = HashSet::new();
        for manifest in self.manifests {
            if manifest.name.is_empty() {
                continue;
            }
            if !seen.insert(manifest.name.as_str()) {
                errors.push(ConfigError::DuplicateManifestName(manifest.name.clone()));
            }
        }
    }

    fn check_unique_keywords(
        &self,
        errors: &mut Vec<ConfigError>,
    ) -> HashMap<String, (String, ContributionKeywordDefinition)> {
        let mut keywords: HashMap<String, (String, ContributionKeywordDefinition)> =
            HashMap::new();
        for manifest in self.manifests {
            for def in &manifest.contribution_keywords {
                if let Some((first, _)) = keywords.get(&def.name) {
                    errors.push(ConfigError::DuplicateKeyword {
                        keyword: def.name.clone(),
                        first: first.clone(),
                        second: manifest.name.clone(),
                    });
                } else {
                    keywords.insert(def.name.clone(), (manifest.name.clone(), def.clone()));
                }
            }
        }
        keywords
    }

    fn check_manifest(
        &self,
        errors: &mut Vec<ConfigError>,
        manifest: &Manifest,
        keywords: &HashMap<String, (String, ContributionKeywordDefinition)>,
    ) {
        if manifest.name.is_empty() {
            errors.push(ConfigError::MissingManifestName);
            return;
        }

        if manifest.activation_events.is_empty() {
            errors.push(ConfigError::NoActivationEvents(manifest.name.clone()));
        }
        for event in manifest.activation_event_names() {
            if !self.is_event_defined(event) {
                errors.push(ConfigError::UndeclaredActivationEvent {
                    extension: manifest.name.clone(),
                    event: event.to_string(),
                });
            }
        }
        for event in &manifest.deactivation_events {
            if !self.is_event_defined(event) {
                errors.push(ConfigError::UndeclaredActivationEvent {
                    extension: manifest.name.clone(),
                    event: event.clone(),
                });
            }
        }

        for dependency in manifest.dependencies.keys() {
            let Some(dep_manifest) = self
                .manifests
                .iter()
                .find(|m| m.name == *dependency)
            else {
                errors.push(ConfigError::UnknownDependency {
                    extension: manifest.name.clone(),
                    dependency: dependency.clone(),
                });
                continue;
            };
            // A dependency must be activatable no later than its dependent.
            if self.earliest_event_index(dep_manifest) > self.earliest_event_index(manifest) {
                errors.push(ConfigError::DependencyOrdering {
                    extension: manifest.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        for (keyword, defs) in &manifest.contributes {
            let Some((_, definition)) = keywords.get(keyword) else {
                errors.push(ConfigError::UnknownKeyword {
                    extension: manifest.name.clone(),
                    keyword: keyword.clone(),
                });
                continue;
            };
            for def in defs {
                check_contribute(
                    errors,
                    &manifest.name,
                    keyword,
                    definition,
                    def,
                    self.options,
                );
            }
        }

        for (keyword, defs) in &manifest.contribution_points {
            let Some((_, definition)) = keywords.get(keyword) else {
                errors.push(ConfigError::UnknownKeyword {
                    extension: manifest.name.clone(),
                    keyword: keyword.clone(),
                });
                continue;
            };
            for def in defs {
                check_contribution_point(
                    errors,
                    &manifest.name,
                    keyword,
                    definition,
                    def,
                    self.options,
                );
            }
        }

        if !self
            .options
            .ignore_keyword_namespace_manifests
            .contains(&manifest.name)
        {
            for def in &manifest.contribution_keywords {
                if !def.name.starts_with(&manifest.name) {
                    errors.push(ConfigError::KeywordNamespaceViolation {
                        extension: manifest.name.clone(),
                        keyword: def.name.clone(),
                    });
                }
            }
        }
    }

    /// Contribution and contribution-point names must be globally unique per
    /// keyword. Collisions are only reported when a new manifest is
    /// involved; accepted-vs-accepted pairs were reported on admission.
    fn check_entry_uniqueness(
        &self,
        errors: &mut Vec<ConfigError>,
        keywords: &HashMap<String, (String, ContributionKeywordDefinition)>,
        accepted: &HashSet<String>,
    ) {
        for (keyword, (_, definition)) in keywords {
            if definition.disable_name_unique {
                continue;
            }

            let mut contribute_owners: HashMap<&str, &str> = HashMap::new();
            let mut point_owners: HashMap<&str, &str> = HashMap::new();
            for manifest in self.manifests {
                if let Some(defs) = manifest.contributes.get(keyword) {
                    for def in defs {
                        if let Some(first) = contribute_owners.get(def.name.as_str()) {
                            if !accepted.contains(*first) || !accepted.contains(&manifest.name) {
                                errors.push(ConfigError::DuplicateContributionName {
                                    keyword: keyword.clone(),
                                    name: def.name.clone(),
                                });
                            }
                        } else {
                            contribute_owners.insert(&def.name, &manifest.name);
                        }
                    }
                }
                if let Some(defs) = manifest.contribution_points.get(keyword) {
                    for def in defs {
                        if let Some(first) = point_owners.get(def.name.as_str()) {
                            if !accepted.contains(*first) || !accepted.contains(&manifest.name) {
                                errors.push(ConfigError::DuplicateContributionPointName {
                                    keyword: keyword.clone(),
                                    name: def.name.clone(),
                                });
                            }
                        } else {
                            point_owners.insert(&def.name, &manifest.name);
                        }
                    }
                }
            }
        }
    }

    fn is_event_defined(&self, event: &str) -> bool {
        self.event_definitions.iter().any(|def| def.name == event)
    }

    /// Position of the earliest activation event in the definition ordering.
    fn earliest_event_index(&self, manifest: &Manifest) -> usize {
        manifest
            .activation_event_names()
            .filter_map(|name| {
                self.event_definitions
                    .iter()
                    .position(|def| def.name == name)
            })
            .min()
            .unwrap_or(usize::MAX)
    }
}

fn check_contribute(
    errors: &mut Vec<ConfigError>,
    extension: &str,
    keyword: &str,
    definition: &ContributionKeywordDefinition,
    def: &ContributeDefinition,
    options: &AssertionOptions,
) {
    if def.name.is_empty() {
        errors.push(ConfigError::MissingContributionName {
            extension: extension.to_string(),
            keyword: keyword.to_string(),
        });
        return;
    }
    let namespace_exempt = def.is_replenish
        || definition.disable_name_obey_namespace_rule
        || options
            .ignore_contributes_namespace_manifests
            .iter()
            .any(|name| name == extension);
    if !namespace_exempt && !def.name.starts_with(&format!("{extension}.")) {
        errors.push(ConfigError::NamespaceViolation {
            extension: extension.to_string(),
            keyword: keyword.to_string(),
            name: def.name.clone(),
        });
    }
    if definition.support_contribution_point && def.cp.is_none() {
        errors.push(ConfigError::MissingContributionPoint {
            keyword: keyword.to_string(),
            name: def.name.clone(),
        });
    }
}

fn check_contribution_point(
    errors: &mut Vec<ConfigError>,
    extension: &str,
    keyword: &str,
    definition: &ContributionKeywordDefinition,
    def: &ContributionPointDefinition,
    options: &AssertionOptions,
) {
    if def.name.is_empty() {
        errors.push(ConfigError::MissingContributionName {
            extension: extension.to_string(),
            keyword: keyword.to_string(),
        });
        return;
    }
    let namespace_exempt = def.is_replenish
        || definition.disable_name_obey_namespace_rule
        || options
            .ignore_contributes_namespace_manifests
            .iter()
            .any(|name| name == extension);
    if !namespace_exempt && !def.name.starts_with(&format!("{extension}.")) {
        errors.push(ConfigError::NamespaceViolation {
            extension: extension.to_string(),
            keyword: keyword.to_string(),
            name: def.name.clone(),
        });
    }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
