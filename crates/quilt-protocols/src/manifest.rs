//! Extension manifest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::contribution::{
    ContributeDefinition, ContributeMap, ContributionKeywordDefinition,
    ContributionPointDefinition, ContributionPointMap,
};
use crate::event::ActivationEvent;

/// Declarative descriptor of one extension. Deep-copied into the kernel at
/// construction and immutable after validation; runtime additions live in a
/// kernel-owned overlay, never in the manifest itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    /// Required extension name to version constraint. The constraint string
    /// is carried but not interpreted by the kernel.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activation_events: Vec<ActivationEvent>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deactivation_events: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contributes: ContributeMap,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contribution_points: ContributionPointMap,

    /// Keyword definitions this extension provides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contribution_keywords: Vec<ContributionKeywordDefinition>,

    /// Whether the implementation exposes a context object to dependents.
    #[serde(default)]
    pub provide_context: bool,

    /// Attachment alias dependents see the provided context under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_name: Option<String>,
}

impl Manifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            version: None,
            publisher: None,
            dependencies: BTreeMap::new(),
            activation_events: Vec::new(),
            deactivation_events: Vec::new(),
            contributes: BTreeMap::new(),
            contribution_points: BTreeMap::new(),
            contribution_keywords: Vec::new(),
            provide_context: false,
            context_name: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>, constraint: impl Into<String>) -> Self {
        self.dependencies.insert(name.into(), constraint.into());
        self
    }

    pub fn with_activation_event(mut self, event: impl Into<ActivationEvent>) -> Self {
        self.activation_events.push(event.into());
        self
    }

    pub fn with_deactivation_event(mut self, event: impl Into<String>) -> Self {
        self.deactivation_events.push(event.into());
        self
    }

    pub fn with_contributes(
        mut self,
        keyword: impl Into<String>,
        defs: Vec<ContributeDefinition>,
    ) -> Self {
        self.contributes.entry(keyword.into()).or_default().extend(defs);
        self
    }

    pub fn with_contribution_points(
        mut self,
        keyword: impl Into<String>,
        defs: Vec<ContributionPointDefinition>,
    ) -> Self {
        self.contribution_points
            .entry(keyword.into())
            .or_default()
            .extend(defs);
        self
    }

    pub fn with_keyword(mut self, def: ContributionKeywordDefinition) -> Self {
        self.contribution_keywords.push(def);
        self
    }

    pub fn with_context(mut self, alias: impl Into<String>) -> Self {
        self.provide_context = true;
        self.context_name = Some(alias.into());
        self
    }

    /// Event names this manifest activates on, guards included.
    pub fn activation_event_names(&self) -> impl Iterator<Item = &str> {
        self.activation_events.iter().map(|event| event.name())
    }

    pub fn declares_dependency(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    pub fn keyword(&self, name: &str) -> Option<&ContributionKeywordDefinition> {
        self.contribution_keywords.iter().find(|def| def.name == name)
    }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
