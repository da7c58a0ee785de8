//! Contribution protocol definitions.
//!
//! A *contribution keyword* is a capability family provided by one extension.
//! Other extensions expose *contribution points* under that keyword, and
//! register *contributions* against those points. All three are declared in
//! manifests; the types here are the declarative records only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Separator for dynamic contribution-point sub-paths, e.g.
/// `"grid.columns:userId"` targets the static point `grid.columns` with the
/// dynamic suffix `userId`.
pub const DYNAMIC_SPLITTER: char = ':';

/// Placeholder expanded during auto-replenish synthesis.
pub const REPLENISH_PLACEHOLDER: &str = "{{name}}";

/// A contribution registered against a contribution point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributeDefinition {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Target contribution point. Required whenever the owning keyword
    /// supports contribution points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cp: Option<String>,

    #[serde(default)]
    pub support_dynamics: bool,

    /// Set on entries synthesized by auto-replenish.
    #[serde(default)]
    pub is_replenish: bool,

    /// Name of the extension whose declaration triggered the synthesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replenish_by: Option<String>,

    /// Keyword-specific payload, carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContributeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            cp: None,
            support_dynamics: false,
            is_replenish: false,
            replenish_by: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_cp(mut self, cp: impl Into<String>) -> Self {
        self.cp = Some(cp.into());
        self
    }

    pub fn with_dynamics(mut self) -> Self {
        self.support_dynamics = true;
        self
    }
}

/// A contribution point exposed under a keyword for others to contribute to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionPointDefinition {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether this point accepts dynamic sub-paths (`name:suffix`).
    #[serde(default)]
    pub support_dynamics: bool,

    #[serde(default)]
    pub is_replenish: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replenish_by: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContributionPointDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            support_dynamics: false,
            is_replenish: false,
            replenish_by: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_dynamics(mut self) -> Self {
        self.support_dynamics = true;
        self
    }
}

/// A capability family an extension provides. The extension owning the
/// keyword registers its runtime implementation during activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionKeywordDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether contributions under this keyword must target a contribution
    /// point (`cp` becomes required on each entry).
    #[serde(default)]
    pub support_contribution_point: bool,

    #[serde(default)]
    pub support_dynamics: bool,

    /// Lifts the `"<contributor>."` prefix requirement for entries under
    /// this keyword.
    #[serde(default)]
    pub disable_name_obey_namespace_rule: bool,

    /// Lifts the global-uniqueness requirement for entry names under this
    /// keyword.
    #[serde(default)]
    pub disable_name_unique: bool,

    /// Templates expanded once per entry another extension declares under
    /// this keyword; `{{name}}` is replaced with the entry name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contribute_auto_replenish: Option<ContributeMap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contribution_point_auto_replenish: Option<ContributionPointMap>,

    /// Whether the keyword implementation exposes a context object to
    /// extensions that contribute to it.
    #[serde(default)]
    pub provide_context: bool,

    /// Attachment alias for the keyword context on dependent contexts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_name: Option<String>,
}

impl ContributionKeywordDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            support_contribution_point: false,
            support_dynamics: false,
            disable_name_obey_namespace_rule: false,
            disable_name_unique: false,
            contribute_auto_replenish: None,
            contribution_point_auto_replenish: None,
            provide_context: false,
            context_name: None,
        }
    }

    pub fn with_contribution_points(mut self) -> Self {
        self.support_contribution_point = true;
        self
    }

    pub fn with_dynamics(mut self) -> Self {
        self.support_dynamics = true;
        self
    }

    pub fn with_context(mut self, alias: impl Into<String>) -> Self {
        self.provide_context = true;
        self.context_name = Some(alias.into());
        self
    }
}

/// Keyword name to ordered contribution declarations.
pub type ContributeMap = BTreeMap<String, Vec<ContributeDefinition>>;

/// Keyword name to ordered contribution-point declarations.
pub type ContributionPointMap = BTreeMap<String, Vec<ContributionPointDefinition>>;

/// Append `from`'s entries into `into`, keyword by keyword, preserving order.
pub fn merge_definitions<T: Clone>(
    into: &mut BTreeMap<String, Vec<T>>,
    from: &BTreeMap<String, Vec<T>>,
) {
    for (keyword, defs) in from {
        into.entry(keyword.clone())
            .or_default()
            .extend(defs.iter().cloned());
    }
}

/// Expand the auto-replenish placeholder in a template string.
pub fn substitute_name(template: &str, name: &str) -> String {
    template.replace(REPLENISH_PLACEHOLDER, name)
}

#[cfg(test)]
#[path = "contribution_tests.rs"]
mod tests;
