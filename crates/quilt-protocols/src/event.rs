//! Activation event model.
//!
//! Events are declared globally (as [`ActivationEventDefinition`]) and
//! referenced from manifests (as [`ActivationEvent`], optionally carrying a
//! `when` guard evaluated against the caller-supplied context at fire time).

use serde::{Deserialize, Serialize};

/// A manifest's reference to an activation event: either a bare event name
/// or a guarded form that only matches when `when` evaluates truthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActivationEvent {
    Name(String),
    Guarded { name: String, when: String },
}

impl ActivationEvent {
    pub fn name(&self) -> &str {
        match self {
            ActivationEvent::Name(name) => name,
            ActivationEvent::Guarded { name, .. } => name,
        }
    }

    pub fn when(&self) -> Option<&str> {
        match self {
            ActivationEvent::Name(_) => None,
            ActivationEvent::Guarded { when, .. } => Some(when),
        }
    }
}

impl From<&str> for ActivationEvent {
    fn from(name: &str) -> Self {
        ActivationEvent::Name(name.to_string())
    }
}

impl From<String> for ActivationEvent {
    fn from(name: String) -> Self {
        ActivationEvent::Name(name)
    }
}

/// Global declaration of an activation event. Events with
/// `pre_activation_events` form chains back to a single root event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationEventDefinition {
    pub name: String,

    /// Events that must conceptually precede this one; a definition with no
    /// entries here is a root event.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_activation_events: Vec<String>,
}

impl ActivationEventDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pre_activation_events: Vec::new(),
        }
    }

    pub fn after(mut self, event: impl Into<String>) -> Self {
        self.pre_activation_events.push(event.into());
        self
    }

    pub fn is_root(&self) -> bool {
        self.pre_activation_events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_event_deserializes_from_string() {
        let event: ActivationEvent = serde_json::from_value(serde_json::json!("boot")).unwrap();
        assert_eq!(event.name(), "boot");
        assert!(event.when().is_none());
    }

    #[test]
    fn test_guarded_event_deserializes_from_struct() {
        let event: ActivationEvent =
            serde_json::from_value(serde_json::json!({ "name": "boot", "when": "mode == 'edit'" }))
                .unwrap();
        assert_eq!(event.name(), "boot");
        assert_eq!(event.when(), Some("mode == 'edit'"));
    }

    #[test]
    fn test_definition_root_detection() {
        let root = ActivationEventDefinition::new("initialized");
        let chained = ActivationEventDefinition::new("requestClose").after("initialized");
        assert!(root.is_root());
        assert!(!chained.is_root());
        assert_eq!(chained.pre_activation_events, vec!["initialized"]);
    }
}
