//! Configuration errors: everything detectable from manifests and
//! registration calls alone, before or during validation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Duplicate manifest name: {0}")]
    DuplicateManifestName(String),

    #[error("Duplicate contribution keyword {keyword}: declared by {first} and {second}")]
    DuplicateKeyword {
        keyword: String,
        first: String,
        second: String,
    },

    #[error("Manifest name is required")]
    MissingManifestName,

    #[error("Extension {0} declares no activation events")]
    NoActivationEvents(String),

    #[error("Extension {extension} uses undeclared activation event: {event}")]
    UndeclaredActivationEvent { extension: String, event: String },

    #[error("Activation event is not defined: {0}")]
    UndeclaredEvent(String),

    #[error("No activation event definitions were provided")]
    NoEventDefinitions,

    #[error("More than one root activation event: {0}")]
    MultipleRootEvents(String),

    #[error("Extension {extension} depends on unknown extension: {dependency}")]
    UnknownDependency { extension: String, dependency: String },

    #[error("Extension {extension} activates before its dependency {dependency}")]
    DependencyOrdering { extension: String, dependency: String },

    #[error("Extension {extension} contributes to unknown keyword: {keyword}")]
    UnknownKeyword { extension: String, keyword: String },

    #[error("Extension {extension} has an unnamed entry under keyword {keyword}")]
    MissingContributionName { extension: String, keyword: String },

    #[error("Entry {name} under keyword {keyword} must be prefixed with \"{extension}.\"")]
    NamespaceViolation {
        extension: String,
        keyword: String,
        name: String,
    },

    #[error("Contribution {name} under keyword {keyword} requires a cp target")]
    MissingContributionPoint { keyword: String, name: String },

    #[error("Contribution {name} under keyword {keyword} targets unresolved contribution point: {cp}")]
    UnresolvedContributionPoint {
        keyword: String,
        name: String,
        cp: String,
    },

    #[error("Keyword {keyword} declared by {extension} must be prefixed with \"{extension}.\"")]
    KeywordNamespaceViolation { extension: String, keyword: String },

    #[error("Duplicate contribution name {name} under keyword {keyword}")]
    DuplicateContributionName { keyword: String, name: String },

    #[error("Duplicate contribution point name {name} under keyword {keyword}")]
    DuplicateContributionPointName { keyword: String, name: String },

    #[error("Keyword {keyword} does not support dynamics, rejected entry: {name}")]
    DynamicsNotSupported { keyword: String, name: String },

    #[error("Contribution point {cp} under keyword {keyword} does not support dynamic sub-paths")]
    DynamicSubPathNotSupported { keyword: String, cp: String },

    #[error("Extension {extension} accessed undeclared dependency: {dependency}")]
    UndeclaredDependencyAccess { extension: String, dependency: String },

    #[error("Extension {extension} registered undeclared keyword: {keyword}")]
    UndeclaredKeywordRegistration { extension: String, keyword: String },

    #[error("Contribution keyword already implemented: {0}")]
    KeywordAlreadyImplemented(String),

    #[error("Contribution keyword has no implementation: {0}")]
    KeywordNotImplemented(String),

    #[error("Context name conflict on extension {extension}: {name}")]
    ContextNameConflict { extension: String, name: String },

    #[error("Extension {0} provides a context but declares no contextName")]
    MissingContextName(String),

    #[error("Invalid guard expression \"{expr}\": {reason}")]
    GuardExpression { expr: String, reason: String },
}
