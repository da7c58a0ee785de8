//! Kernel runtime errors.

use thiserror::Error;

use super::ConfigError;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cyclic dependency among extensions: {0}")]
    CyclicDependency(String),

    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("No implementation available for extension: {0}")]
    LoaderUnavailable(String),

    #[error("Extension {extension} failed to activate: {reason}")]
    ActivationFailed { extension: String, reason: String },

    #[error("Kernel service already registered: {0}")]
    ServiceAlreadyRegistered(String),

    #[error("Kernel service {service} failed to initialize: {reason}")]
    ServiceInitFailed { service: String, reason: String },

    #[error("{0}")]
    Custom(String),
}

impl KernelError {
    /// Attribute a lower-level failure to the extension whose lifecycle
    /// hook produced it.
    pub fn activation(extension: impl Into<String>, source: &KernelError) -> Self {
        KernelError::ActivationFailed {
            extension: extension.into(),
            reason: source.to_string(),
        }
    }
}
