//! # Quilt Protocols
//!
//! Data model for the quilt extension kernel. Contains the manifest types,
//! contribution definitions, activation-event definitions, and the error
//! taxonomy shared by the kernel and its extensions. No behavior lives here.
//!
//! ## Core Types
//!
//! - [`Manifest`] - Declarative extension descriptor
//! - [`ActivationEvent`] / [`ActivationEventDefinition`] - Lifecycle signals
//! - [`ContributionKeywordDefinition`] - A capability family an extension provides
//! - [`ContributeDefinition`] / [`ContributionPointDefinition`] - Entries in the
//!   contribution protocol
//! - [`ConfigError`] / [`KernelError`] - Error taxonomy

pub mod contribution;
pub mod error;
pub mod event;
pub mod manifest;

pub use contribution::{
    ContributeDefinition, ContributeMap, ContributionKeywordDefinition,
    ContributionPointDefinition, ContributionPointMap, DYNAMIC_SPLITTER, merge_definitions,
    substitute_name,
};
pub use error::{ConfigError, KernelError};
pub use event::{ActivationEvent, ActivationEventDefinition};
pub use manifest::Manifest;
