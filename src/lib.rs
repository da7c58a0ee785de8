//! # Quilt
//!
//! Extension orchestration kernel: manifest validation, dependency-wave
//! activation, per-extension contexts, and the contribution keyword/point
//! protocol. This crate re-exports the protocol types and the kernel runtime
//! under one roof.
//!
//! ```no_run
//! use quilt::{Kernel, KernelOptions, Manifest, ActivationEventDefinition};
//!
//! # async fn demo() -> Result<(), quilt::KernelError> {
//! let kernel = Kernel::new(
//!     KernelOptions::new()
//!         .with_manifest(Manifest::new("sidebars").with_activation_event("initialized"))
//!         .with_activation_event(ActivationEventDefinition::new("initialized")),
//! )?;
//! kernel.activate("initialized", None, false).await?;
//! # Ok(())
//! # }
//! ```

pub use quilt_protocols::{
    ActivationEvent, ActivationEventDefinition, ConfigError, ContributeDefinition, ContributeMap,
    ContributionKeywordDefinition, ContributionPointDefinition, ContributionPointMap,
    DYNAMIC_SPLITTER, KernelError, Manifest, merge_definitions, substitute_name,
};

pub use quilt_core::{
    ActivationContext, ActivationEngine, ActivationStage, AssertionOptions, ContextManager,
    ContextValue, ContributionManager, Diagnostics, Disposer, EventBus, ExtensionApi,
    ExtensionImpl, ExtensionLoader, HierarchyManager, Kernel, KernelEvent, KernelOptions,
    KernelService, KeywordHooks, KeywordRegistration, KeywordRegistry, LocalLoader,
    ManifestRegistry, NoHooks, Overlay, RequestContributionContext, ServiceId, ServiceRegistry,
    SubscriptionId,
};
