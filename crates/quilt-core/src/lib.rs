//! # Quilt Core
//!
//! Extension orchestration kernel. Given a validated set of manifests, the
//! kernel resolves the dependency graph into concurrent activation waves per
//! fired event, builds a private context per extension, and arbitrates the
//! contribution keyword/point protocol.
//!
//! ## Components
//!
//! - [`Kernel`] - Facade assembling and driving all services
//! - [`ManifestRegistry`] - Validated manifests, indices, dynamic overlay
//! - [`ActivationEngine`] - Lifecycle state machine and wave execution
//! - [`ContextManager`] - Per-extension interaction surfaces
//! - [`ContributionManager`] - Registry of keyword implementations
//! - [`HierarchyManager`] - Nested-kernel context sharing

pub mod container;
pub mod context;
pub mod diagnostics;
pub mod engine;
pub mod events;
pub mod expr;
pub mod hierarchy;
pub mod kernel;
pub mod loader;
pub mod registry;
pub mod resolver;
pub mod traits;

pub use container::{KernelService, ServiceId, ServiceRegistry};
pub use context::{
    ActivationContext, ActivationStage, ContextManager, KeywordRegistration,
    RequestContributionContext,
};
pub use diagnostics::Diagnostics;
pub use engine::ActivationEngine;
pub use events::{EventBus, KernelEvent, SubscriptionId};
pub use hierarchy::HierarchyManager;
pub use kernel::{Kernel, KernelOptions};
pub use loader::{ExtensionLoader, LocalLoader};
pub use registry::{
    AssertionOptions, ContributionManager, KeywordHooks, KeywordRegistry, ManifestRegistry,
    NoHooks, Overlay,
};
pub use traits::{ContextValue, Disposer, ExtensionApi, ExtensionImpl};
