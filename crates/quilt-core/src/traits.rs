//! Traits an extension implementation provides to the kernel.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use quilt_protocols::{ContributionKeywordDefinition, KernelError};

use crate::context::ActivationContext;
use crate::registry::KeywordHooks;

/// API object an extension publishes from `activate`. Consumers downcast it
/// to the concrete type they agreed on with the publisher.
pub type ExtensionApi = Arc<dyn Any + Send + Sync>;

/// Value attached to an activation context (a dependency-provided context or
/// a keyword surface).
pub type ContextValue = Arc<dyn Any + Send + Sync>;

/// Teardown callback enrolled on an activation context, run once on
/// deactivation in registration order.
pub type Disposer = Box<dyn FnOnce() + Send>;

/// Runtime implementation of one extension. Only `activate` is mandatory.
#[async_trait]
pub trait ExtensionImpl: Send + Sync {
    /// Runs before the extension's contributions are merged; dynamic
    /// contributions added here are picked up by the merge instead of being
    /// broadcast separately.
    fn before_activate(&self, _ctx: &Arc<ActivationContext>) -> Result<(), KernelError> {
        Ok(())
    }

    /// Activation entry point. The returned API object, if any, is published
    /// and retrievable by declared dependents.
    async fn activate(
        &self,
        ctx: &Arc<ActivationContext>,
    ) -> Result<Option<ExtensionApi>, KernelError>;

    /// Runs after every extension of the triggering wave batch activated.
    fn post_activated(&self, _ctx: &Arc<ActivationContext>) {}

    fn deactivate(&self, _ctx: &Arc<ActivationContext>) {}

    /// Supplies the runtime hooks for a keyword this extension declares.
    /// Returning `None` leaves the keyword without an implementation.
    fn contribution_keyword(
        &self,
        _definition: &ContributionKeywordDefinition,
        _ctx: &Arc<ActivationContext>,
    ) -> Option<Arc<dyn KeywordHooks>> {
        None
    }

    /// Context object exposed to dependents when the manifest sets
    /// `provideContext`. `contributor` names the extension asking.
    fn provide_context(
        &self,
        _contributor: &str,
        _ctx: &Arc<ActivationContext>,
    ) -> Option<ContextValue> {
        None
    }
}

impl std::fmt::Debug for dyn ExtensionImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<dyn ExtensionImpl>")
    }
}
