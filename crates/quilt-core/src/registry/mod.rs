//! Registries: the validated manifest set and the contribution protocol.

pub mod contribution;
pub mod keyword;
pub mod manifest;

pub use contribution::ContributionManager;
pub use keyword::{KeywordHooks, KeywordRegistry, NoHooks};
pub use manifest::{AssertionOptions, ManifestRegistry, Overlay};
