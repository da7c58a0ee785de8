//! Error types for the quilt protocol layer.

mod config;
mod kernel;

pub use config::*;
pub use kernel::*;
