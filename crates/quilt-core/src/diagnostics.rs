//! Single funnel for configuration-error reporting.
//!
//! Every configuration error the kernel detects goes through [`Diagnostics`].
//! In strict mode the error is returned to the caller; in permissive mode it
//! is logged and collected so callers can inspect the report afterwards.
//! Cyclic-dependency detection never goes through here.

use parking_lot::Mutex;
use quilt_protocols::{ConfigError, KernelError};
use tracing::error;

pub struct Diagnostics {
    strict: bool,
    entries: Mutex<Vec<String>>,
}

impl Diagnostics {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Record a configuration error. Strict mode hands it back as a hard
    /// error; permissive mode logs and collects it.
    pub fn report(&self, err: ConfigError) -> Result<(), KernelError> {
        error!(error = %err, "configuration error");
        self.entries.lock().push(err.to_string());
        if self.strict {
            Err(err.into())
        } else {
            Ok(())
        }
    }

    /// Messages collected so far, in detection order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
