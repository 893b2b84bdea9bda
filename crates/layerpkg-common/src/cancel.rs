//! Cooperative cancellation shared by every step of a build.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{LayerpkgError, Result};

/// A cloneable cancellation flag.
///
/// All clones observe the same state. Once cancelled a token stays
/// cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with [`LayerpkgError::Cancelled`] if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns `LayerpkgError::Cancelled` when the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(LayerpkgError::Cancelled);
        }
        Ok(())
    }
}
