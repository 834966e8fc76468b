//! Execution context threaded through every blocking call
//!
//! There is no internal timeout: cancellation is the only way to stop an
//! operation early, and a cancelled operation is treated as a fatal failure.

use crate::error::CoreError;
use tokio_util::sync::CancellationToken;

/// Caller-supplied execution context
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    token: CancellationToken,
}

impl ExecContext {
    /// Create a fresh, uncancelled context
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing cancellation token
    #[inline]
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Derive a context cancelled together with this one
    #[inline]
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Cancel this context and every child
    #[inline]
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check if cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with [`CoreError::Cancelled`] once cancelled
    #[inline]
    pub fn check(&self) -> Result<(), CoreError> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Underlying token
    #[inline]
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
