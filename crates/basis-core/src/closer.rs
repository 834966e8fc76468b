//! Ordered cleanup actions

use crate::error::{CoreError, ErrorSet};
use parking_lot::Mutex;
use std::fmt;

/// A deferred cleanup action
pub type Closer = Box<dyn FnOnce() -> Result<(), CoreError> + Send>;

/// Cleanup actions run once, in registration order, when an entity closes
#[derive(Default)]
pub struct Closers {
    actions: Mutex<Vec<Closer>>,
}

impl Closers {
    /// Create empty list
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action
    pub fn push(&self, closer: Closer) {
        self.actions.lock().push(closer);
    }

    /// Number of pending actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    /// Check if nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }

    /// Run every pending action, recording failures into `errors`
    ///
    /// The list is drained under the lock and the actions run after it is
    /// released, so an action may register further closers without deadlock.
    pub fn run(&self, errors: &mut ErrorSet) {
        let actions = std::mem::take(&mut *self.actions.lock());
        for action in actions {
            if let Err(e) = action() {
                tracing::warn!(error = %e, "cleanup action failed");
                errors.push(e);
            }
        }
    }
}

impl fmt::Debug for Closers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closers")
            .field("pending", &self.len())
            .finish()
    }
}
