//! User feedback interface
//!
//! Rendering belongs to the embedding application; the core only needs a
//! place to send messages and a status scope per dynamic call.

use std::fmt;

/// A transient status line opened for the duration of an operation
pub trait StatusScope: Send {
    /// Replace the status message
    fn update(&mut self, message: &str);

    /// Close the status line
    fn close(&mut self);
}

/// Terminal-facing UI
pub trait Ui: Send + Sync {
    /// Emit a message
    fn output(&self, message: &str);

    /// Open a status scope
    fn status(&self) -> Box<dyn StatusScope>;
}

/// Holds a status scope open and closes it exactly once on drop
pub struct StatusGuard {
    scope: Option<Box<dyn StatusScope>>,
}

impl StatusGuard {
    /// Open a status scope on `ui`
    #[must_use]
    pub fn open(ui: &dyn Ui) -> Self {
        Self {
            scope: Some(ui.status()),
        }
    }

    /// Update the status message
    pub fn update(&mut self, message: &str) {
        if let Some(scope) = self.scope.as_mut() {
            scope.update(message);
        }
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        if let Some(mut scope) = self.scope.take() {
            scope.close();
        }
    }
}

impl fmt::Debug for StatusGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusGuard")
            .field("open", &self.scope.is_some())
            .finish()
    }
}

/// UI that forwards everything to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUi;

struct TracingStatus;

impl StatusScope for TracingStatus {
    fn update(&mut self, message: &str) {
        tracing::debug!(target: "basis::ui", status = message, "status update");
    }

    fn close(&mut self) {}
}

impl Ui for TracingUi {
    fn output(&self, message: &str) {
        tracing::info!(target: "basis::ui", "{message}");
    }

    fn status(&self) -> Box<dyn StatusScope> {
        Box::new(TracingStatus)
    }
}
