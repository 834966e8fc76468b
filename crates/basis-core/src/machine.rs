//! Capability specializations of a target

use crate::component::Component;
use crate::dispatch::Value;
use crate::error::CoreError;
use crate::target::{Target, WeakTarget};
use basis_types::{ComponentKind, TargetState};
use std::fmt;
use std::sync::Arc;

/// Capability a target can be specialized into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The built-in machine view
    Machine,
    /// A capability registered on the basis
    Custom(&'static str),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Machine => f.write_str("machine"),
            Self::Custom(tag) => f.write_str(tag),
        }
    }
}

/// Builds a custom specialization for a target
pub type Specializer = Arc<dyn Fn(&Target) -> Result<Value, CoreError> + Send + Sync>;

/// A cached, capability-typed view of a target
#[derive(Debug, Clone)]
pub enum Specialized {
    /// Built-in machine view
    Machine(Arc<Machine>),
    /// Value produced by a registered specializer
    Custom(Value),
}

impl Specialized {
    /// Machine view, if this is one
    #[must_use]
    pub fn as_machine(&self) -> Option<Arc<Machine>> {
        match self {
            Self::Machine(machine) => Some(Arc::clone(machine)),
            Self::Custom(_) => None,
        }
    }

    /// Custom value, if this is one
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Custom(value) => Some(value),
            Self::Machine(_) => None,
        }
    }

    /// Check whether both refer to the same wrapper instance
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Machine(a), Self::Machine(b)) => Arc::ptr_eq(a, b),
            (Self::Custom(a), Self::Custom(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Machine view of a target
///
/// Refers back to its target without owning it; once the target is dropped
/// every accessor fails with [`CoreError::Detached`].
pub struct Machine {
    target: WeakTarget,
}

impl Machine {
    pub(crate) fn new(target: &Target) -> Self {
        Self {
            target: target.downgrade(),
        }
    }

    /// Underlying target
    pub fn target(&self) -> Result<Target, CoreError> {
        self.target.upgrade()
    }

    /// Provider-side machine id
    pub fn id(&self) -> Result<String, CoreError> {
        Ok(self.target()?.uuid())
    }

    /// Set the provider-side id and persist it
    ///
    /// An empty id means the backing machine is gone, so the target is
    /// marked destroyed.
    pub fn set_id(&self, id: impl Into<String>) -> Result<(), CoreError> {
        let target = self.target()?;
        let id = id.into();
        target.update(|record| {
            if id.is_empty() {
                record.state = TargetState::Destroyed;
            }
            record.uuid = id;
        });
        target.save()
    }

    /// Current state
    pub fn state(&self) -> Result<TargetState, CoreError> {
        Ok(self.target()?.state())
    }

    /// Set the state and persist it
    pub fn set_state(&self, state: TargetState) -> Result<(), CoreError> {
        let target = self.target()?;
        target.update(|record| record.state = state);
        tracing::debug!(target_name = %target.name(), ?state, "machine state changed");
        target.save()
    }

    /// Assigned provider name
    pub fn provider_name(&self) -> Result<String, CoreError> {
        Ok(self.target()?.provider_name())
    }

    /// Provider component backing this machine
    pub fn provider(&self) -> Result<Component, CoreError> {
        let target = self.target()?;
        let name = target.provider_name();
        if name.is_empty() {
            return Err(CoreError::not_found("provider", target.name()));
        }
        target
            .project()?
            .basis()?
            .component(ComponentKind::Provider, &name)
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Ok(target) => f.debug_struct("Machine").field("target", &target).finish(),
            Err(_) => f.write_str("Machine(detached)"),
        }
    }
}
