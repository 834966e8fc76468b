//! Persisted records
//!
//! The shapes the persistence service stores and returns. Upserts answer with
//! the full record, including server-assigned fields.

use crate::config::{MachineConfig, ProjectConfig};
use crate::refs::{BasisRef, ProjectRef, TargetRef};
use serde::{Deserialize, Serialize};

/// Persisted basis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasisRecord {
    /// Server-assigned resource id
    pub resource_id: String,
    /// Unique basis name
    pub name: String,
    /// Filesystem location
    #[serde(default)]
    pub path: String,
    /// Projects registered within this basis
    #[serde(default)]
    pub projects: Vec<ProjectRef>,
}

impl BasisRecord {
    /// Reference to this record
    #[must_use]
    pub fn to_ref(&self) -> BasisRef {
        BasisRef {
            resource_id: self.resource_id.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
        }
    }
}

/// Persisted project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Server-assigned resource id
    pub resource_id: String,
    /// Project name, unique within its basis
    pub name: String,
    /// Filesystem location
    #[serde(default)]
    pub path: String,
    /// Owning basis
    pub basis: BasisRef,
    /// Parsed project configuration (machine definitions)
    #[serde(default)]
    pub configuration: Option<ProjectConfig>,
    /// Targets known to the server for this project
    #[serde(default)]
    pub targets: Vec<TargetRef>,
}

impl ProjectRecord {
    /// Reference to this record
    #[must_use]
    pub fn to_ref(&self) -> ProjectRef {
        ProjectRef {
            resource_id: self.resource_id.clone(),
            name: self.name.clone(),
            basis: self.basis.clone(),
            path: self.path.clone(),
        }
    }
}

/// Activity state of a target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    /// Nothing is known about the backing machine
    #[default]
    Unknown,
    /// Creation has been requested
    Pending,
    /// The backing machine exists
    Created,
    /// The backing machine has been removed
    Destroyed,
}

impl TargetState {
    /// Whether the target has a live backing resource
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Created)
    }
}

/// Persisted target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    /// Server-assigned resource id
    pub resource_id: String,
    /// Human-facing name
    pub name: String,
    /// Provider-side machine id
    #[serde(default)]
    pub uuid: String,
    /// Owning project
    pub project: ProjectRef,
    /// Assigned provider name (empty when not yet chosen)
    #[serde(default)]
    pub provider: String,
    /// Activity state
    #[serde(default)]
    pub state: TargetState,
    /// Machine configuration this target was initialised from
    #[serde(default)]
    pub configuration: Option<MachineConfig>,
}

impl TargetRecord {
    /// Reference to this record
    #[must_use]
    pub fn to_ref(&self) -> TargetRef {
        TargetRef {
            resource_id: self.resource_id.clone(),
            name: self.name.clone(),
            project: self.project.clone(),
        }
    }
}
