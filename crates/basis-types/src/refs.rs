//! Reference identifiers
//!
//! References are the only form of cross-entity pointer exposed outside the
//! core. Each one carries the resource id, the human-facing name and the
//! parent reference.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a basis
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BasisRef {
    /// Server-assigned resource id (empty until persisted)
    pub resource_id: String,
    /// Unique basis name
    pub name: String,
    /// Filesystem location of the basis, if any
    #[serde(default)]
    pub path: String,
}

impl BasisRef {
    /// Reference a basis by name only
    #[inline]
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for BasisRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "basis:{}", display_id(&self.name, &self.resource_id))
    }
}

/// Reference to a project within a basis
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectRef {
    /// Server-assigned resource id (empty until persisted)
    pub resource_id: String,
    /// Project name, unique within its basis
    pub name: String,
    /// Owning basis
    pub basis: BasisRef,
    /// Filesystem location of the project, if any
    #[serde(default)]
    pub path: String,
}

impl ProjectRef {
    /// Reference a project by name within a basis
    #[inline]
    #[must_use]
    pub fn named(name: impl Into<String>, basis: BasisRef) -> Self {
        Self {
            name: name.into(),
            basis,
            ..Self::default()
        }
    }
}

impl fmt::Display for ProjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/project:{}",
            self.basis,
            display_id(&self.name, &self.resource_id)
        )
    }
}

/// Reference to a target within a project
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    /// Server-assigned resource id (primary key within the project)
    pub resource_id: String,
    /// Human-facing target name
    pub name: String,
    /// Owning project
    pub project: ProjectRef,
}

impl TargetRef {
    /// Reference a target by name within a project
    #[inline]
    #[must_use]
    pub fn named(name: impl Into<String>, project: ProjectRef) -> Self {
        Self {
            name: name.into(),
            project,
            ..Self::default()
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/target:{}",
            self.project,
            display_id(&self.name, &self.resource_id)
        )
    }
}

fn display_id<'a>(name: &'a str, resource_id: &'a str) -> &'a str {
    if name.is_empty() {
        resource_id
    } else {
        name
    }
}
