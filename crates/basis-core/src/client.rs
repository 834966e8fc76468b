//! Persistence service interface
//!
//! A synchronous remote call interface for basis, project and target records.
//! Transport and wire encoding live behind the trait.

use crate::context::ExecContext;
use basis_types::{
    BasisRecord, BasisRef, ProjectRecord, ProjectRef, Status, TargetRecord, TargetRef,
};

/// Persistence service failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// No record matched the reference
    #[error("record not found: {0}")]
    NotFound(String),

    /// The service answered with an error status
    #[error("{0}")]
    Status(Status),

    /// The call was cancelled through its context
    #[error("request cancelled")]
    Cancelled,

    /// The call never reached the service
    #[error("transport failure: {0}")]
    Transport(String),
}

impl ClientError {
    /// Remote status, if the service produced one
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Status(status) => Some(status),
            _ => None,
        }
    }
}

/// Finding and upserting persisted records
///
/// Lookups match on resource id first and fall back to the name within the
/// parent reference. Upserts return the stored record including
/// server-assigned fields; request fields left at their default keep the
/// stored value. Upserting a target also records its reference on the owning
/// project, and upserting a project records it on the owning basis.
pub trait PersistenceClient: Send + Sync {
    /// Find a basis by reference
    fn find_basis(&self, ctx: &ExecContext, basis: &BasisRef) -> Result<BasisRecord, ClientError>;

    /// Create or update a basis
    fn upsert_basis(
        &self,
        ctx: &ExecContext,
        basis: &BasisRecord,
    ) -> Result<BasisRecord, ClientError>;

    /// Find a project by reference
    fn find_project(
        &self,
        ctx: &ExecContext,
        project: &ProjectRef,
    ) -> Result<ProjectRecord, ClientError>;

    /// Create or update a project
    fn upsert_project(
        &self,
        ctx: &ExecContext,
        project: &ProjectRecord,
    ) -> Result<ProjectRecord, ClientError>;

    /// Find a target by reference
    fn find_target(
        &self,
        ctx: &ExecContext,
        target: &TargetRef,
    ) -> Result<TargetRecord, ClientError>;

    /// Create or update a target
    fn upsert_target(
        &self,
        ctx: &ExecContext,
        target: &TargetRecord,
    ) -> Result<TargetRecord, ClientError>;
}
