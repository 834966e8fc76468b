//! Basis Types - shared records for the environment manager core
//!
//! Plain data exchanged between the core and its collaborators:
//! - References addressing bases, projects and targets
//! - Persisted records as returned by the persistence service
//! - Project and machine configuration
//! - Task execution records
//!
//! Nothing in this crate performs I/O.

pub mod config;
pub mod records;
pub mod refs;
pub mod task;

pub use config::{MachineConfig, ProjectConfig, ProviderConfig, VmConfig};
pub use records::{BasisRecord, ProjectRecord, TargetRecord, TargetState};
pub use refs::{BasisRef, ProjectRef, TargetRef};
pub use task::{CliArgs, ComponentKind, ComponentRef, JobInfo, Status, Task};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
