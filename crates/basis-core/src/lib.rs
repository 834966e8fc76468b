//! Basis Core - orchestration core of a pluggable environment manager
//!
//! Models a tree of managed resources and coordinates their lifecycle:
//! - A factory guaranteeing one live basis per name
//! - Bases owning projects, projects owning targets, with failure-tolerant teardown
//! - Identity-stable capability specialization of targets
//! - Dynamic dispatch of plugin functions through a layered scope chain
//! - Deterministic default-provider selection
//!
//! # Example
//!
//! ```rust,ignore
//! use basis_core::memory::Sandbox;
//! use basis_core::provider::DefaultProviderOptions;
//!
//! let sandbox = Sandbox::new("/tmp/basis");
//! sandbox.plugins.register_provider("docker", true);
//!
//! let factory = sandbox.factory();
//! let basis = factory.new_basis("default", Vec::new())?;
//! let project = basis.project("web")?;
//! let provider = project.default_provider(&DefaultProviderOptions::new())?;
//! assert_eq!(provider, "docker");
//! basis.close()?;
//! ```

// Collaborators
pub mod client;
pub mod plugin;
pub mod ui;

// Core modules
pub mod basis;
pub mod closer;
pub mod component;
pub mod config;
pub mod context;
pub mod datadir;
pub mod dispatch;
pub mod error;
pub mod factory;
pub mod machine;
pub mod project;
pub mod provider;
pub mod target;

// In-memory backend
pub mod memory;

// Re-exports for convenience
pub use basis::{Basis, BasisOption, BasisParts};
pub use client::{ClientError, PersistenceClient};
pub use closer::Closer;
pub use component::Component;
pub use config::CoreConfig;
pub use context::ExecContext;
pub use datadir::DataDir;
pub use dispatch::{
    Args, BindingKey, Converter, DispatchError, DynFunc, Input, Scope, TypeTag, Value,
};
pub use error::{AggregateError, CoreError, ErrorSet, RunError};
pub use factory::Factory;
pub use machine::{Capability, Machine, Specialized, Specializer};
pub use plugin::{
    CommandPlugin, Plugin, PluginError, PluginInfo, PluginManager, PluginValue, ProviderPlugin,
};
pub use project::{Project, ProjectOption};
pub use provider::{select_default_provider, DefaultProviderOptions, ProviderEnv};
pub use target::{Target, TargetOption};
pub use ui::{StatusGuard, StatusScope, TracingUi, Ui};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
