//! Plugin manager interface
//!
//! Loading and sandboxing plugins happens outside the core. The core sees a
//! manager that lists, fetches and sub-scopes plugins, and the capability
//! traits the fetched values implement.

use crate::dispatch::{Converter, DynFunc, Value};
use basis_types::ComponentKind;
use std::fmt;
use std::sync::Arc;

/// Plugin manager failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    /// No plugin registered under that name and kind
    #[error("plugin not found: {kind} {name}")]
    NotFound {
        /// Capability kind
        kind: ComponentKind,
        /// Plugin name
        name: String,
    },

    /// The plugin does not implement the requested capability
    #[error("plugin {name} is not a {expected}")]
    WrongKind {
        /// Plugin name
        name: String,
        /// Capability the caller asked for
        expected: ComponentKind,
    },

    /// The plugin reported a failure
    #[error("plugin {name} failed: {message}")]
    Failed {
        /// Plugin name
        name: String,
        /// Failure message
        message: String,
    },

    /// The manager scope has been closed
    #[error("plugin manager scope {0} is closed")]
    Closed(String),
}

/// Name and capability kind of an installed plugin
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginInfo {
    /// Plugin name
    pub name: String,
    /// Capability kind
    pub kind: ComponentKind,
}

impl PluginInfo {
    /// Create plugin info
    #[inline]
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A command plugin
pub trait CommandPlugin: Send + Sync {
    /// Entry point for the given sub-command path
    fn execute_func(&self, sub_commands: &[String]) -> Result<DynFunc, PluginError>;
}

/// A machine provider plugin
pub trait ProviderPlugin: Send + Sync {
    /// Whether the provider can run on this host
    fn usable(&self) -> Result<bool, PluginError>;
}

/// Capability implemented by a fetched plugin
#[derive(Clone)]
pub enum PluginValue {
    /// Command implementation
    Command(Arc<dyn CommandPlugin>),
    /// Provider implementation
    Provider(Arc<dyn ProviderPlugin>),
    /// Any other capability, opaque to the core
    Opaque(Value),
}

impl fmt::Debug for PluginValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(_) => f.write_str("Command(..)"),
            Self::Provider(_) => f.write_str("Provider(..)"),
            Self::Opaque(v) => f.debug_tuple("Opaque").field(v).finish(),
        }
    }
}

/// A plugin fetched from the manager
#[derive(Debug, Clone)]
pub struct Plugin {
    /// Name and kind
    pub info: PluginInfo,
    /// Implementation
    pub value: PluginValue,
    /// Converters the plugin contributes to dynamic calls
    pub mappers: Vec<Converter>,
}

impl Plugin {
    /// Create a plugin without converters
    #[must_use]
    pub fn new(info: PluginInfo, value: PluginValue) -> Self {
        Self {
            info,
            value,
            mappers: Vec::new(),
        }
    }

    /// With converters
    #[inline]
    #[must_use]
    pub fn with_mappers(mut self, mappers: Vec<Converter>) -> Self {
        self.mappers = mappers;
        self
    }
}

/// Lists, fetches and scopes plugins
pub trait PluginManager: Send + Sync {
    /// Installed plugins of `kind`, in discovery priority order
    fn list_plugins(&self, kind: ComponentKind) -> Result<Vec<PluginInfo>, PluginError>;

    /// Fetch plugin `name` of `kind`
    fn get_plugin(&self, name: &str, kind: ComponentKind) -> Result<Plugin, PluginError>;

    /// Create an isolated child scope
    fn sub(&self, name: &str) -> Result<Arc<dyn PluginManager>, PluginError>;

    /// Close this scope
    fn close(&self) -> Result<(), PluginError>;
}
