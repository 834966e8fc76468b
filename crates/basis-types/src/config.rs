//! Project configuration
//!
//! Already-parsed machine definitions. Parsing the configuration file itself
//! happens elsewhere; the core only reads these values.

use serde::{Deserialize, Serialize};

/// Parsed project configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Path of the configuration file this was parsed from
    #[serde(default)]
    pub path: String,
    /// Machine definitions, in declaration order
    #[serde(default)]
    pub machine_configs: Vec<MachineConfig>,
}

impl ProjectConfig {
    /// Create configuration from machine definitions
    #[inline]
    #[must_use]
    pub fn new(machine_configs: Vec<MachineConfig>) -> Self {
        Self {
            path: String::new(),
            machine_configs,
        }
    }
}

/// A single machine definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Machine name
    pub name: String,
    /// VM settings
    #[serde(default)]
    pub config_vm: VmConfig,
}

impl MachineConfig {
    /// Machine named `name` with no provider blocks
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_vm: VmConfig::default(),
        }
    }

    /// Append a provider block
    #[inline]
    #[must_use]
    pub fn with_provider(mut self, provider_type: impl Into<String>) -> Self {
        self.config_vm.providers.push(ProviderConfig {
            provider_type: provider_type.into(),
        });
        self
    }

    /// Declared provider types in declaration order
    pub fn provider_types(&self) -> impl Iterator<Item = &str> {
        self.config_vm
            .providers
            .iter()
            .map(|p| p.provider_type.as_str())
    }
}

/// VM section of a machine definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    /// Box (image) name
    #[serde(default, rename = "box")]
    pub box_name: String,
    /// Provider blocks, in declaration order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// A provider block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider type name (e.g. `virtualbox`)
    #[serde(rename = "type")]
    pub provider_type: String,
}
