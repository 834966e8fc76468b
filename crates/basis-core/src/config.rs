//! Core configuration

use crate::provider::ProviderEnv;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable overriding the data directory root
pub const DATA_DIR_VAR: &str = "BASIS_DATA_DIR";

/// Default name of the default-provider override variable
pub const DEFAULT_PROVIDER_VAR: &str = "BASIS_DEFAULT_PROVIDER";

/// Default name of the preferred-providers variable
pub const PREFERRED_PROVIDERS_VAR: &str = "BASIS_PREFERRED_PROVIDERS";

/// Core configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Root under which basis, project and target data directories live
    pub data_dir: PathBuf,
    /// Variable holding an exact default provider name
    pub default_provider_var: String,
    /// Variable holding comma-separated preferred provider names
    pub preferred_providers_var: String,
}

impl CoreConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration with the data directory taken from
    /// `BASIS_DATA_DIR` when set
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os(DATA_DIR_VAR).filter(|d| !d.is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        config
    }

    /// With data directory root
    #[inline]
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// With default-provider variable name
    #[inline]
    #[must_use]
    pub fn with_default_provider_var(mut self, var: impl Into<String>) -> Self {
        self.default_provider_var = var.into();
        self
    }

    /// With preferred-providers variable name
    #[inline]
    #[must_use]
    pub fn with_preferred_providers_var(mut self, var: impl Into<String>) -> Self {
        self.preferred_providers_var = var.into();
        self
    }

    /// Snapshot the provider variables from the process environment
    #[must_use]
    pub fn provider_env(&self) -> ProviderEnv {
        ProviderEnv::from_vars(&self.default_provider_var, &self.preferred_providers_var)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".basis"),
            default_provider_var: DEFAULT_PROVIDER_VAR.to_string(),
            preferred_providers_var: PREFERRED_PROVIDERS_VAR.to_string(),
        }
    }
}
