//! Default-provider selection
//!
//! Selection is a fixed sequence of tiers over three inputs: providers named
//! in the machine configuration, installed providers that are usable, and the
//! environment (an exact override and a preference list). The first tier
//! that yields a name wins.

use crate::error::CoreError;
use crate::project::Project;
use basis_types::ComponentKind;
use std::collections::HashSet;

/// Options for [`Project::default_provider`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultProviderOptions {
    /// Only consider this machine's configured providers
    pub machine_name: Option<String>,
    /// Installed providers to ignore
    pub excludes: HashSet<String>,
    /// Return the environment override without any check
    pub force_default: bool,
    /// Skip installed providers whose usability check fails
    pub check_usable: bool,
}

impl DefaultProviderOptions {
    /// Create default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one machine
    #[inline]
    #[must_use]
    pub fn with_machine(mut self, name: impl Into<String>) -> Self {
        self.machine_name = Some(name.into());
        self
    }

    /// Exclude a provider
    #[inline]
    #[must_use]
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excludes.insert(name.into());
        self
    }

    /// Set force-default
    #[inline]
    #[must_use]
    pub fn force_default(mut self, force: bool) -> Self {
        self.force_default = force;
        self
    }

    /// Set check-usable
    #[inline]
    #[must_use]
    pub fn check_usable(mut self, check: bool) -> Self {
        self.check_usable = check;
        self
    }

    /// Check if `name` is excluded
    #[inline]
    #[must_use]
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excludes.contains(name)
    }
}

/// Provider-related environment, read once per selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderEnv {
    /// Exact default provider override
    pub default_provider: Option<String>,
    /// Preferred providers, highest priority first
    pub preferred: Vec<String>,
}

impl ProviderEnv {
    /// Read the override and preference variables named
    #[must_use]
    pub fn from_vars(default_var: &str, preferred_var: &str) -> Self {
        let default_provider = std::env::var(default_var).ok().filter(|v| !v.is_empty());
        let preferred = std::env::var(preferred_var)
            .map(|v| Self::parse_preferred(&v))
            .unwrap_or_default();
        Self {
            default_provider,
            preferred,
        }
    }

    /// Split a comma-separated list, trimming entries and dropping empty ones
    #[must_use]
    pub fn parse_preferred(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Pick a provider from configured and usable names
///
/// `configured` keeps declaration order and may repeat names; `usable` is in
/// plugin discovery order with exclusions already removed. The forced
/// override is handled by the caller.
pub fn select_default_provider(
    env: &ProviderEnv,
    configured: &[String],
    usable: &[String],
) -> Result<String, CoreError> {
    let is_usable = |name: &str| usable.iter().any(|u| u == name);
    let is_preferred = |name: &str| env.preferred.iter().any(|p| p == name);

    if let Some(default) = env.default_provider.as_deref() {
        if is_usable(default) {
            tracing::debug!(provider = default, "using default provider from environment");
            return Ok(default.to_string());
        }
    }

    if let Some(found) = configured
        .iter()
        .find(|c| is_usable(c) && is_preferred(c))
    {
        tracing::debug!(provider = %found, "using preferred configured provider");
        return Ok(found.clone());
    }

    if let Some(found) = configured.iter().find(|c| is_usable(c)) {
        tracing::debug!(provider = %found, "using first usable configured provider");
        return Ok(found.clone());
    }

    if let Some(found) = env.preferred.iter().find(|p| is_usable(p)) {
        tracing::debug!(provider = %found, "using preferred installed provider");
        return Ok(found.clone());
    }

    if let Some(first) = usable.first() {
        tracing::debug!(provider = %first, "using highest priority usable provider");
        return Ok(first.clone());
    }

    Err(CoreError::NoDefaultProvider)
}

impl Project {
    /// Choose the provider new targets use when none is configured
    pub fn default_provider(&self, opts: &DefaultProviderOptions) -> Result<String, CoreError> {
        let basis = self.basis()?;
        let env = basis.config().provider_env();

        if opts.force_default {
            if let Some(default) = env.default_provider.clone() {
                tracing::debug!(provider = %default, "using forced default provider");
                return Ok(default);
            }
        }

        let configured: Vec<String> = self
            .config()
            .map(|config| {
                config
                    .machine_configs
                    .iter()
                    .filter(|m| opts.machine_name.as_ref().map_or(true, |n| *n == m.name))
                    .flat_map(|m| m.provider_types().map(str::to_string).collect::<Vec<_>>())
                    .collect()
            })
            .unwrap_or_default();

        let plugins = basis.plugins();
        let mut usable = Vec::new();
        for info in plugins.list_plugins(ComponentKind::Provider)? {
            if opts.is_excluded(&info.name) {
                continue;
            }
            if opts.check_usable {
                let component = basis.component(ComponentKind::Provider, &info.name)?;
                if !component.as_provider()?.usable()? {
                    tracing::debug!(provider = %info.name, "skipping unusable provider");
                    continue;
                }
            }
            usable.push(info.name);
        }
        tracing::debug!(?configured, ?usable, "provider candidates");

        select_default_provider(&env, &configured, &usable)
    }
}
