//! Plugin-backed components

use crate::dispatch::Converter;
use crate::plugin::{CommandPlugin, Plugin, PluginError, PluginInfo, PluginValue, ProviderPlugin};
use basis_types::ComponentKind;
use std::sync::Arc;

/// A loaded plugin tagged with its capability kind and name
#[derive(Debug, Clone)]
pub struct Component {
    info: PluginInfo,
    value: PluginValue,
    mappers: Vec<Converter>,
}

impl Component {
    /// Wrap a fetched plugin
    #[must_use]
    pub fn from_plugin(plugin: Plugin) -> Self {
        Self {
            info: plugin.info,
            value: plugin.value,
            mappers: plugin.mappers,
        }
    }

    /// Capability kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.info.kind
    }

    /// Plugin name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Converters contributed to dynamic calls
    #[inline]
    #[must_use]
    pub fn mappers(&self) -> &[Converter] {
        &self.mappers
    }

    /// Implementation
    #[inline]
    #[must_use]
    pub fn value(&self) -> &PluginValue {
        &self.value
    }

    /// Command implementation
    pub fn as_command(&self) -> Result<Arc<dyn CommandPlugin>, PluginError> {
        match &self.value {
            PluginValue::Command(command) => Ok(Arc::clone(command)),
            _ => Err(self.wrong_kind(ComponentKind::Command)),
        }
    }

    /// Provider implementation
    pub fn as_provider(&self) -> Result<Arc<dyn ProviderPlugin>, PluginError> {
        match &self.value {
            PluginValue::Provider(provider) => Ok(Arc::clone(provider)),
            _ => Err(self.wrong_kind(ComponentKind::Provider)),
        }
    }

    fn wrong_kind(&self, expected: ComponentKind) -> PluginError {
        PluginError::WrongKind {
            name: self.info.name.clone(),
            expected,
        }
    }
}
