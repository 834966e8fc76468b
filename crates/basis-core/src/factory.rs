//! Create-or-get registry for bases
//!
//! At most one live basis exists per resolved name. The registry lock is held
//! only for map reads and writes; construction runs unlocked, so a candidate
//! that loses a race is closed and the registered winner returned.

use crate::basis::{Basis, BasisOption, BasisParts};
use crate::client::PersistenceClient;
use crate::config::CoreConfig;
use crate::context::ExecContext;
use crate::error::CoreError;
use crate::plugin::PluginManager;
use crate::ui::Ui;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

type Registry = Mutex<HashMap<String, Basis>>;

/// Registry of live bases keyed by name
pub struct Factory {
    ctx: ExecContext,
    client: Arc<dyn PersistenceClient>,
    plugins: Arc<dyn PluginManager>,
    ui: Arc<dyn Ui>,
    config: Arc<CoreConfig>,
    registered: Arc<Registry>,
}

impl Factory {
    /// Create a factory whose bases inherit these collaborators
    pub fn new(
        ctx: ExecContext,
        client: Arc<dyn PersistenceClient>,
        plugins: Arc<dyn PluginManager>,
        ui: Arc<dyn Ui>,
        config: CoreConfig,
    ) -> Self {
        Self {
            ctx,
            client,
            plugins,
            ui,
            config: Arc::new(config),
            registered: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return the live basis named `name`, building one when missing
    ///
    /// On a registry hit `options` are ignored: the first successful creation
    /// determines configuration. An empty `name` always builds a candidate,
    /// whose resolved name is then checked against the registry.
    pub fn new_basis(&self, name: &str, options: Vec<BasisOption>) -> Result<Basis, CoreError> {
        if let Some(existing) = self.registered(name) {
            return Ok(existing);
        }

        let plugins = self.plugins.sub(name)?;
        let mut options = options;
        if !name.is_empty() {
            options.insert(0, BasisOption::Name(name.to_string()));
        }
        let parts = BasisParts {
            ctx: self.ctx.clone(),
            client: Arc::clone(&self.client),
            plugins: Arc::clone(&plugins),
            ui: Arc::clone(&self.ui),
            config: Arc::clone(&self.config),
        };

        let candidate = match Basis::new(parts, options) {
            Ok(basis) => basis,
            Err(e) => {
                if let Err(close_err) = plugins.close() {
                    tracing::warn!(error = %close_err, "failed to close plugin scope");
                }
                return Err(e);
            }
        };

        // Attached before registration; a discarded candidate's deregister
        // closer sees the winner and leaves it in place.
        let resolved = candidate.name();
        let registry: Weak<Registry> = Arc::downgrade(&self.registered);
        let handle = candidate.downgrade();
        let key = resolved.clone();
        candidate.closer(Box::new(move || {
            if let Some(registry) = registry.upgrade() {
                let mut registered = registry.lock();
                let same = match handle.upgrade() {
                    Ok(basis) => registered.get(&key).is_some_and(|b| *b == basis),
                    Err(_) => false,
                };
                if same {
                    registered.remove(&key);
                }
            }
            Ok(())
        }));
        candidate.closer(Box::new(move || Ok(plugins.close()?)));

        let winner = {
            let mut registered = self.registered.lock();
            match registered.get(&resolved) {
                Some(existing) => Some(existing.clone()),
                None => {
                    registered.insert(resolved.clone(), candidate.clone());
                    None
                }
            }
        };

        if let Some(existing) = winner {
            tracing::debug!(basis = %resolved, "discarding duplicate basis");
            if let Err(e) = candidate.close() {
                tracing::warn!(basis = %resolved, error = %e, "failed to close discarded basis");
            }
            return Ok(existing);
        }

        tracing::info!(basis = %resolved, "basis registered");
        Ok(candidate)
    }

    /// Registered basis named `name`
    #[must_use]
    pub fn registered(&self, name: &str) -> Option<Basis> {
        if name.is_empty() {
            return None;
        }
        self.registered.lock().get(name).cloned()
    }

    /// Names of every registered basis
    #[must_use]
    pub fn registered_names(&self) -> Vec<String> {
        self.registered.lock().keys().cloned().collect()
    }

    /// Number of registered bases
    #[must_use]
    pub fn len(&self) -> usize {
        self.registered.lock().len()
    }

    /// Check if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registered.lock().is_empty()
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("registered", &self.registered_names())
            .finish_non_exhaustive()
    }
}
