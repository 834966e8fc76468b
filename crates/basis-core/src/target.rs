//! Targets: leaf resources within a project
//!
//! A target holds its persisted record, a data directory, cleanup actions and
//! a cache of capability specializations. Loading is driven by
//! [`TargetOption`]s through [`Project::load_target`].

use crate::client::{ClientError, PersistenceClient};
use crate::closer::{Closer, Closers};
use crate::context::ExecContext;
use crate::datadir::DataDir;
use crate::dispatch::{DynFunc, Scope, TypeTag, Value};
use crate::error::{CoreError, ErrorSet};
use crate::machine::{Capability, Machine, Specialized};
use crate::project::{Project, WeakProject};
use basis_types::{MachineConfig, TargetRecord, TargetRef, TargetState};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::Span;

/// Option applied while loading a target
///
/// Identity options (`Ref`, `Name`) are applied before the others regardless
/// of the order given.
#[derive(Debug, Clone)]
pub enum TargetOption {
    /// Resolve an existing target by reference
    Ref(TargetRef),
    /// Find or create a target by name
    Name(String),
    /// Assign a provider; ignored when empty or when the target is active
    Provider(String),
    /// Machine configuration
    Configuration(MachineConfig),
    /// Explicit data directory
    DataDir(PathBuf),
}

impl TargetOption {
    fn phase(&self) -> u8 {
        match self {
            Self::Ref(_) | Self::Name(_) => 0,
            _ => 1,
        }
    }
}

/// Non-owning back-reference to a target
#[derive(Clone)]
pub(crate) struct WeakTarget(Weak<TargetInner>);

impl WeakTarget {
    pub(crate) fn upgrade(&self) -> Result<Target, CoreError> {
        self.0
            .upgrade()
            .map(|inner| Target { inner })
            .ok_or(CoreError::Detached("target"))
    }
}

/// Handle to a loaded target
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

struct TargetInner {
    project: WeakProject,
    ctx: ExecContext,
    client: Arc<dyn PersistenceClient>,
    record: RwLock<TargetRecord>,
    dir: DataDir,
    cache: Mutex<HashMap<Capability, Specialized>>,
    closers: Closers,
    span: Span,
}

impl Target {
    /// Build, register and return a target, or the already-loaded instance
    /// with the same resource id
    pub(crate) fn load(
        project: &Project,
        mut options: Vec<TargetOption>,
    ) -> Result<Self, CoreError> {
        let ctx = project.ctx();
        ctx.check()?;
        options.sort_by_key(TargetOption::phase);

        let client = project.client();
        let mut record: Option<TargetRecord> = None;
        let mut provider = None;
        let mut configuration = None;
        let mut data_dir = None;
        let mut errors = ErrorSet::new();

        for option in options {
            match option {
                TargetOption::Ref(mut reference) => {
                    reference.project = project.ref_();
                    if let Some(loaded) = project.loaded_target(&reference.resource_id) {
                        record = Some(loaded.record());
                        continue;
                    }
                    match client.find_target(&ctx, &reference) {
                        Ok(found) => record = Some(found),
                        Err(ClientError::NotFound(_)) => errors.push(CoreError::not_found(
                            "target",
                            if reference.name.is_empty() {
                                reference.resource_id
                            } else {
                                reference.name
                            },
                        )),
                        Err(e) => errors.push(e),
                    }
                }
                TargetOption::Name(name) => {
                    if name.is_empty() {
                        errors.push(CoreError::InvalidOption(
                            "target name cannot be empty".to_string(),
                        ));
                        continue;
                    }
                    let reference = TargetRef::named(name.clone(), project.ref_());
                    match client.find_target(&ctx, &reference) {
                        Ok(found) => record = Some(found),
                        Err(ClientError::NotFound(_)) => {
                            let request = TargetRecord {
                                name,
                                project: project.ref_(),
                                ..TargetRecord::default()
                            };
                            record = errors.record(client.upsert_target(&ctx, &request));
                        }
                        Err(e) => errors.push(e),
                    }
                }
                TargetOption::Provider(name) => {
                    if !name.is_empty() {
                        provider = Some(name);
                    }
                }
                TargetOption::Configuration(config) => configuration = Some(config),
                TargetOption::DataDir(dir) => data_dir = Some(dir),
            }
        }
        errors.into_result()?;

        let mut record = record.ok_or_else(|| {
            CoreError::InvalidOption("target requires a name or reference".to_string())
        })?;
        if record.project.resource_id != project.resource_id() {
            return Err(CoreError::ConfigurationInvalid(format!(
                "target {} belongs to {}, not {}",
                record.name,
                record.project,
                project.ref_()
            )));
        }
        if let Some(provider) = provider {
            if !record.state.is_active() {
                record.provider = provider;
            }
        }
        if let Some(config) = configuration {
            record.configuration = Some(config);
        }

        let dir = match data_dir {
            Some(dir) => DataDir::new(dir),
            None => project.data_dir().target(if record.name.is_empty() {
                &record.resource_id
            } else {
                &record.name
            }),
        };
        dir.ensure()?;

        let span = tracing::info_span!(
            parent: project.span(),
            "target",
            target_name = %record.name,
            resource_id = %record.resource_id,
        );
        let shell = Self {
            inner: Arc::new(TargetInner {
                project: project.downgrade(),
                ctx,
                client,
                record: RwLock::new(record),
                dir,
                cache: Mutex::new(HashMap::new()),
                closers: Closers::new(),
                span,
            }),
        };

        let target = project.register_target(shell);
        Ok(target)
    }

    pub(crate) fn downgrade(&self) -> WeakTarget {
        WeakTarget(Arc::downgrade(&self.inner))
    }

    /// Attach the close-time save; called once, after registration wins
    pub(crate) fn attach_save(&self) {
        let weak = self.downgrade();
        self.inner.closers.push(Box::new(move || match weak.upgrade() {
            Ok(target) => target.save(),
            Err(_) => Ok(()),
        }));
        tracing::debug!(parent: &self.inner.span, "target loaded");
    }

    /// Target name
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.record.read().name.clone()
    }

    /// Server-assigned resource id
    #[must_use]
    pub fn resource_id(&self) -> String {
        self.inner.record.read().resource_id.clone()
    }

    /// Provider-side machine id
    #[must_use]
    pub fn uuid(&self) -> String {
        self.inner.record.read().uuid.clone()
    }

    /// Assigned provider name, empty when not yet chosen
    #[must_use]
    pub fn provider_name(&self) -> String {
        self.inner.record.read().provider.clone()
    }

    /// Assign a provider in memory; persisted by the next save
    pub fn set_provider(&self, provider: impl Into<String>) {
        let provider = provider.into();
        tracing::debug!(parent: &self.inner.span, provider = %provider, "provider assigned");
        self.update(|record| record.provider = provider);
    }

    /// Activity state
    #[must_use]
    pub fn state(&self) -> TargetState {
        self.inner.record.read().state
    }

    /// Check if the target has a live backing resource
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Machine configuration
    #[must_use]
    pub fn configuration(&self) -> Option<MachineConfig> {
        self.inner.record.read().configuration.clone()
    }

    /// Snapshot of the record
    #[must_use]
    pub fn record(&self) -> TargetRecord {
        self.inner.record.read().clone()
    }

    /// Reference to this target
    #[must_use]
    pub fn ref_(&self) -> TargetRef {
        self.inner.record.read().to_ref()
    }

    /// Owning project
    pub fn project(&self) -> Result<Project, CoreError> {
        self.inner.project.upgrade()
    }

    /// Data directory
    #[inline]
    #[must_use]
    pub fn data_dir(&self) -> &DataDir {
        &self.inner.dir
    }

    /// Register a cleanup action, run on close after the implicit save
    pub fn closer(&self, closer: Closer) {
        self.inner.closers.push(closer);
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut TargetRecord)) {
        f(&mut *self.inner.record.write());
    }

    /// Persist the record, adopting the stored result
    pub fn save(&self) -> Result<(), CoreError> {
        let _enter = self.inner.span.enter();
        let request = self.record();
        let saved = self.inner.client.upsert_target(&self.inner.ctx, &request)?;
        *self.inner.record.write() = saved;
        tracing::trace!("target saved");
        Ok(())
    }

    /// Capability-typed view of this target
    ///
    /// Repeated requests for one capability return the same instance for the
    /// lifetime of the target.
    pub fn specialize(&self, capability: Capability) -> Result<Specialized, CoreError> {
        if let Some(hit) = self.inner.cache.lock().get(&capability) {
            return Ok(hit.clone());
        }
        let built = self.project()?.basis()?.specialize_target(self, capability)?;
        let mut cache = self.inner.cache.lock();
        Ok(cache.entry(capability).or_insert(built).clone())
    }

    /// Machine view of this target
    pub fn machine(&self) -> Result<Arc<Machine>, CoreError> {
        self.specialize(Capability::Machine)?
            .as_machine()
            .ok_or_else(|| {
                CoreError::ConfigurationInvalid(
                    "machine capability produced a non-machine value".to_string(),
                )
            })
    }

    /// Invoke `func` with target bindings added to `scope`
    pub fn call_dynamic(
        &self,
        ctx: &ExecContext,
        func: &DynFunc,
        mut scope: Scope,
    ) -> Result<Value, CoreError> {
        let value = Value::new(TypeTag::Target, self.clone());
        scope.add_named("target", value.clone());
        scope.add_typed(value);
        scope.add_typed(Value::new(TypeTag::Machine, self.machine()?));
        self.project()?.call_dynamic(ctx, func, scope)
    }

    /// Save the target and run its cleanup actions
    ///
    /// Cached specializations are dropped afterwards.
    pub fn close(&self) -> Result<(), CoreError> {
        let _enter = self.inner.span.enter();
        tracing::debug!("closing target");
        let mut errors = ErrorSet::new();
        self.inner.closers.run(&mut errors);
        self.inner.cache.lock().clear();
        errors.into_result()
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Target {}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.inner.record.read();
        f.debug_struct("Target")
            .field("name", &record.name)
            .field("resource_id", &record.resource_id)
            .field("provider", &record.provider)
            .field("state", &record.state)
            .finish_non_exhaustive()
    }
}
