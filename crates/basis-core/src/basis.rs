//! Basis: the environment root
//!
//! A basis binds a plugin manager scope and a persistence client, owns the
//! projects loaded within it and performs every dynamic call issued below it.

use crate::client::{ClientError, PersistenceClient};
use crate::closer::{Closer, Closers};
use crate::component::Component;
use crate::config::CoreConfig;
use crate::context::ExecContext;
use crate::datadir::DataDir;
use crate::dispatch::{DynFunc, Scope, TypeTag, Value};
use crate::error::{CoreError, ErrorSet};
use crate::machine::{Capability, Machine, Specialized, Specializer};
use crate::plugin::PluginManager;
use crate::project::{Project, ProjectOption};
use crate::target::Target;
use crate::ui::{StatusGuard, Ui};
use basis_types::{BasisRecord, BasisRef, ComponentKind, ProjectRef};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::Span;

/// Collaborators a basis is built from
#[derive(Clone)]
pub struct BasisParts {
    /// Execution context inherited by every operation
    pub ctx: ExecContext,
    /// Persistence service
    pub client: Arc<dyn PersistenceClient>,
    /// Plugin manager scope owned by the basis
    pub plugins: Arc<dyn PluginManager>,
    /// Terminal UI
    pub ui: Arc<dyn Ui>,
    /// Core configuration
    pub config: Arc<CoreConfig>,
}

impl fmt::Debug for BasisParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasisParts")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Option applied while building a basis
///
/// `Ref` is applied first, so a `Name` given alongside it overrides the
/// referenced name.
pub enum BasisOption {
    /// Basis name
    Name(String),
    /// Resolve by reference
    Ref(BasisRef),
    /// Filesystem location recorded on a new basis
    Path(String),
    /// Explicit data directory
    DataDir(PathBuf),
    /// Cleanup action run on close
    Closer(Closer),
}

impl BasisOption {
    fn phase(&self) -> u8 {
        match self {
            Self::Ref(_) => 0,
            Self::Name(_) => 1,
            _ => 2,
        }
    }
}

impl fmt::Debug for BasisOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Self::Ref(r) => f.debug_tuple("Ref").field(r).finish(),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::DataDir(dir) => f.debug_tuple("DataDir").field(dir).finish(),
            Self::Closer(_) => f.write_str("Closer(..)"),
        }
    }
}

/// Handle to a basis
#[derive(Clone)]
pub struct Basis {
    inner: Arc<BasisInner>,
}

struct BasisInner {
    ctx: ExecContext,
    client: Arc<dyn PersistenceClient>,
    plugins: Arc<dyn PluginManager>,
    ui: Arc<dyn Ui>,
    config: Arc<CoreConfig>,
    record: RwLock<BasisRecord>,
    dir: DataDir,
    projects: Mutex<HashMap<String, Project>>,
    closers: Closers,
    specializers: RwLock<HashMap<Capability, Specializer>>,
    span: Span,
}

/// Non-owning back-reference to a basis
#[derive(Clone)]
pub(crate) struct WeakBasis(Weak<BasisInner>);

impl WeakBasis {
    pub(crate) fn upgrade(&self) -> Result<Basis, CoreError> {
        self.0
            .upgrade()
            .map(|inner| Basis { inner })
            .ok_or(CoreError::Detached("basis"))
    }
}

impl Basis {
    /// Resolve or create a basis from `options`
    ///
    /// Option errors are collected and reported together.
    pub fn new(parts: BasisParts, mut options: Vec<BasisOption>) -> Result<Self, CoreError> {
        parts.ctx.check()?;
        options.sort_by_key(BasisOption::phase);

        let mut reference = BasisRef::default();
        let mut data_dir = None;
        let closers = Closers::new();
        let mut errors = ErrorSet::new();

        for option in options {
            match option {
                BasisOption::Ref(r) => {
                    if !r.resource_id.is_empty() {
                        reference.resource_id = r.resource_id;
                    }
                    if !r.name.is_empty() {
                        reference.name = r.name;
                    }
                    if !r.path.is_empty() {
                        reference.path = r.path;
                    }
                }
                BasisOption::Name(name) => {
                    if name.is_empty() {
                        errors.push(CoreError::InvalidOption(
                            "basis name cannot be empty".to_string(),
                        ));
                    } else {
                        reference.name = name;
                    }
                }
                BasisOption::Path(path) => reference.path = path,
                BasisOption::DataDir(dir) => data_dir = Some(dir),
                BasisOption::Closer(closer) => closers.push(closer),
            }
        }
        if reference.name.is_empty() && reference.resource_id.is_empty() {
            errors.push(CoreError::InvalidOption(
                "basis requires a name or reference".to_string(),
            ));
        }
        errors.into_result()?;

        let record = match parts.client.find_basis(&parts.ctx, &reference) {
            Ok(found) => found,
            Err(ClientError::NotFound(_)) => {
                let request = BasisRecord {
                    resource_id: reference.resource_id.clone(),
                    name: reference.name.clone(),
                    path: reference.path.clone(),
                    projects: Vec::new(),
                };
                parts.client.upsert_basis(&parts.ctx, &request)?
            }
            Err(e) => return Err(e.into()),
        };

        let dir = match data_dir {
            Some(dir) => DataDir::new(dir),
            None => DataDir::basis(
                &parts.config.data_dir,
                if record.name.is_empty() {
                    &record.resource_id
                } else {
                    &record.name
                },
            ),
        };
        dir.ensure()?;

        let span = tracing::info_span!(
            "basis",
            basis = %record.name,
            resource_id = %record.resource_id,
        );
        span.in_scope(|| tracing::debug!(data_dir = %dir.path().display(), "basis loaded"));

        Ok(Self {
            inner: Arc::new(BasisInner {
                ctx: parts.ctx,
                client: parts.client,
                plugins: parts.plugins,
                ui: parts.ui,
                config: parts.config,
                record: RwLock::new(record),
                dir,
                projects: Mutex::new(HashMap::new()),
                closers,
                specializers: RwLock::new(HashMap::new()),
                span,
            }),
        })
    }

    /// Basis name
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.record.read().name.clone()
    }

    /// Server-assigned resource id
    #[must_use]
    pub fn resource_id(&self) -> String {
        self.inner.record.read().resource_id.clone()
    }

    /// Reference to this basis
    #[must_use]
    pub fn ref_(&self) -> BasisRef {
        self.inner.record.read().to_ref()
    }

    /// Snapshot of the record
    #[must_use]
    pub fn record(&self) -> BasisRecord {
        self.inner.record.read().clone()
    }

    /// Data directory
    #[inline]
    #[must_use]
    pub fn data_dir(&self) -> &DataDir {
        &self.inner.dir
    }

    /// Core configuration
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    /// Terminal UI
    #[must_use]
    pub fn ui(&self) -> Arc<dyn Ui> {
        Arc::clone(&self.inner.ui)
    }

    /// Plugin manager scope
    #[must_use]
    pub fn plugins(&self) -> Arc<dyn PluginManager> {
        Arc::clone(&self.inner.plugins)
    }

    pub(crate) fn ctx(&self) -> ExecContext {
        self.inner.ctx.clone()
    }

    pub(crate) fn client(&self) -> Arc<dyn PersistenceClient> {
        Arc::clone(&self.inner.client)
    }

    pub(crate) fn span(&self) -> &Span {
        &self.inner.span
    }

    pub(crate) fn downgrade(&self) -> WeakBasis {
        WeakBasis(Arc::downgrade(&self.inner))
    }

    /// Register a cleanup action
    pub fn closer(&self, closer: Closer) {
        self.inner.closers.push(closer);
    }

    /// Load a project from options
    pub fn load_project(&self, options: Vec<ProjectOption>) -> Result<Project, CoreError> {
        Project::load(self, options)
    }

    /// Project `name`, loading or creating it when needed
    pub fn project(&self, name: &str) -> Result<Project, CoreError> {
        self.load_project(vec![ProjectOption::Name(name.to_string())])
    }

    /// Every project recorded for this basis, loading each on demand
    pub fn projects(&self) -> Result<Vec<Project>, CoreError> {
        self.refresh()?;
        let refs = self.inner.record.read().projects.clone();
        refs.into_iter()
            .map(|r| self.load_project(vec![ProjectOption::Ref(r)]))
            .collect()
    }

    /// Loaded projects, in no particular order
    #[must_use]
    pub fn loaded_projects(&self) -> Vec<Project> {
        self.inner.projects.lock().values().cloned().collect()
    }

    pub(crate) fn loaded_project(&self, reference: &ProjectRef) -> Option<Project> {
        let projects = self.inner.projects.lock();
        if !reference.name.is_empty() {
            return projects.get(&reference.name).cloned();
        }
        projects
            .values()
            .find(|p| p.resource_id() == reference.resource_id)
            .cloned()
    }

    /// Insert `project` unless one with its name is already loaded
    pub(crate) fn register_project(&self, project: Project) -> Project {
        let mut projects = self.inner.projects.lock();
        projects.entry(project.name()).or_insert(project).clone()
    }

    pub(crate) fn forget_project(&self, project: &Project) {
        let mut projects = self.inner.projects.lock();
        let name = project.name();
        if projects.get(&name).is_some_and(|p| p == project) {
            projects.remove(&name);
        }
    }

    /// Component `name` of `kind` from the plugin manager
    pub fn component(&self, kind: ComponentKind, name: &str) -> Result<Component, CoreError> {
        let plugin = self.inner.plugins.get_plugin(name, kind)?;
        Ok(Component::from_plugin(plugin))
    }

    /// Every component of `kind`, in discovery order
    pub fn components(&self, kind: ComponentKind) -> Result<Vec<Component>, CoreError> {
        self.inner
            .plugins
            .list_plugins(kind)?
            .into_iter()
            .map(|info| self.component(kind, &info.name))
            .collect()
    }

    /// Register how targets are specialized into `capability`
    ///
    /// The built-in [`Capability::Machine`] cannot be replaced.
    pub fn register_specializer(
        &self,
        capability: Capability,
        specializer: Specializer,
    ) -> Result<(), CoreError> {
        if capability == Capability::Machine {
            return Err(CoreError::InvalidOption(
                "the machine capability is built in".to_string(),
            ));
        }
        self.inner
            .specializers
            .write()
            .insert(capability, specializer);
        Ok(())
    }

    pub(crate) fn specialize_target(
        &self,
        target: &Target,
        capability: Capability,
    ) -> Result<Specialized, CoreError> {
        match capability {
            Capability::Machine => Ok(Specialized::Machine(Arc::new(Machine::new(target)))),
            Capability::Custom(tag) => {
                let specializer = self
                    .inner
                    .specializers
                    .read()
                    .get(&capability)
                    .cloned()
                    .ok_or_else(|| CoreError::not_found("specializer", tag))?;
                specializer(target).map(Specialized::Custom)
            }
        }
    }

    /// Invoke `func` with basis bindings added to `scope`
    ///
    /// A status scope is held open on the UI for the duration of the call.
    pub fn call_dynamic(
        &self,
        ctx: &ExecContext,
        func: &DynFunc,
        mut scope: Scope,
    ) -> Result<Value, CoreError> {
        let _status = StatusGuard::open(self.inner.ui.as_ref());
        let _enter = self.inner.span.enter();
        ctx.check()?;

        let basis = Value::new(TypeTag::Basis, self.clone());
        let ui = Value::new(TypeTag::Ui, Arc::clone(&self.inner.ui));
        scope.add_named("basis", basis.clone());
        scope.add_named("basis_ui", ui.clone());
        scope.add_typed(basis);
        scope.add_typed(Value::new(TypeTag::Context, ctx.clone()));
        scope.add_typed(ui);

        tracing::debug!(func = func.name(), "dynamic call");
        Ok(scope.call(func)?)
    }

    /// Re-read the persisted record
    pub fn refresh(&self) -> Result<(), CoreError> {
        let reference = self.ref_();
        let found = self.inner.client.find_basis(&self.inner.ctx, &reference)?;
        *self.inner.record.write() = found;
        Ok(())
    }

    /// Persist the record, adopting the stored result
    pub fn save(&self) -> Result<(), CoreError> {
        let request = self.record();
        let saved = self.inner.client.upsert_basis(&self.inner.ctx, &request)?;
        *self.inner.record.write() = saved;
        Ok(())
    }

    /// Close every loaded project, then run cleanup actions
    ///
    /// Every project and action is attempted; failures are aggregated.
    pub fn close(&self) -> Result<(), CoreError> {
        let _enter = self.inner.span.enter();
        tracing::debug!("closing basis");

        let mut errors = ErrorSet::new();
        for project in self.loaded_projects() {
            errors.record(project.close());
        }
        self.inner.closers.run(&mut errors);

        if !errors.is_empty() {
            tracing::warn!(failures = errors.len(), "basis closed with errors");
        }
        errors.into_result()
    }
}

impl PartialEq for Basis {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Basis {}

impl fmt::Debug for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.inner.record.read();
        f.debug_struct("Basis")
            .field("name", &record.name)
            .field("resource_id", &record.resource_id)
            .finish_non_exhaustive()
    }
}
