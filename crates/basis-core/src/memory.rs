//! In-memory collaborators
//!
//! A persistence client, plugin manager and UI that keep everything in
//! process, plus fixtures wiring them into a basis. Used by the integration
//! tests and by the `basis` binary.

use crate::basis::{Basis, BasisParts};
use crate::client::{ClientError, PersistenceClient};
use crate::config::CoreConfig;
use crate::context::ExecContext;
use crate::dispatch::DynFunc;
use crate::error::CoreError;
use crate::factory::Factory;
use crate::plugin::{
    CommandPlugin, Plugin, PluginError, PluginInfo, PluginManager, PluginValue, ProviderPlugin,
};
use crate::project::Project;
use crate::target::{Target, TargetOption};
use crate::ui::{StatusScope, Ui};
use basis_types::{
    BasisRecord, BasisRef, ComponentKind, ProjectRecord, ProjectRef, Status, TargetRecord,
    TargetRef, TargetState,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use ulid::Ulid;

#[derive(Debug, Default)]
struct Store {
    bases: Vec<BasisRecord>,
    projects: Vec<ProjectRecord>,
    targets: Vec<TargetRecord>,
}

fn new_id() -> String {
    Ulid::new().to_string()
}

fn basis_matches(stored: &BasisRef, wanted: &BasisRef) -> bool {
    if !wanted.resource_id.is_empty() {
        stored.resource_id == wanted.resource_id
    } else {
        stored.name == wanted.name
    }
}

fn project_matches(stored: &ProjectRef, wanted: &ProjectRef) -> bool {
    if !wanted.resource_id.is_empty() {
        stored.resource_id == wanted.resource_id
    } else {
        stored.name == wanted.name && basis_matches(&stored.basis, &wanted.basis)
    }
}

fn push_unique<T, F>(list: &mut Vec<T>, item: T, same: F)
where
    F: Fn(&T, &T) -> bool,
{
    match list.iter_mut().find(|existing| same(existing, &item)) {
        Some(existing) => *existing = item,
        None => list.push(item),
    }
}

impl Store {
    fn find_basis(&self, wanted: &BasisRef) -> Option<usize> {
        let by_id = (!wanted.resource_id.is_empty())
            .then(|| {
                self.bases
                    .iter()
                    .position(|b| b.resource_id == wanted.resource_id)
            })
            .flatten();
        by_id.or_else(|| {
            (!wanted.name.is_empty())
                .then(|| self.bases.iter().position(|b| b.name == wanted.name))
                .flatten()
        })
    }

    fn find_project(&self, wanted: &ProjectRef) -> Option<usize> {
        let by_id = (!wanted.resource_id.is_empty())
            .then(|| {
                self.projects
                    .iter()
                    .position(|p| p.resource_id == wanted.resource_id)
            })
            .flatten();
        by_id.or_else(|| {
            (!wanted.name.is_empty())
                .then(|| {
                    self.projects.iter().position(|p| {
                        p.name == wanted.name && basis_matches(&p.basis, &wanted.basis)
                    })
                })
                .flatten()
        })
    }

    fn find_target(&self, wanted: &TargetRef) -> Option<usize> {
        let by_id = (!wanted.resource_id.is_empty())
            .then(|| {
                self.targets
                    .iter()
                    .position(|t| t.resource_id == wanted.resource_id)
            })
            .flatten();
        by_id.or_else(|| {
            (!wanted.name.is_empty())
                .then(|| {
                    self.targets.iter().position(|t| {
                        t.name == wanted.name && project_matches(&t.project, &wanted.project)
                    })
                })
                .flatten()
        })
    }
}

/// Thread-safe in-memory persistence service
///
/// Resource ids are ULIDs unless the request supplies one.
#[derive(Default)]
pub struct MemoryClient {
    store: Mutex<Store>,
    failing_targets: Mutex<HashSet<String>>,
    target_upserts: AtomicUsize,
}

impl MemoryClient {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upsert of target `name` fail with an error status
    pub fn fail_target_upserts(&self, name: impl Into<String>) {
        self.failing_targets.lock().insert(name.into());
    }

    /// Stop failing upserts of target `name`
    pub fn heal_target_upserts(&self, name: &str) {
        self.failing_targets.lock().remove(name);
    }

    /// Number of target upserts answered so far
    #[must_use]
    pub fn target_upserts(&self) -> usize {
        self.target_upserts.load(Ordering::SeqCst)
    }

    /// Store a project record verbatim, bypassing upsert merging
    pub fn insert_project(&self, mut record: ProjectRecord) -> ProjectRecord {
        if record.resource_id.is_empty() {
            record.resource_id = new_id();
        }
        self.store.lock().projects.push(record.clone());
        record
    }

    /// Stored target records
    #[must_use]
    pub fn stored_targets(&self) -> Vec<TargetRecord> {
        self.store.lock().targets.clone()
    }

    fn check(ctx: &ExecContext) -> Result<(), ClientError> {
        if ctx.is_cancelled() {
            Err(ClientError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl PersistenceClient for MemoryClient {
    fn find_basis(&self, ctx: &ExecContext, basis: &BasisRef) -> Result<BasisRecord, ClientError> {
        Self::check(ctx)?;
        let store = self.store.lock();
        store
            .find_basis(basis)
            .map(|i| store.bases[i].clone())
            .ok_or_else(|| ClientError::NotFound(basis.to_string()))
    }

    fn upsert_basis(
        &self,
        ctx: &ExecContext,
        basis: &BasisRecord,
    ) -> Result<BasisRecord, ClientError> {
        Self::check(ctx)?;
        let mut store = self.store.lock();
        let stored = match store.find_basis(&basis.to_ref()) {
            Some(i) => {
                let stored = &mut store.bases[i];
                if !basis.name.is_empty() {
                    stored.name.clone_from(&basis.name);
                }
                if !basis.path.is_empty() {
                    stored.path.clone_from(&basis.path);
                }
                for project in &basis.projects {
                    push_unique(&mut stored.projects, project.clone(), |a, b| {
                        a.resource_id == b.resource_id
                    });
                }
                stored.clone()
            }
            None => {
                let mut record = basis.clone();
                if record.resource_id.is_empty() {
                    record.resource_id = new_id();
                }
                store.bases.push(record.clone());
                record
            }
        };
        Ok(stored)
    }

    fn find_project(
        &self,
        ctx: &ExecContext,
        project: &ProjectRef,
    ) -> Result<ProjectRecord, ClientError> {
        Self::check(ctx)?;
        let store = self.store.lock();
        store
            .find_project(project)
            .map(|i| store.projects[i].clone())
            .ok_or_else(|| ClientError::NotFound(project.to_string()))
    }

    fn upsert_project(
        &self,
        ctx: &ExecContext,
        project: &ProjectRecord,
    ) -> Result<ProjectRecord, ClientError> {
        Self::check(ctx)?;
        let mut store = self.store.lock();
        let stored = match store.find_project(&project.to_ref()) {
            Some(i) => {
                let stored = &mut store.projects[i];
                if !project.name.is_empty() {
                    stored.name.clone_from(&project.name);
                }
                if !project.path.is_empty() {
                    stored.path.clone_from(&project.path);
                }
                if project.configuration.is_some() {
                    stored.configuration.clone_from(&project.configuration);
                }
                for target in &project.targets {
                    push_unique(&mut stored.targets, target.clone(), |a, b| {
                        a.resource_id == b.resource_id
                    });
                }
                stored.clone()
            }
            None => {
                let mut record = project.clone();
                if record.resource_id.is_empty() {
                    record.resource_id = new_id();
                }
                store.projects.push(record.clone());
                record
            }
        };

        if let Some(i) = store.find_basis(&stored.basis) {
            push_unique(&mut store.bases[i].projects, stored.to_ref(), |a, b| {
                a.resource_id == b.resource_id
            });
        }
        Ok(stored)
    }

    fn find_target(
        &self,
        ctx: &ExecContext,
        target: &TargetRef,
    ) -> Result<TargetRecord, ClientError> {
        Self::check(ctx)?;
        let store = self.store.lock();
        store
            .find_target(target)
            .map(|i| store.targets[i].clone())
            .ok_or_else(|| ClientError::NotFound(target.to_string()))
    }

    fn upsert_target(
        &self,
        ctx: &ExecContext,
        target: &TargetRecord,
    ) -> Result<TargetRecord, ClientError> {
        Self::check(ctx)?;
        if self.failing_targets.lock().contains(&target.name) {
            return Err(ClientError::Status(Status::new(
                13,
                format!("upsert of target {} rejected", target.name),
            )));
        }
        self.target_upserts.fetch_add(1, Ordering::SeqCst);

        let mut store = self.store.lock();
        let stored = match store.find_target(&target.to_ref()) {
            Some(i) => {
                let stored = &mut store.targets[i];
                if !target.name.is_empty() {
                    stored.name.clone_from(&target.name);
                }
                if !target.uuid.is_empty() {
                    stored.uuid.clone_from(&target.uuid);
                }
                if !target.provider.is_empty() {
                    stored.provider.clone_from(&target.provider);
                }
                if target.state != TargetState::Unknown {
                    stored.state = target.state;
                }
                if target.configuration.is_some() {
                    stored.configuration.clone_from(&target.configuration);
                }
                stored.clone()
            }
            None => {
                let mut record = target.clone();
                if record.resource_id.is_empty() {
                    record.resource_id = new_id();
                }
                store.targets.push(record.clone());
                record
            }
        };

        if let Some(i) = store.find_project(&stored.project) {
            push_unique(&mut store.projects[i].targets, stored.to_ref(), |a, b| {
                a.resource_id == b.resource_id
            });
        }
        Ok(stored)
    }
}

impl fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.store.lock();
        f.debug_struct("MemoryClient")
            .field("bases", &store.bases.len())
            .field("projects", &store.projects.len())
            .field("targets", &store.targets.len())
            .finish()
    }
}

/// Provider whose usability check returns a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct FixedProvider {
    usable: bool,
}

impl FixedProvider {
    /// Create provider
    #[inline]
    #[must_use]
    pub fn new(usable: bool) -> Self {
        Self { usable }
    }
}

impl ProviderPlugin for FixedProvider {
    fn usable(&self) -> Result<bool, PluginError> {
        Ok(self.usable)
    }
}

/// Command plugin backed by a closure
pub struct FnCommand<F> {
    func: F,
}

impl<F> FnCommand<F>
where
    F: Fn(&[String]) -> Result<DynFunc, PluginError> + Send + Sync,
{
    /// Wrap `func`
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> CommandPlugin for FnCommand<F>
where
    F: Fn(&[String]) -> Result<DynFunc, PluginError> + Send + Sync,
{
    fn execute_func(&self, sub_commands: &[String]) -> Result<DynFunc, PluginError> {
        (self.func)(sub_commands)
    }
}

#[derive(Debug, Default)]
struct ScopeStats {
    subs: AtomicUsize,
    closes: AtomicUsize,
}

/// Plugin manager over a fixed set of registrations
///
/// Sub-scopes share the registrations of their parent and report into the
/// same counters.
pub struct StaticPlugins {
    name: String,
    plugins: Arc<RwLock<Vec<Plugin>>>,
    stats: Arc<ScopeStats>,
    closed: AtomicBool,
}

impl StaticPlugins {
    /// Create an empty root scope
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "root".to_string(),
            plugins: Arc::new(RwLock::new(Vec::new())),
            stats: Arc::new(ScopeStats::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Add a plugin; listing keeps registration order
    pub fn register(&self, plugin: Plugin) {
        self.plugins.write().push(plugin);
    }

    /// Add a provider with a fixed usability answer
    pub fn register_provider(&self, name: &str, usable: bool) {
        self.register(Plugin::new(
            PluginInfo::new(name, ComponentKind::Provider),
            PluginValue::Provider(Arc::new(FixedProvider::new(usable))),
        ));
    }

    /// Add a command backed by `func`
    pub fn register_command<F>(&self, name: &str, func: F)
    where
        F: Fn(&[String]) -> Result<DynFunc, PluginError> + Send + Sync + 'static,
    {
        self.register(Plugin::new(
            PluginInfo::new(name, ComponentKind::Command),
            PluginValue::Command(Arc::new(FnCommand::new(func))),
        ));
    }

    /// Sub-scopes created from this scope tree
    #[must_use]
    pub fn subs(&self) -> usize {
        self.stats.subs.load(Ordering::SeqCst)
    }

    /// Scopes closed in this scope tree
    #[must_use]
    pub fn closes(&self) -> usize {
        self.stats.closes.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), PluginError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PluginError::Closed(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

impl Default for StaticPlugins {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginManager for StaticPlugins {
    fn list_plugins(&self, kind: ComponentKind) -> Result<Vec<PluginInfo>, PluginError> {
        self.ensure_open()?;
        Ok(self
            .plugins
            .read()
            .iter()
            .filter(|p| p.info.kind == kind)
            .map(|p| p.info.clone())
            .collect())
    }

    fn get_plugin(&self, name: &str, kind: ComponentKind) -> Result<Plugin, PluginError> {
        self.ensure_open()?;
        self.plugins
            .read()
            .iter()
            .find(|p| p.info.kind == kind && p.info.name == name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    fn sub(&self, name: &str) -> Result<Arc<dyn PluginManager>, PluginError> {
        self.ensure_open()?;
        self.stats.subs.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Self {
            name: name.to_string(),
            plugins: Arc::clone(&self.plugins),
            stats: Arc::clone(&self.stats),
            closed: AtomicBool::new(false),
        }))
    }

    fn close(&self) -> Result<(), PluginError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(PluginError::Closed(self.name.clone()));
        }
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl fmt::Debug for StaticPlugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticPlugins")
            .field("name", &self.name)
            .field("plugins", &self.plugins.read().len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

#[derive(Debug, Default)]
struct StatusLog {
    opened: AtomicUsize,
    closed: AtomicUsize,
    updates: Mutex<Vec<String>>,
}

struct RecordingStatus {
    log: Arc<StatusLog>,
}

impl StatusScope for RecordingStatus {
    fn update(&mut self, message: &str) {
        self.log.updates.lock().push(message.to_string());
    }

    fn close(&mut self) {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// UI recording every output line and status scope
#[derive(Debug, Default)]
pub struct RecordingUi {
    outputs: Mutex<Vec<String>>,
    status: Arc<StatusLog>,
}

impl RecordingUi {
    /// Create empty recorder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far
    #[must_use]
    pub fn outputs(&self) -> Vec<String> {
        self.outputs.lock().clone()
    }

    /// Status scopes opened
    #[must_use]
    pub fn opened(&self) -> usize {
        self.status.opened.load(Ordering::SeqCst)
    }

    /// Status scopes closed
    #[must_use]
    pub fn closed(&self) -> usize {
        self.status.closed.load(Ordering::SeqCst)
    }
}

impl Ui for RecordingUi {
    fn output(&self, message: &str) {
        self.outputs.lock().push(message.to_string());
    }

    fn status(&self) -> Box<dyn StatusScope> {
        self.status.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(RecordingStatus {
            log: Arc::clone(&self.status),
        })
    }
}

/// In-memory collaborators sharing one data directory root
#[derive(Debug, Clone)]
pub struct Sandbox {
    /// Execution context
    pub ctx: ExecContext,
    /// Persistence service
    pub client: Arc<MemoryClient>,
    /// Root plugin scope
    pub plugins: Arc<StaticPlugins>,
    /// Recording UI
    pub ui: Arc<RecordingUi>,
    /// Configuration rooted at the sandbox directory
    pub config: CoreConfig,
}

impl Sandbox {
    /// Sandbox storing data directories under `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            ctx: ExecContext::new(),
            client: Arc::new(MemoryClient::new()),
            plugins: Arc::new(StaticPlugins::new()),
            ui: Arc::new(RecordingUi::new()),
            config: CoreConfig::new().with_data_dir(root),
        }
    }

    /// With configuration, keeping the data directory root
    #[must_use]
    pub fn with_config(mut self, config: CoreConfig) -> Self {
        let root = std::mem::take(&mut self.config.data_dir);
        self.config = config.with_data_dir(root);
        self
    }

    /// Parts for building a basis directly
    #[must_use]
    pub fn parts(&self) -> BasisParts {
        BasisParts {
            ctx: self.ctx.clone(),
            client: Arc::clone(&self.client) as Arc<dyn PersistenceClient>,
            plugins: Arc::clone(&self.plugins) as Arc<dyn PluginManager>,
            ui: Arc::clone(&self.ui) as Arc<dyn Ui>,
            config: Arc::new(self.config.clone()),
        }
    }

    /// Factory over these collaborators
    #[must_use]
    pub fn factory(&self) -> Factory {
        Factory::new(
            self.ctx.clone(),
            Arc::clone(&self.client) as Arc<dyn PersistenceClient>,
            Arc::clone(&self.plugins) as Arc<dyn PluginManager>,
            Arc::clone(&self.ui) as Arc<dyn Ui>,
            self.config.clone(),
        )
    }
}

/// Basis named `test-basis` in `sandbox`
pub fn test_basis(sandbox: &Sandbox) -> Result<Basis, CoreError> {
    Basis::new(
        sandbox.parts(),
        vec![crate::basis::BasisOption::Name("test-basis".to_string())],
    )
}

/// Empty project named `test-project` in `basis`
pub fn test_minimal_project(basis: &Basis) -> Result<Project, CoreError> {
    basis.project("test-project")
}

/// Persist `record` under `project`, load it and refresh the project
pub fn test_target(project: &Project, mut record: TargetRecord) -> Result<Target, CoreError> {
    record.project = project.ref_();
    let stored = project.client().upsert_target(&project.ctx(), &record)?;
    let target = project.load_target(vec![TargetOption::Ref(stored.to_ref())])?;
    project.refresh()?;
    Ok(target)
}
