//! Projects: named collections of targets within a basis
//!
//! Provides:
//! - Target lookup by name or resource id, with idempotent loading
//! - Target initialisation from the project's machine configuration
//! - Task execution through dynamic dispatch
//! - Failure-tolerant close and full save

use crate::basis::{Basis, WeakBasis};
use crate::client::{ClientError, PersistenceClient};
use crate::closer::{Closer, Closers};
use crate::component::Component;
use crate::context::ExecContext;
use crate::datadir::DataDir;
use crate::dispatch::{DispatchError, DynFunc, Scope, TypeTag, Value};
use crate::error::{CoreError, ErrorSet, RunError};
use crate::target::{Target, TargetOption};
use basis_types::{
    ComponentKind, JobInfo, ProjectConfig, ProjectRecord, ProjectRef, TargetRecord, TargetRef,
    Task,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::Span;

/// Option applied while loading a project
///
/// Identity options (`Ref`, `Name`) are applied before the others regardless
/// of the order given.
#[derive(Debug, Clone)]
pub enum ProjectOption {
    /// Resolve by reference
    Ref(ProjectRef),
    /// Resolve by name, creating the project when missing
    Name(String),
    /// Explicit data directory
    DataDir(PathBuf),
    /// Job metadata used when a task carries none
    JobInfo(JobInfo),
    /// Parsed project configuration, persisted with the record
    Configuration(ProjectConfig),
}

impl ProjectOption {
    fn phase(&self) -> u8 {
        match self {
            Self::Ref(_) => 0,
            Self::Name(_) => 1,
            _ => 2,
        }
    }
}

/// Handle to a loaded project
#[derive(Clone)]
pub struct Project {
    inner: Arc<ProjectInner>,
}

struct ProjectInner {
    basis: WeakBasis,
    ctx: ExecContext,
    client: Arc<dyn PersistenceClient>,
    record: RwLock<ProjectRecord>,
    job: Option<JobInfo>,
    dir: DataDir,
    targets: Mutex<HashMap<String, Target>>,
    closers: Closers,
    span: Span,
}

/// Non-owning back-reference to a project
#[derive(Clone)]
pub(crate) struct WeakProject(Weak<ProjectInner>);

impl WeakProject {
    pub(crate) fn upgrade(&self) -> Result<Project, CoreError> {
        self.0
            .upgrade()
            .map(|inner| Project { inner })
            .ok_or(CoreError::Detached("project"))
    }
}

impl Project {
    /// Resolve, register and return a project, or the already-loaded instance
    pub(crate) fn load(basis: &Basis, mut options: Vec<ProjectOption>) -> Result<Self, CoreError> {
        let ctx = basis.ctx();
        ctx.check()?;
        options.sort_by_key(ProjectOption::phase);

        let mut reference = ProjectRef {
            basis: basis.ref_(),
            ..ProjectRef::default()
        };
        let mut data_dir = None;
        let mut job = None;
        let mut configuration = None;
        let mut errors = ErrorSet::new();

        for option in options {
            match option {
                ProjectOption::Ref(r) => {
                    if !r.basis.resource_id.is_empty() && r.basis.resource_id != basis.resource_id()
                    {
                        errors.push(CoreError::ConfigurationInvalid(format!(
                            "project reference {r} does not belong to {}",
                            basis.ref_()
                        )));
                    }
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
                ProjectOption::Name(name) => {
                    if name.is_empty() {
                        errors.push(CoreError::InvalidOption(
                            "project name cannot be empty".to_string(),
                        ));
                    } else {
                        reference.name = name;
                    }
                }
                ProjectOption::DataDir(dir) => data_dir = Some(dir),
                ProjectOption::JobInfo(info) => job = Some(info),
                ProjectOption::Configuration(config) => configuration = Some(config),
            }
        }
        if reference.name.is_empty() && reference.resource_id.is_empty() {
            errors.push(CoreError::InvalidOption(
                "project requires a name or reference".to_string(),
            ));
        }
        errors.into_result()?;

        if let Some(loaded) = basis.loaded_project(&reference) {
            return Ok(loaded);
        }

        let client = basis.client();
        let mut record = match client.find_project(&ctx, &reference) {
            Ok(found) => found,
            Err(ClientError::NotFound(_)) => {
                let path = if reference.path.is_empty() {
                    reference.name.clone()
                } else {
                    reference.path.clone()
                };
                let request = ProjectRecord {
                    resource_id: reference.resource_id.clone(),
                    name: reference.name.clone(),
                    path,
                    basis: basis.ref_(),
                    configuration: configuration.clone(),
                    targets: Vec::new(),
                };
                client.upsert_project(&ctx, &request)?
            }
            Err(e) => return Err(e.into()),
        };

        if record.basis.resource_id != basis.resource_id() {
            return Err(CoreError::ConfigurationInvalid(format!(
                "project {} belongs to {}, not {}",
                record.name,
                record.basis,
                basis.ref_()
            )));
        }
        if let Some(config) = configuration {
            if record.configuration.as_ref() != Some(&config) {
                record.configuration = Some(config);
                record = client.upsert_project(&ctx, &record)?;
            }
        }

        let dir = match data_dir {
            Some(dir) => DataDir::new(dir),
            None => basis.data_dir().project(&record.name),
        };
        dir.ensure()?;

        let span = tracing::info_span!(
            parent: basis.span(),
            "project",
            project = %record.name,
            resource_id = %record.resource_id,
        );
        let project = Self {
            inner: Arc::new(ProjectInner {
                basis: basis.downgrade(),
                ctx,
                client,
                record: RwLock::new(record),
                job,
                dir,
                targets: Mutex::new(HashMap::new()),
                closers: Closers::new(),
                span,
            }),
        };
        Ok(basis.register_project(project))
    }

    /// Project name
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.record.read().name.clone()
    }

    /// Server-assigned resource id
    #[must_use]
    pub fn resource_id(&self) -> String {
        self.inner.record.read().resource_id.clone()
    }

    /// Reference to this project
    #[must_use]
    pub fn ref_(&self) -> ProjectRef {
        self.inner.record.read().to_ref()
    }

    /// Snapshot of the record
    #[must_use]
    pub fn record(&self) -> ProjectRecord {
        self.inner.record.read().clone()
    }

    /// Parsed project configuration
    #[must_use]
    pub fn config(&self) -> Option<ProjectConfig> {
        self.inner.record.read().configuration.clone()
    }

    /// Job metadata given at load time
    #[must_use]
    pub fn job_info(&self) -> Option<JobInfo> {
        self.inner.job.clone()
    }

    /// Data directory
    #[inline]
    #[must_use]
    pub fn data_dir(&self) -> &DataDir {
        &self.inner.dir
    }

    /// Owning basis
    pub fn basis(&self) -> Result<Basis, CoreError> {
        self.inner.basis.upgrade()
    }

    /// Register a cleanup action
    pub fn closer(&self, closer: Closer) {
        self.inner.closers.push(closer);
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

    pub(crate) fn downgrade(&self) -> WeakProject {
        WeakProject(Arc::downgrade(&self.inner))
    }

    pub(crate) fn loaded_target(&self, resource_id: &str) -> Option<Target> {
        if resource_id.is_empty() {
            return None;
        }
        self.inner.targets.lock().get(resource_id).cloned()
    }

    /// Insert `shell` unless a target with its resource id is already loaded
    pub(crate) fn register_target(&self, shell: Target) -> Target {
        let resource_id = shell.resource_id();
        {
            let mut targets = self.inner.targets.lock();
            if let Some(existing) = targets.get(&resource_id) {
                return existing.clone();
            }
            targets.insert(resource_id, shell.clone());
        }
        shell.attach_save();
        shell
    }

    /// Look up a target by resource id or name, loading it when needed
    ///
    /// A non-empty `provider` is assigned to a target matched by name unless
    /// it is already active. The fallback scan runs over an unordered map:
    /// when one target's name equals another's resource id, which one is
    /// returned is undefined.
    pub fn target(&self, name_or_id: &str, provider: &str) -> Result<Target, CoreError> {
        let found = {
            let targets = self.inner.targets.lock();
            if let Some(exact) = targets.get(name_or_id) {
                return Ok(exact.clone());
            }
            targets
                .values()
                .find(|t| t.name() == name_or_id || t.resource_id() == name_or_id)
                .cloned()
        };

        if let Some(target) = found {
            if target.name() == name_or_id && !provider.is_empty() && !target.is_active() {
                target.set_provider(provider);
            }
            return Ok(target);
        }

        self.load_target(vec![
            TargetOption::Ref(TargetRef {
                resource_id: name_or_id.to_string(),
                name: name_or_id.to_string(),
                project: self.ref_(),
            }),
            TargetOption::Provider(provider.to_string()),
        ])
    }

    /// Load a target from options; loading a resource id twice returns the
    /// same instance
    pub fn load_target(&self, options: Vec<TargetOption>) -> Result<Target, CoreError> {
        Target::load(self, options)
    }

    /// Loaded targets, in no particular order
    #[must_use]
    pub fn loaded_targets(&self) -> Vec<Target> {
        self.inner.targets.lock().values().cloned().collect()
    }

    /// Every target recorded for this project, loading each on demand
    pub fn targets(&self) -> Result<Vec<Target>, CoreError> {
        let refs = self.inner.record.read().targets.clone();
        refs.into_iter()
            .map(|r| self.load_target(vec![TargetOption::Ref(r)]))
            .collect()
    }

    /// Names of every recorded target
    #[must_use]
    pub fn target_names(&self) -> Vec<String> {
        self.inner
            .record
            .read()
            .targets
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    /// Resource ids of every recorded target
    #[must_use]
    pub fn target_ids(&self) -> Vec<String> {
        self.inner
            .record
            .read()
            .targets
            .iter()
            .map(|t| t.resource_id.clone())
            .collect()
    }

    /// Recorded targets whose backing resource is live
    pub fn active_targets(&self) -> Result<Vec<Target>, CoreError> {
        Ok(self
            .targets()?
            .into_iter()
            .filter(Target::is_active)
            .collect())
    }

    /// Components of `kind` available to this project
    pub fn components(&self, kind: ComponentKind) -> Result<Vec<Component>, CoreError> {
        self.basis()?.components(kind)
    }

    /// Upsert a target record for every configured machine
    ///
    /// Stops at the first failure. The project record is re-read afterwards
    /// so its target references include the new entries.
    pub fn init_targets(&self, ctx: &ExecContext) -> Result<(), CoreError> {
        let _enter = self.inner.span.enter();
        let Some(config) = self.config() else {
            return Ok(());
        };

        let mut updated = 0usize;
        for machine in config.machine_configs {
            ctx.check()?;
            let request = TargetRecord {
                name: machine.name.clone(),
                project: self.ref_(),
                configuration: Some(machine),
                ..TargetRecord::default()
            };
            self.inner.client.upsert_target(ctx, &request)?;
            updated += 1;
        }

        if updated > 0 {
            tracing::debug!(count = updated, "initialised targets");
            self.refresh()?;
        }
        Ok(())
    }

    /// Execute `task` through its command component
    pub fn run(&self, ctx: &ExecContext, task: &Task) -> Result<(), CoreError> {
        let _enter = self.inner.span.enter();
        tracing::info!(
            component = %task.component.name,
            command = %task.command_name,
            "running task"
        );
        self.init_targets(ctx)?;

        let component = self
            .basis()?
            .component(task.component.kind, &task.component.name)?;
        let func = component.as_command()?.execute_func(&task.sub_commands())?;

        let job = task
            .job
            .clone()
            .or_else(|| self.job_info())
            .unwrap_or_default();
        let mut scope = Scope::new()
            .with_typed(Value::new(TypeTag::CliArgs, task.cli_args.clone()))
            .with_typed(Value::new(TypeTag::JobInfo, job));
        scope.add_converters(component.mappers().iter().cloned());

        match self.call_dynamic(ctx, &func, scope) {
            Ok(value) => match (value.tag(), value.downcast_ref::<i32>()) {
                (TypeTag::ExitCode, Some(&0)) => Ok(()),
                (TypeTag::ExitCode, Some(&code)) => {
                    tracing::warn!(exit_code = code, "task exited with non-zero code");
                    Err(RunError::exit(code).into())
                }
                (found, _) => {
                    tracing::warn!(result = %found, "task returned no exit code");
                    let mismatch = DispatchError::TypeMismatch {
                        expected: TypeTag::ExitCode.to_string(),
                        found: found.to_string(),
                    };
                    Err(RunError::from_error(mismatch.into()).into())
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "task failed");
                Err(RunError::from_error(e).into())
            }
        }
    }

    /// Invoke `func` with project bindings added to `scope`
    pub fn call_dynamic(
        &self,
        ctx: &ExecContext,
        func: &DynFunc,
        mut scope: Scope,
    ) -> Result<Value, CoreError> {
        let basis = self.basis()?;
        let value = Value::new(TypeTag::Project, self.clone());
        scope.add_named("project", value.clone());
        scope.add_named("project_ui", Value::new(TypeTag::Ui, basis.ui()));
        scope.add_typed(value);
        basis.call_dynamic(ctx, func, scope)
    }

    /// Re-read the persisted record
    pub fn refresh(&self) -> Result<(), CoreError> {
        let reference = self.ref_();
        let found = self.inner.client.find_project(&self.inner.ctx, &reference)?;
        *self.inner.record.write() = found;
        Ok(())
    }

    /// Persist the record, adopting the stored result
    pub fn save(&self) -> Result<(), CoreError> {
        let request = self.record();
        let saved = self.inner.client.upsert_project(&self.inner.ctx, &request)?;
        *self.inner.record.write() = saved;
        Ok(())
    }

    /// Save every loaded target, then the project
    pub fn save_full(&self) -> Result<(), CoreError> {
        let _enter = self.inner.span.enter();
        let mut errors = ErrorSet::new();
        for target in self.loaded_targets() {
            errors.record(target.save());
        }
        errors.record(self.save());
        errors.into_result()
    }

    /// Close every loaded target, run cleanup actions and leave the basis
    pub fn close(&self) -> Result<(), CoreError> {
        let _enter = self.inner.span.enter();
        tracing::debug!("closing project");

        let targets: Vec<Target> = self.inner.targets.lock().drain().map(|(_, t)| t).collect();
        let mut errors = ErrorSet::new();
        for target in targets {
            errors.record(target.close());
        }
        self.inner.closers.run(&mut errors);

        if let Ok(basis) = self.basis() {
            basis.forget_project(self);
        }
        errors.into_result()
    }
}

impl PartialEq for Project {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Project {}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.inner.record.read();
        f.debug_struct("Project")
            .field("name", &record.name)
            .field("resource_id", &record.resource_id)
            .field("targets", &record.targets.len())
            .finish_non_exhaustive()
    }
}
