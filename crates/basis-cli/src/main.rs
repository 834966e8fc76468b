//! `basis` - drive the orchestration core from the command line
//!
//! Runs against the in-memory persistence backend and a static plugin set
//! assembled from flags, so every invocation starts from an empty store.

use anyhow::{bail, Context as _, Result};
use basis_core::dispatch::{DynFunc, Input, TypeTag, Value};
use basis_core::memory::{MemoryClient, StaticPlugins};
use basis_core::{
    CoreConfig, CoreError, DefaultProviderOptions, ExecContext, Factory, PersistenceClient,
    PluginManager, Project, ProjectOption, RunError, StatusScope, Ui,
};
use basis_types::{CliArgs, JobInfo, MachineConfig, ProjectConfig, ProviderConfig, Task};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "basis", version, about = "Basis orchestration core")]
struct Cli {
    /// Root for basis, project and target data directories
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Basis to operate on
    #[arg(long, global = true, default_value = "default")]
    basis: String,

    /// Project to operate on
    #[arg(long, global = true, default_value = "default")]
    project: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Choose the default provider for the project
    SelectProvider {
        /// Provider configured for a machine, as MACHINE=PROVIDER (repeatable, ordered)
        #[arg(long = "machine-provider", value_name = "MACHINE=PROVIDER")]
        machine_providers: Vec<String>,

        /// Installed provider plugin (repeatable)
        #[arg(long, value_name = "NAME")]
        installed: Vec<String>,

        /// Installed provider plugin that reports itself unusable (repeatable)
        #[arg(long, value_name = "NAME")]
        unusable: Vec<String>,

        /// Provider to leave out of consideration (repeatable)
        #[arg(long, value_name = "NAME")]
        exclude: Vec<String>,

        /// Only consider the configuration of this machine
        #[arg(long)]
        machine: Option<String>,

        /// Return the environment default without any checks
        #[arg(long)]
        force_default: bool,

        /// Ask each installed provider whether it is usable
        #[arg(long)]
        check_usable: bool,
    },

    /// Run the echo command through the project task path
    Run {
        /// Exit code the command returns
        #[arg(long, default_value_t = 0)]
        exit_code: i32,

        /// Job id attached to the task
        #[arg(long)]
        job: Option<String>,

        /// Words to echo
        #[arg(trailing_var_arg = true)]
        words: Vec<String>,
    },
}

/// UI writing output to stdout and status lines to the log
#[derive(Debug, Default, Clone, Copy)]
struct ConsoleUi;

struct ConsoleStatus;

impl StatusScope for ConsoleStatus {
    fn update(&mut self, message: &str) {
        tracing::debug!(status = message, "status");
    }

    fn close(&mut self) {}
}

impl Ui for ConsoleUi {
    fn output(&self, message: &str) {
        println!("{message}");
    }

    fn status(&self) -> Box<dyn StatusScope> {
        Box::new(ConsoleStatus)
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = CoreConfig::from_env();
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir);
    }

    let plugins = Arc::new(StaticPlugins::new());
    let mut machines = Vec::new();
    if let Command::SelectProvider {
        machine_providers,
        installed,
        unusable,
        ..
    } = &cli.command
    {
        machines = parse_machine_providers(machine_providers)?;
        for name in installed {
            plugins.register_provider(name, true);
        }
        for name in unusable {
            plugins.register_provider(name, false);
        }
    } else {
        plugins.register_command("echo", echo_func);
    }

    let ctx = ExecContext::new();
    let factory = Factory::new(
        ctx.clone(),
        Arc::new(MemoryClient::new()) as Arc<dyn PersistenceClient>,
        plugins as Arc<dyn PluginManager>,
        Arc::new(ConsoleUi) as Arc<dyn Ui>,
        config,
    );
    let basis = factory
        .new_basis(&cli.basis, Vec::new())
        .with_context(|| format!("failed to open basis {}", cli.basis))?;
    let project = basis.load_project(vec![
        ProjectOption::Name(cli.project.clone()),
        ProjectOption::Configuration(ProjectConfig::new(machines)),
    ])?;

    let outcome = execute(cli.command, &ctx, &project);
    let closed = basis.close();
    let code = outcome?;
    closed?;
    Ok(code)
}

fn execute(command: Command, ctx: &ExecContext, project: &Project) -> Result<ExitCode> {
    let code = match command {
        Command::SelectProvider {
            exclude,
            machine,
            force_default,
            check_usable,
            ..
        } => {
            let mut opts = DefaultProviderOptions::new()
                .force_default(force_default)
                .check_usable(check_usable);
            if let Some(machine) = machine {
                opts = opts.with_machine(machine);
            }
            for name in exclude {
                opts = opts.exclude(name);
            }
            let provider = project.default_provider(&opts)?;
            println!("{provider}");
            ExitCode::SUCCESS
        }
        Command::Run {
            exit_code,
            job,
            words,
        } => {
            let mut task = Task::command("echo", "echo").with_args(
                CliArgs::positional(words).with_flag("exit-code", exit_code.to_string()),
            );
            if let Some(id) = job {
                task = task.with_job(JobInfo {
                    id,
                    local: true,
                    ..JobInfo::default()
                });
            }
            match project.run(ctx, &task) {
                Ok(()) => ExitCode::SUCCESS,
                Err(CoreError::Run(RunError {
                    exit_code: Some(code),
                    ..
                })) => {
                    tracing::warn!(exit_code = code, "echo exited");
                    ExitCode::from(u8::try_from(code).unwrap_or(1))
                }
                Err(err) => return Err(err.into()),
            }
        }
    };
    Ok(code)
}

/// Group `MACHINE=PROVIDER` pairs into machine configurations, keeping first-seen order
fn parse_machine_providers(pairs: &[String]) -> Result<Vec<MachineConfig>> {
    let mut machines: Vec<MachineConfig> = Vec::new();
    for pair in pairs {
        let Some((machine, provider)) = pair.split_once('=') else {
            bail!("expected MACHINE=PROVIDER, got {pair:?}");
        };
        if machine.is_empty() || provider.is_empty() {
            bail!("expected MACHINE=PROVIDER, got {pair:?}");
        }
        match machines.iter_mut().find(|m| m.name == machine) {
            Some(existing) => existing.config_vm.providers.push(ProviderConfig {
                provider_type: provider.to_string(),
            }),
            None => machines.push(MachineConfig::new(machine).with_provider(provider)),
        }
    }
    Ok(machines)
}

fn echo_func(_sub_commands: &[String]) -> Result<DynFunc, basis_core::PluginError> {
    Ok(DynFunc::new("echo", TypeTag::ExitCode, |args| {
        let cli: CliArgs = args.typed(TypeTag::CliArgs)?;
        let job: JobInfo = args.typed(TypeTag::JobInfo)?;
        let ui: Arc<dyn Ui> = args.typed(TypeTag::Ui)?;

        let line = cli.args.join(" ");
        if job.id.is_empty() {
            ui.output(&line);
        } else {
            ui.output(&format!("[{}] {line}", job.id));
        }

        let code = cli
            .flags
            .get("exit-code")
            .and_then(|c| c.parse::<i32>().ok())
            .unwrap_or(0);
        Ok(Value::exit_code(code))
    })
    .with_input(Input::typed(TypeTag::CliArgs))
    .with_input(Input::typed(TypeTag::JobInfo))
    .with_input(Input::typed(TypeTag::Ui)))
}
