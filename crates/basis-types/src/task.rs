//! Task execution records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Capability kind of a plugin component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// CLI command
    Command,
    /// Machine communicator (ssh, winrm, ...)
    Communicator,
    /// Guest operating system
    Guest,
    /// Host operating system
    Host,
    /// Machine provider
    Provider,
    /// Provisioner
    Provisioner,
    /// Synced folder implementation
    SyncedFolder,
}

impl ComponentKind {
    /// Stable lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Communicator => "communicator",
            Self::Guest => "guest",
            Self::Host => "host",
            Self::Provider => "provider",
            Self::Provisioner => "provisioner",
            Self::SyncedFolder => "synced_folder",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names a component to execute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentRef {
    /// Capability kind
    pub kind: ComponentKind,
    /// Plugin name
    pub name: String,
}

/// Raw CLI-style arguments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliArgs {
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Flag values keyed by flag name
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
}

impl CliArgs {
    /// Positional arguments only
    #[must_use]
    pub fn positional<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            flags: BTreeMap::new(),
        }
    }

    /// Add a flag value
    #[inline]
    #[must_use]
    pub fn with_flag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.insert(name.into(), value.into());
        self
    }
}

/// Metadata about the job a task runs under
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Job id
    pub id: String,
    /// Whether the job runs locally
    #[serde(default)]
    pub local: bool,
    /// Workspace name
    #[serde(default)]
    pub workspace: String,
}

/// A unit of work executed against a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Component to run
    pub component: ComponentRef,
    /// Space-delimited sub-command path (e.g. `box add`)
    pub command_name: String,
    /// Raw arguments
    #[serde(default)]
    pub cli_args: CliArgs,
    /// Job metadata, if the task carries its own
    #[serde(default)]
    pub job: Option<JobInfo>,
}

impl Task {
    /// Task running command plugin `name`
    #[must_use]
    pub fn command(name: impl Into<String>, command_name: impl Into<String>) -> Self {
        Self {
            component: ComponentRef {
                kind: ComponentKind::Command,
                name: name.into(),
            },
            command_name: command_name.into(),
            cli_args: CliArgs::default(),
            job: None,
        }
    }

    /// Attach arguments
    #[inline]
    #[must_use]
    pub fn with_args(mut self, cli_args: CliArgs) -> Self {
        self.cli_args = cli_args;
        self
    }

    /// Attach job metadata
    #[inline]
    #[must_use]
    pub fn with_job(mut self, job: JobInfo) -> Self {
        self.job = Some(job);
        self
    }

    /// Sub-command tokens from the command name
    #[must_use]
    pub fn sub_commands(&self) -> Vec<String> {
        self.command_name
            .split(' ')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Status reported by a remote call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Numeric status code
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

impl Status {
    /// Create a status
    #[inline]
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.code, self.message)
    }
}
