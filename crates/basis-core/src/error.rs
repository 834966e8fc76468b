//! Error types for the basis core
//!
//! Provides error handling for:
//! - Failed lookups and invalid configuration
//! - Task execution failures carrying remote status and exit code
//! - Fan-out operations (close, full save) that collect every failure

use crate::client::ClientError;
use crate::dispatch::DispatchError;
use crate::plugin::PluginError;
use basis_types::Status;
use std::fmt;

/// Main core error type
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Lookup by name or id matched nothing
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind (`target`, `project`, ...)
        kind: &'static str,
        /// Identifier that could not be resolved
        id: String,
    },

    /// A loaded record disagrees with its expected parent
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// Task execution failed
    #[error(transparent)]
    Run(#[from] RunError),

    /// Several independent sub-operations failed
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// No provider could be selected
    #[error("no default provider")]
    NoDefaultProvider,

    /// An option could not be applied
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// The execution context was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// A back-reference outlived its parent
    #[error("{0} has already been dropped")]
    Detached(&'static str),

    /// Persistence service failure
    #[error("persistence error: {0}")]
    Client(ClientError),

    /// Plugin manager or plugin failure
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Argument resolution or invocation failure
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Create a not-found error
    #[inline]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Check if this is a lookup miss, locally or remotely
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Client(ClientError::NotFound(_))
        )
    }

    /// Check if the error must not be retried
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationInvalid(_) | Self::Cancelled | Self::Detached(_)
        )
    }

    /// Remote status carried by this error, if any
    #[must_use]
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Client(e) => e.status(),
            Self::Dispatch(e) => e.status(),
            Self::Run(e) => e.status.as_ref(),
            _ => None,
        }
    }
}

impl From<ClientError> for CoreError {
    fn from(value: ClientError) -> Self {
        match value {
            ClientError::Cancelled => Self::Cancelled,
            other => Self::Client(other),
        }
    }
}

/// Structured task failure
#[derive(Debug, Default)]
pub struct RunError {
    /// Exit code returned by the command, if it returned one
    pub exit_code: Option<i32>,
    /// Remote status extracted from the underlying error
    pub status: Option<Status>,
    /// Underlying error
    pub source: Option<Box<CoreError>>,
}

impl RunError {
    /// Failure from a non-zero exit code
    #[inline]
    #[must_use]
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// Failure from an invocation error
    #[must_use]
    pub fn from_error(error: CoreError) -> Self {
        Self {
            exit_code: None,
            status: error.status().cloned(),
            source: Some(Box::new(error)),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("task failed")?;
        if let Some(code) = self.exit_code {
            write!(f, " with exit code {code}")?;
        }
        if let Some(status) = &self.status {
            write!(f, " ({status})")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Every failure from a fan-out operation
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<CoreError>,
}

impl AggregateError {
    /// Individual failures, in the order they occurred
    #[inline]
    #[must_use]
    pub fn errors(&self) -> &[CoreError] {
        &self.errors
    }

    /// Consume into the individual failures
    #[inline]
    #[must_use]
    pub fn into_errors(self) -> Vec<CoreError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n\t* {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Accumulator for failures that must not stop a fan-out
#[derive(Debug, Default)]
pub struct ErrorSet {
    errors: Vec<CoreError>,
}

impl ErrorSet {
    /// Create empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure
    #[inline]
    pub fn push(&mut self, error: impl Into<CoreError>) {
        self.errors.push(error.into());
    }

    /// Record the failure of `result`, passing its value through
    pub fn record<T, E: Into<CoreError>>(&mut self, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    /// Number of failures recorded
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Check if nothing failed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok` when empty, the lone failure, or an aggregate of all of them
    pub fn into_result(mut self) -> Result<(), CoreError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(CoreError::Aggregate(AggregateError {
                errors: self.errors,
            })),
        }
    }
}
