//! Pipeline error taxonomy
//!
//! Every stage failure is classified into one of four kinds before it reaches the
//! pipeline executor. Only workflow failures (and verification failures that demand a
//! full restart) are recoverable; the executor re-throws those so the durable queue can
//! redeliver the work item. All other kinds are terminal for the item.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Log level used when a classified error is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Warn,
    Error,
}

/// Classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Inputs cannot be resolved into a destination path or metadata.
    Mapping,
    /// Filesystem access or permission failure while preparing the item.
    Storage,
    /// Post-upload mismatch between the local and remote object.
    Verification,
    /// Network, remote-service and transient I/O failures.
    Workflow,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ErrorKind::Mapping => write!(f, "mapping"),
            ErrorKind::Storage => write!(f, "storage"),
            ErrorKind::Verification => write!(f, "verification"),
            ErrorKind::Workflow => write!(f, "workflow"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// `restart` asks the executor to clear the item's task marks so the whole pipeline
    /// runs again from the first stage on redelivery.
    #[error("Verification failed: {message}")]
    Verification { message: String, restart: bool },

    #[error(transparent)]
    Workflow(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn mapping(message: impl Into<String>) -> Self {
        PipelineError::Mapping(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        PipelineError::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        PipelineError::Storage {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn verification(message: impl Into<String>) -> Self {
        PipelineError::Verification {
            message: message.into(),
            restart: false,
        }
    }

    /// Verification failure that invalidates every completed stage of the item.
    pub fn verification_restart(message: impl Into<String>) -> Self {
        PipelineError::Verification {
            message: message.into(),
            restart: true,
        }
    }

    pub fn workflow(err: impl Into<anyhow::Error>) -> Self {
        PipelineError::Workflow(err.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Mapping(_) => ErrorKind::Mapping,
            PipelineError::Storage { .. } => ErrorKind::Storage,
            PipelineError::Verification { .. } => ErrorKind::Verification,
            PipelineError::Workflow(_) => ErrorKind::Workflow,
        }
    }

    /// Whether the executor should surface this failure for queue redelivery.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PipelineError::Workflow(_) => true,
            PipelineError::Verification { restart, .. } => *restart,
            PipelineError::Mapping(_) | PipelineError::Storage { .. } => false,
        }
    }

    /// Whether the item's task marks must be cleared before the next attempt.
    pub fn requires_restart(&self) -> bool {
        matches!(self, PipelineError::Verification { restart: true, .. })
    }

    pub fn log_level(&self) -> LogLevel {
        match self {
            PipelineError::Workflow(_) => LogLevel::Warn,
            PipelineError::Verification { restart: true, .. } => LogLevel::Warn,
            PipelineError::Mapping(_)
            | PipelineError::Storage { .. }
            | PipelineError::Verification { .. } => LogLevel::Error,
        }
    }

    /// Text persisted into `WorkItem.error`.
    pub fn persisted_message(&self) -> String {
        format!("[{}] {}", self.kind(), self)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Workflow(anyhow::Error::new(err))
    }
}

/// Extension trait for classifying a foreign error at the point it occurs.
pub trait ErrorClassExt<T> {
    /// Mark the error as a terminal mapping failure.
    fn mapping(self) -> Result<T, PipelineError>;
    /// Mark the error as a terminal storage failure, prefixed with `context`.
    fn storage(self, context: &str) -> Result<T, PipelineError>;
    /// Mark the error as a recoverable workflow failure.
    fn workflow(self) -> Result<T, PipelineError>;
}

impl<T, E: Into<anyhow::Error>> ErrorClassExt<T> for Result<T, E> {
    fn mapping(self) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::Mapping(e.into().to_string()))
    }

    fn storage(self, context: &str) -> Result<T, PipelineError> {
        self.map_err(|e| {
            let err = e.into();
            PipelineError::Storage {
                message: format!("{}: {}", context, err),
                source: Some(err),
            }
        })
    }

    fn workflow(self) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::Workflow(e.into()))
    }
}
