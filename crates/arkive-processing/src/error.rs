use std::io;
use std::path::PathBuf;

use arkive_core::PipelineError;
use thiserror::Error;

/// Errors raised while preparing files in the work tree.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Path {path} escapes root {root}")]
    PathEscape { path: PathBuf, root: PathBuf },

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("Tar error on {path}: {message}")]
    Tar { path: PathBuf, message: String },
}

impl ArchiveError {
    /// Wrap an I/O error, turning permission failures into [`ArchiveError::PermissionDenied`].
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            ArchiveError::PermissionDenied(path)
        } else {
            ArchiveError::Io { path, source }
        }
    }

    pub fn tar(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        ArchiveError::Tar {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

impl From<ArchiveError> for PipelineError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::PathEscape { .. }
            | ArchiveError::PermissionDenied(_)
            | ArchiveError::Glob(_) => PipelineError::storage(err.to_string()),
            ArchiveError::Walk(ref walk)
                if walk.io_error().map(|e| e.kind()) == Some(io::ErrorKind::PermissionDenied) =>
            {
                PipelineError::storage(err.to_string())
            }
            other => PipelineError::workflow(other),
        }
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;
    use arkive_core::ErrorKind;

    #[test]
    fn permission_failures_are_terminal_storage_errors() {
        let err = ArchiveError::io(
            "/data/x",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, ArchiveError::PermissionDenied(_)));
        assert_eq!(PipelineError::from(err).kind(), ErrorKind::Storage);
    }

    #[test]
    fn other_io_failures_are_recoverable() {
        let err = ArchiveError::io("/data/x", io::Error::new(io::ErrorKind::TimedOut, "slow"));
        let pipeline: PipelineError = err.into();
        assert!(pipeline.is_recoverable());
    }
}
