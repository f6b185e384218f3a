use thiserror::Error;

/// Errors returned by the remote archive service and the upload engine.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Destination already exists: {0}")]
    Conflict(String),

    /// The existing remote object was soft-deleted so that registration can be retried.
    #[error("Existing remote object replaced, registration must be retried: {0}")]
    ReplacedExisting(String),

    #[error("Remote object not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Part {part_number} failed after {attempts} attempts: {message}")]
    PartFailed {
        part_number: u32,
        attempts: u32,
        message: String,
    },

    #[error("Entity tag mismatch for part {part_number}: expected {expected}, got {actual}")]
    EtagMismatch {
        part_number: u32,
        expected: String,
        actual: String,
    },

    #[error("Invalid upload request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

impl From<RemoteError> for arkive_core::PipelineError {
    /// Existing destinations and requests the protocol rejects are terminal; everything
    /// else, including a replaced object awaiting re-registration, is retried.
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Conflict(_) | RemoteError::InvalidRequest(_) => {
                arkive_core::PipelineError::storage(err.to_string())
            }
            other => arkive_core::PipelineError::workflow(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkive_core::{ErrorKind, PipelineError};

    #[test]
    fn replaced_existing_is_retried_and_conflict_is_terminal() {
        let err: PipelineError = RemoteError::ReplacedExisting("/a".to_string()).into();
        assert!(err.is_recoverable());

        let err: PipelineError = RemoteError::Conflict("/a".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(!err.is_recoverable());

        let err: PipelineError = RemoteError::PartFailed {
            part_number: 2,
            attempts: 3,
            message: "500".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Workflow);
    }
}
