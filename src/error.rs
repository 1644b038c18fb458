use strum::{AsRefStr, Display};
use uuid::Uuid;

use crate::models::access::Action;
use crate::models::job::JobStatus;
use crate::services::report_codec::ReportError;

/// Machine-readable category of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Forbidden,
    InvalidTransition,
    ExtractionFailed,
    NotFound,
    UnknownIncident,
    NetworkOrBackendError,
}

/// Errors surfaced by the import pipeline to the calling UI layer.
///
/// None of these are fatal; every one is recovered at the operation boundary
/// and reported as a displayable message plus an [`ErrorKind`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("not allowed to {0}")]
    Forbidden(Action),

    #[error("import {job_id} cannot {attempted} while {status}")]
    InvalidTransition {
        job_id: Uuid,
        status: JobStatus,
        attempted: &'static str,
    },

    /// The backend rejected a transition without telling us the current state.
    #[error("import {job_id} rejected the transition: {message}")]
    Conflict { job_id: Uuid, message: String },

    #[error("could not extract incidents: {0}")]
    ExtractionFailed(#[from] ReportError),

    #[error("import {0} not found")]
    NotFound(Uuid),

    #[error("no incident at line {0}")]
    UnknownIncident(u32),

    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Forbidden(_) => ErrorKind::Forbidden,
            PipelineError::InvalidTransition { .. } | PipelineError::Conflict { .. } => {
                ErrorKind::InvalidTransition
            }
            PipelineError::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::UnknownIncident(_) => ErrorKind::UnknownIncident,
            PipelineError::Http(_) | PipelineError::Backend { .. } => {
                ErrorKind::NetworkOrBackendError
            }
        }
    }

    /// Text suitable for an error banner. Backend messages pass through verbatim.
    pub fn display_message(&self) -> String {
        match self {
            PipelineError::Backend { message, .. } if !message.is_empty() => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let id = Uuid::new_v4();
        assert_eq!(
            PipelineError::Forbidden(Action::Upload).kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            PipelineError::Conflict {
                job_id: id,
                message: "busy".into()
            }
            .kind(),
            ErrorKind::InvalidTransition
        );
        assert_eq!(
            PipelineError::Backend {
                status: 502,
                message: String::new()
            }
            .kind()
            .as_ref(),
            "network_or_backend_error"
        );
    }

    #[test]
    fn test_backend_message_is_verbatim() {
        let err = PipelineError::Backend {
            status: 500,
            message: "disk full".into(),
        };
        assert_eq!(err.display_message(), "disk full");
        assert_eq!(
            PipelineError::Forbidden(Action::Process).display_message(),
            "not allowed to process"
        );
    }
}
