//! Error types for orchestration operations.

use thiserror::Error;

use super::job::JobId;
use super::run::RunId;
use super::ledger::NotificationId;

/// Errors produced by orchestration components.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Job parameters rejected at the API boundary.
    #[error("invalid job: {0}")]
    InvalidJob(String),
    /// Manual run parameters rejected at the API boundary.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// No job with this identifier exists.
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    /// No run with this identifier exists.
    #[error("run not found: {0}")]
    RunNotFound(RunId),
    /// No notification with this identifier exists.
    #[error("notification not found: {0}")]
    NotificationNotFound(NotificationId),
    /// A terminal run cannot transition again.
    #[error("run {0} is already terminal")]
    RunTerminal(RunId),
    /// The enrichment provider is unavailable as a whole.
    #[error("provider outage: {0}")]
    ProviderOutage(String),
    /// A top-level provider reply could not be parsed.
    #[error("structural parse error: {0}")]
    StructuralParse(String),
    /// The run panicked inside the worker.
    #[error("run panicked: {0}")]
    Panicked(String),
    /// Storage or runtime failure with context.
    #[error("backend error: {0}")]
    Backend(String),
    /// The queue or scheduler has been shut down.
    #[error("orchestrator is shut down")]
    Shutdown,
}

impl OrchestratorError {
    /// True for errors caused by caller input rather than system state.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::InvalidJob(_) | Self::InvalidRequest(_))
    }
}

/// Application-facing result using anyhow for bootstrap code.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = OrchestratorError::InvalidJob("interval_value must be greater than 0".into());
        assert_eq!(
            err.to_string(),
            "invalid job: interval_value must be greater than 0"
        );
        assert_eq!(OrchestratorError::Shutdown.to_string(), "orchestrator is shut down");
        assert_eq!(
            OrchestratorError::ProviderOutage("401".into()).to_string(),
            "provider outage: 401"
        );
    }

    #[test]
    fn rejections() {
        assert!(OrchestratorError::InvalidRequest("limit".into()).is_rejection());
        assert!(!OrchestratorError::Backend("disk".into()).is_rejection());
    }
}
