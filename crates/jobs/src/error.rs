use std::time::Duration;

use comfybot_comfyui::ComfyUIApiError;
use comfybot_core::types::{BoxError, PromptId};

/// Errors that end a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Submission was attempted while the event stream was down.
    #[error("Event stream is not connected; prompt was not submitted")]
    TransportUnavailable,

    /// The backend rejected the prompt or could not be reached.
    #[error("Failed to submit prompt: {0}")]
    Submission(#[source] ComfyUIApiError),

    /// Outputs could not be fetched after the backend finished.
    #[error("Failed to retrieve outputs: {0}")]
    Retrieval(#[from] RetrievalError),

    /// The backend reported an execution error for this prompt.
    #[error("Backend failed on node {node_id}: {message}")]
    Execution { node_id: String, message: String },

    /// No completion event arrived within the configured limit.
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    /// An externally hosted task failed.
    #[error("External task failed: {0}")]
    External(#[source] BoxError),

    #[error("Job aborted: {0}")]
    Aborted(&'static str),
}

/// Errors from history lookup and artifact download.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("History lookup failed: {0}")]
    History(#[source] ComfyUIApiError),

    /// The history document has no record for the prompt.
    #[error("No history recorded for prompt {0}")]
    MissingHistory(PromptId),

    #[error("Failed to download {filename}: {source}")]
    Artifact {
        filename: String,
        #[source]
        source: ComfyUIApiError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_error_carries_backend_body() {
        let err = JobError::Submission(ComfyUIApiError::ApiError {
            status: 400,
            body: "prompt has no outputs".into(),
        });
        assert_eq!(
            err.to_string(),
            "Failed to submit prompt: Backend answered 400: prompt has no outputs"
        );
    }

    #[test]
    fn retrieval_error_wraps_into_job_error() {
        let err: JobError = RetrievalError::MissingHistory("123".into()).into();
        assert_eq!(
            err.to_string(),
            "Failed to retrieve outputs: No history recorded for prompt 123"
        );
    }

    #[test]
    fn external_error_exposes_source() {
        let inner: BoxError = "rate limited".into();
        let err = JobError::External(inner);
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "rate limited");
    }
}
