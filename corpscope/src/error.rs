use std::time::Duration;

use crate::llm::selector::SelectionError;
use crate::llm::ModelError;

/// Delay suggested to callers rejected because the subject is being analyzed
pub const BUSY_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Terminal outcomes of an analysis or follow-up request.
///
/// Cache and lock outages never show up here: they are logged and the request
/// continues without that subsystem.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("an analysis of '{subject}' is already running, retry shortly")]
    Busy { subject: String },

    #[error("no usable news found for '{subject}'")]
    NoSourceData { subject: String },

    #[error("no generation model available (namespaces tried: {namespaces:?})")]
    NoModelAvailable { namespaces: Vec<String> },

    #[error("model API credential or quota problem: {0}")]
    UpstreamAuthOrQuota(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("upstream timed out: {0}")]
    Timeout(String),

    #[error("no report cached for '{subject}'; request an analysis first")]
    ReportNotFound { subject: String },
}

impl AnalysisError {
    /// Stable machine-readable name
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::InputInvalid(_) => "input_invalid",
            AnalysisError::Busy { .. } => "busy",
            AnalysisError::NoSourceData { .. } => "no_source_data",
            AnalysisError::NoModelAvailable { .. } => "no_model_available",
            AnalysisError::UpstreamAuthOrQuota(_) => "upstream_auth_or_quota",
            AnalysisError::Upstream(_) => "upstream",
            AnalysisError::Timeout(_) => "timeout",
            AnalysisError::ReportNotFound { .. } => "report_not_found",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalysisError::Busy { .. } | AnalysisError::Upstream(_) | AnalysisError::Timeout(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AnalysisError::Busy { .. } => Some(BUSY_RETRY_AFTER),
            _ => None,
        }
    }
}

impl From<SelectionError> for AnalysisError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::Exhausted { namespaces } => AnalysisError::NoModelAvailable { namespaces },
            SelectionError::Fatal(e @ (ModelError::Auth { .. } | ModelError::Quota { .. })) => {
                AnalysisError::UpstreamAuthOrQuota(e.to_string())
            }
            SelectionError::Fatal(e @ ModelError::Timeout(_)) => AnalysisError::Timeout(e.to_string()),
            SelectionError::Fatal(e) => AnalysisError::Upstream(e.to_string()),
        }
    }
}
