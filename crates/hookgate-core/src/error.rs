use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid workflow name '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidWorkflow(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("workflow already active: {0}")]
    WorkflowActive(String),

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("git failed: {0}")]
    Git(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GateError>;
