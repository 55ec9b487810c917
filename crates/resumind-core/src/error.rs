use thiserror::Error;

/// Errors that abort a run or a process-level operation.
///
/// Step-level failures never show up here: they are classified into a
/// [`crate::failure::Failure`] and recorded in the run state instead.
#[derive(Debug, Error)]
pub enum ResumindError {
    // Engine structure errors (malformed graph definition, always fatal)
    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Entry step not registered: {0}")]
    MissingEntry(String),

    #[error("Step {step} cannot run as {expected}")]
    StepKindMismatch { step: String, expected: &'static str },

    #[error("Fan-out of {requested} branches exceeds limit of {limit}")]
    FanOutTooWide { requested: usize, limit: usize },

    #[error("Run exceeded {0} step executions")]
    StepLimitExceeded(usize),

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResumindError {
    /// Whether this error indicates a malformed workflow graph.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::UnknownStep(_)
                | Self::MissingEntry(_)
                | Self::StepKindMismatch { .. }
                | Self::FanOutTooWide { .. }
                | Self::StepLimitExceeded(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ResumindError>;
