//! Error types for the sales insight pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Request-Time Errors
    // =============================

    #[error("Agent adapter error: {0}")]
    Adapter(String),

    #[error("Dataset query error: {0}")]
    Query(String),

    #[error("Step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("State conflict: field '{0}' was already written by another step")]
    StateConflict(&'static str),

    // =============================
    // Graph Construction Errors
    // =============================

    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Cycle detected in step graph involving: {0}")]
    CycleDetected(String),

    #[error("Step '{0}' has no path from the start step")]
    UnreachableStep(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Wrap an error as a failure of the named step.
    pub fn in_step(step: impl Into<String>, source: PipelineError) -> Self {
        PipelineError::StepFailed {
            step: step.into(),
            source: Box::new(source),
        }
    }
}
