//! Error handling for Cantor
//!
//! Every error names the stage that failed and carries recovery suggestions
//! so the CLI can report more than a generic message.

use thiserror::Error;

/// Result type alias for Cantor operations
pub type Result<T> = std::result::Result<T, CantorError>;

/// Main error type for Cantor operations
#[derive(Error, Debug)]
pub enum CantorError {
    // Configuration Errors
    #[error("Invalid parameter '{field}': got {value}, expected {expected}")]
    ConfigValidation {
        field: String,
        value: String,
        expected: String,
    },

    // Engine Errors
    #[error("Engine unavailable: {engine}: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    #[error("Engine '{engine}' did not respond within {timeout_ms} ms")]
    EngineTimeout { engine: String, timeout_ms: u64 },

    // Audio Errors
    #[error("Stage '{stage}' produced no audio")]
    EmptyAudio { stage: String },

    // Processing Errors
    #[error("Stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A non-fatal stage failure that was bypassed during processing
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StageDegradation {
    pub stage: String,
    pub reason: String,
}

impl std::fmt::Display for StageDegradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bypassed: {}", self.stage, self.reason)
    }
}

impl CantorError {
    /// Build a validation error for a parameter outside its range
    pub fn invalid(field: &str, value: impl ToString, expected: &str) -> Self {
        CantorError::ConfigValidation {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Build a stage failure
    pub fn stage(stage: &str, reason: impl ToString) -> Self {
        CantorError::StageFailed {
            stage: stage.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            CantorError::ConfigValidation { .. } => "CONFIG_VALIDATION",
            CantorError::EngineUnavailable { .. } => "ENGINE_UNAVAILABLE",
            CantorError::EngineTimeout { .. } => "ENGINE_TIMEOUT",
            CantorError::EmptyAudio { .. } => "EMPTY_AUDIO",
            CantorError::StageFailed { .. } => "STAGE_FAILED",
            CantorError::Io(_) => "IO_ERROR",
            CantorError::Wav(_) => "WAV_ERROR",
            CantorError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the error aborts the render when it reaches the orchestrator.
    ///
    /// `StageFailed` is the only kind an optional stage may swallow.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CantorError::StageFailed { .. })
    }

    /// Name of the pipeline stage the error originated in, when known
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            CantorError::EmptyAudio { stage } | CantorError::StageFailed { stage, .. } => {
                Some(stage)
            }
            CantorError::ConfigValidation { .. } => Some("configuration"),
            _ => None,
        }
    }

    /// Id of the collaborator engine that failed, for engine errors
    pub fn engine_name(&self) -> Option<&str> {
        match self {
            CantorError::EngineUnavailable { engine, .. }
            | CantorError::EngineTimeout { engine, .. } => Some(engine),
            _ => None,
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            CantorError::ConfigValidation { .. } => vec![
                "Check the named field against its documented range",
                "Remove the effect block entirely to disable the effect",
            ],
            CantorError::EngineUnavailable { .. } => vec![
                "Verify the speech engine is installed and reachable",
                "List candidates with 'cantor-cli engines'",
            ],
            CantorError::EngineTimeout { .. } => vec![
                "Raise the engine timeout in the render config",
                "Split long input text into shorter phrases",
            ],
            CantorError::EmptyAudio { .. } => vec![
                "Make sure the input text is not empty",
                "Check that the text contains pronounceable words",
            ],
            CantorError::StageFailed { .. } => vec![
                "The stage was bypassed; adjust its parameters to re-enable it",
            ],
            CantorError::Wav(_) | CantorError::Io(_) => vec![
                "Check the output directory exists and is writable",
            ],
            CantorError::Serialization(_) => vec![
                "Validate the configuration with 'cantor-cli validate-config'",
            ],
        }
    }
}
