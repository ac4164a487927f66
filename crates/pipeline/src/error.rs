//! Error types for the pipeline system

use spike_units::UnitError;
use thiserror::Error;

/// Pipeline-specific error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Name not found: '{name}' was never provided")]
    NameNotFound { name: String },

    #[error("Component '{component}' has no dependency role '{role}'")]
    UndeclaredDependency { component: String, role: String },

    #[error("Circular dependency: '{component}' cannot depend on slot '{slot}'")]
    CyclicDependency { component: String, slot: String },

    #[error("Slot '{slot}' does not provide {capability}")]
    MissingCapability { slot: String, capability: &'static str },

    #[error("Invalid stage configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Stage type not registered: {stage_type}")]
    UnknownStageType { stage_type: String },

    #[error("Computation failed in '{component}': {source}")]
    Computation {
        component: String,
        #[source]
        source: UnitError,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Coarse classification of [`PipelineError`] for callers that only care
/// about what went wrong, not where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NameNotFound,
    Configuration,
    Computation,
    Io,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NameNotFound { .. } => ErrorKind::NameNotFound,
            PipelineError::UndeclaredDependency { .. }
            | PipelineError::CyclicDependency { .. }
            | PipelineError::MissingCapability { .. }
            | PipelineError::InvalidConfiguration { .. }
            | PipelineError::UnknownStageType { .. }
            | PipelineError::SerializationError(_)
            | PipelineError::YamlError(_) => ErrorKind::Configuration,
            PipelineError::Computation { .. } => ErrorKind::Computation,
            PipelineError::IoError(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn computation(component: &str, source: UnitError) -> Self {
        PipelineError::Computation {
            component: component.to_string(),
            source,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        PipelineError::InvalidConfiguration {
            message: message.into(),
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
