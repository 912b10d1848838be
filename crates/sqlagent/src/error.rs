use std::path::PathBuf;

use thiserror::Error;

use crate::models::Stage;

/// Failures at the reasoning-service boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),

    #[error("reasoning service timed out after {0} ms")]
    Timeout(u64),

    #[error("malformed reasoning service response: {0}")]
    MalformedResponse(String),
}

impl ServiceError {
    /// Unavailable and timed-out calls may succeed when repeated.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "service_unavailable",
            Self::Timeout(_) => "service_timeout",
            Self::MalformedResponse(_) => "malformed_response",
        }
    }
}

/// Failures of a single reasoning stage. All of them are recoverable by the orchestrator
/// except a persistently unavailable service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("selector kept no table that exists in the schema")]
    EmptySelection,

    #[error("no SQL could be extracted from the {stage} output")]
    Generation { stage: Stage, excerpt: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl StageError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptySelection => "empty_selection",
            Self::Generation { .. } => "generation_error",
            Self::Service(error) => error.code(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("database file not found: {}", .path.display())]
    Missing { path: PathBuf },

    #[error("failed to open database {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to introspect `{object}`: {source}")]
    Introspection {
        object: String,
        #[source]
        source: rusqlite::Error,
    },
}

/// Errors that end a pipeline run instead of degrading it to `resolved=false`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("reasoning service unavailable during {stage}: {detail}")]
    ServiceUnavailable { stage: Stage, detail: String },
}
