//! # Error Handling
//!
//! Error taxonomy for a pipeline run. Every [`PipelineError`] names the stage
//! that was in progress and the entity it was working on.

use thiserror::Error;
use tokio::task::JoinError;

use crate::forge::ForgeError;
use crate::pipeline::Stage;

/// Failures of the aggregate store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("members document could not be (de)serialized: {0}")]
    Document(#[from] serde_json::Error),
    #[error("organization '{login}' was not persisted")]
    NotPersisted { login: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage}: transport failure for {entity}: {source}")]
    Transport {
        stage: Stage,
        entity: String,
        #[source]
        source: ForgeError,
    },
    #[error("{stage}: {entity} not found")]
    NotFound {
        stage: Stage,
        entity: String,
        #[source]
        source: ForgeError,
    },
    #[error("{stage}: failed to persist {entity}: {source}")]
    Store {
        stage: Stage,
        entity: String,
        #[source]
        source: StoreError,
    },
    #[error("{stage}: statistics for {entity} still pending after {polls} polls")]
    PendingStats {
        stage: Stage,
        entity: String,
        polls: u32,
    },
    #[error("{stage}: {entity} timed out: {detail}")]
    Timeout {
        stage: Stage,
        entity: String,
        detail: String,
    },
    #[error("{stage}: fan-out task failed: {source}")]
    Task {
        stage: Stage,
        #[source]
        source: JoinError,
    },
    #[error("{stage}: join drained after {completed} of {expected} completions")]
    JoinMismatch {
        stage: Stage,
        expected: usize,
        completed: usize,
    },
    #[error("{stage}: {entity} has no recently updated repository count")]
    MissingJoinTarget { stage: Stage, entity: String },
}

impl PipelineError {
    /// Classifies a gateway failure raised while `stage` was working on `entity`.
    pub fn from_forge(stage: Stage, entity: impl Into<String>, error: ForgeError) -> Self {
        let entity = entity.into();
        match error {
            ForgeError::NotFound { .. } => Self::NotFound {
                stage,
                entity,
                source: error,
            },
            ForgeError::Timeout { ref url } => Self::Timeout {
                stage,
                entity,
                detail: format!("request to {} exceeded the per-request timeout", url),
            },
            other => Self::Transport {
                stage,
                entity,
                source: other,
            },
        }
    }

    pub fn store(stage: Stage, entity: impl Into<String>, source: impl Into<StoreError>) -> Self {
        Self::Store {
            stage,
            entity: entity.into(),
            source: source.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Transport { stage, .. }
            | Self::NotFound { stage, .. }
            | Self::Store { stage, .. }
            | Self::PendingStats { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::Task { stage, .. }
            | Self::JoinMismatch { stage, .. }
            | Self::MissingJoinTarget { stage, .. } => *stage,
        }
    }

    /// Stable code used for metrics labels and structured logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Store { .. } => "STORE_ERROR",
            Self::PendingStats { .. } => "PENDING_STATS",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Task { .. } => "TASK_FAILED",
            Self::JoinMismatch { .. } => "JOIN_MISMATCH",
            Self::MissingJoinTarget { .. } => "MISSING_JOIN_TARGET",
        }
    }
}
