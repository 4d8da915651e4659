//! Error taxonomy for history queries and artifact retrieval.

use thiserror::Error;

/// Errors reported to callers of the history and schedule layers.
///
/// Malformed stored report content never shows up here: it is recovered
/// into a placeholder payload where it is decoded.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{kind} artifact for execution log {log_id} is missing")]
    ArtifactMissing { log_id: i64, kind: &'static str },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error("artifact read failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

impl HistoryError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        HistoryError::InvalidArgument(msg.into())
    }

    /// True when the caller sent something unknown or malformed.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            HistoryError::NotFound { .. }
                | HistoryError::InvalidArgument(_)
                | HistoryError::ArtifactMissing { .. }
        )
    }

    /// Conventional HTTP status for a transport that exposes these operations.
    /// A missing artifact looks the same as an unknown log to the caller.
    pub fn status_hint(&self) -> u16 {
        match self {
            HistoryError::NotFound { .. } | HistoryError::ArtifactMissing { .. } => 404,
            HistoryError::InvalidArgument(_) => 400,
            HistoryError::Sqlite(_) | HistoryError::Pool(_) | HistoryError::Io(_) => 500,
        }
    }
}
