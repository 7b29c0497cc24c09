use common::{ContentStatus, TransitionKind};
use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("content {0} not found")]
    NotFound(i32),
    #[error("content {content_id} is {actual}, expected {expected}")]
    StatusMismatch {
        content_id: i32,
        expected: ContentStatus,
        actual: ContentStatus,
    },
    #[error("{kind:?} transition {from} -> {to} is not allowed")]
    IllegalTransition {
        from: ContentStatus,
        to: ContentStatus,
        kind: TransitionKind,
    },
    /// Another writer changed the row between read and update.
    #[error("content {content_id} was modified concurrently")]
    Stale { content_id: i32 },
    #[error(transparent)]
    Db(#[from] DbErr),
}

impl TransitionError {
    /// True when another actor owns the row; the caller should back off quietly.
    pub fn is_contended(&self) -> bool {
        matches!(
            self,
            TransitionError::StatusMismatch { .. } | TransitionError::Stale { .. }
        )
    }
}
