//! Every status change of content, pieces and deals goes through here.
//!
//! A content transition is a compare-and-swap on the row's `version` guarded by the expected
//! current status, followed by an `audit_log` row on the same connection. Callers that need the
//! status change to commit with other writes pass a transaction.

mod deals;
mod error;

use chrono::Utc;
use common::{CommitmentStatus, ContentStatus, TransitionKind};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set};
use tracing::{info, warn};

use crate::entity::{audit_log, content, piece_commitment};

pub use deals::ReplacementReason;
pub use error::TransitionError;

pub const AUDIT_CONTENT: &str = "content";
pub const AUDIT_PIECE: &str = "piece_commitment";
pub const AUDIT_DEAL: &str = "content_deal";

pub struct Lifecycle<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> Lifecycle<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn load(&self, content_id: i32) -> Result<content::Model, TransitionError> {
        content::Entity::find_by_id(content_id)
            .one(self.conn)
            .await?
            .ok_or(TransitionError::NotFound(content_id))
    }

    /// Move content from `expected` to `to`.
    ///
    /// A legal self-loop returns the row untouched: no version bump, no audit row.
    pub async fn transition(
        &self,
        content_id: i32,
        expected: ContentStatus,
        to: ContentStatus,
        kind: TransitionKind,
        message: Option<String>,
    ) -> Result<content::Model, TransitionError> {
        let current = self.load(content_id).await?;
        if current.status != expected {
            return Err(TransitionError::StatusMismatch {
                content_id,
                expected,
                actual: current.status,
            });
        }
        if !expected.can_transition_to(to, kind) {
            return Err(TransitionError::IllegalTransition {
                from: expected,
                to,
                kind,
            });
        }
        if expected == to {
            return Ok(current);
        }

        let now = Utc::now();
        let next_version = current.version + 1;
        let result = content::Entity::update_many()
            .col_expr(content::Column::Status, Expr::value(to))
            .col_expr(content::Column::LastMessage, Expr::value(message.clone()))
            .col_expr(content::Column::Version, Expr::value(next_version))
            .col_expr(content::Column::UpdatedAt, Expr::value(now))
            .filter(content::Column::Id.eq(content_id))
            .filter(content::Column::Version.eq(current.version))
            .filter(content::Column::Status.eq(expected))
            .exec(self.conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(content_id, from = %expected, to = %to, "Lost status race");
            return Err(TransitionError::Stale { content_id });
        }

        self.audit(
            AUDIT_CONTENT,
            content_id,
            Some(expected.as_str()),
            to.as_str(),
            message.clone(),
        )
        .await?;

        info!(content_id, from = %expected, to = %to, kind = ?kind, "Content status changed");

        Ok(content::Model {
            status: to,
            last_message: message,
            version: next_version,
            updated_at: now,
            ..current
        })
    }

    /// Record the latest error or note without touching the status.
    pub async fn set_message(&self, content_id: i32, message: impl Into<String>) -> Result<(), DbErr> {
        content::Entity::update_many()
            .col_expr(content::Column::LastMessage, Expr::value(Some(message.into())))
            .col_expr(content::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(content::Column::Id.eq(content_id))
            .exec(self.conn)
            .await?;
        Ok(())
    }

    /// Mark a piece `committed` once a provider accepted it. Returns false if it already was.
    pub async fn commit_piece(&self, piece_id: i32, message: Option<String>) -> Result<bool, DbErr> {
        let result = piece_commitment::Entity::update_many()
            .col_expr(
                piece_commitment::Column::Status,
                Expr::value(CommitmentStatus::Committed),
            )
            .col_expr(piece_commitment::Column::LastMessage, Expr::value(message.clone()))
            .col_expr(piece_commitment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(piece_commitment::Column::Id.eq(piece_id))
            .filter(piece_commitment::Column::Status.eq(CommitmentStatus::Open))
            .exec(self.conn)
            .await?;

        if result.rows_affected == 0 {
            return Ok(false);
        }
        self.audit(
            AUDIT_PIECE,
            piece_id,
            Some(CommitmentStatus::Open.as_str()),
            CommitmentStatus::Committed.as_str(),
            message,
        )
        .await?;
        Ok(true)
    }

    pub(crate) async fn audit(
        &self,
        entity: &str,
        entity_id: i32,
        from_status: Option<&str>,
        to_status: &str,
        message: Option<String>,
    ) -> Result<(), DbErr> {
        audit_log::ActiveModel {
            entity: Set(entity.to_string()),
            entity_id: Set(entity_id),
            from_status: Set(from_status.map(str::to_string)),
            to_status: Set(to_status.to_string()),
            message: Set(message),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.conn)
        .await?;
        Ok(())
    }
}
