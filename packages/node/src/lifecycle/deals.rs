use std::fmt;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{AUDIT_DEAL, Lifecycle};
use crate::entity::{content_deal, deal_replacement};

/// Why a new deal replaced the active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplacementReason {
    Repair,
    Retry,
    AutoRetry,
    /// The deal-making job resubmitting itself after a transport failure.
    Resend,
}

impl ReplacementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repair => "repair",
            Self::Retry => "retry",
            Self::AutoRetry => "auto-retry",
            Self::Resend => "resend",
        }
    }
}

impl fmt::Display for ReplacementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<C: ConnectionTrait> Lifecycle<'_, C> {
    /// The content's deal with `failed = false`, if any.
    pub async fn active_deal(&self, content_id: i32) -> Result<Option<content_deal::Model>, DbErr> {
        content_deal::Entity::find()
            .filter(content_deal::Column::ContentId.eq(content_id))
            .filter(content_deal::Column::Failed.eq(false))
            .order_by_desc(content_deal::Column::Id)
            .one(self.conn)
            .await
    }

    pub async fn latest_deal(&self, content_id: i32) -> Result<Option<content_deal::Model>, DbErr> {
        content_deal::Entity::find()
            .filter(content_deal::Column::ContentId.eq(content_id))
            .order_by_desc(content_deal::Column::Id)
            .one(self.conn)
            .await
    }

    /// Insert `deal` as the content's new active deal, superseding whatever was active.
    ///
    /// Run inside a transaction so no reader sees two active deals.
    pub async fn open_deal(
        &self,
        deal: content_deal::ActiveModel,
        content_id: i32,
        reason: ReplacementReason,
    ) -> Result<content_deal::Model, DbErr> {
        let previous: Vec<content_deal::Model> = content_deal::Entity::find()
            .filter(content_deal::Column::ContentId.eq(content_id))
            .filter(content_deal::Column::Failed.eq(false))
            .all(self.conn)
            .await?;

        let inserted = deal.insert(self.conn).await?;

        for old in previous {
            self.fail_deal(old.id, format!("superseded by deal {}", inserted.id))
                .await?;
            deal_replacement::ActiveModel {
                content_id: Set(content_id),
                old_deal_id: Set(old.id),
                new_deal_id: Set(inserted.id),
                reason: Set(reason.as_str().to_string()),
                created_at: Set(Utc::now()),
                ..Default::default()
            }
            .insert(self.conn)
            .await?;
            info!(
                content_id,
                old_deal_id = old.id,
                new_deal_id = inserted.id,
                reason = %reason,
                "Deal superseded"
            );
        }

        self.audit(AUDIT_DEAL, inserted.id, None, "active", None)
            .await?;
        Ok(inserted)
    }

    /// Retire a deal. Returns false if it was already failed.
    pub async fn fail_deal(&self, deal_id: i32, message: impl Into<String>) -> Result<bool, DbErr> {
        let message = message.into();
        let now = Utc::now();
        let result = content_deal::Entity::update_many()
            .col_expr(content_deal::Column::Failed, Expr::value(true))
            .col_expr(content_deal::Column::FailedAt, Expr::value(Some(now)))
            .col_expr(content_deal::Column::LastMessage, Expr::value(Some(message.clone())))
            .col_expr(content_deal::Column::UpdatedAt, Expr::value(now))
            .filter(content_deal::Column::Id.eq(deal_id))
            .filter(content_deal::Column::Failed.eq(false))
            .exec(self.conn)
            .await?;

        if result.rows_affected == 0 {
            return Ok(false);
        }
        self.audit(AUDIT_DEAL, deal_id, Some("active"), "failed", Some(message))
            .await?;
        Ok(true)
    }
}
