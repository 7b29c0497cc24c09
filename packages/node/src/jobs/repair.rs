use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{ConnectionMode, ContentStatus, TransitionKind};
use dispatcher::Job;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::{CommitmentJob, DealMakingJob, contended};
use crate::entity::{
    content, content_deal, content_deal_proposal_parameters, content_miner, piece_commitment,
};
use crate::lifecycle::{Lifecycle, ReplacementReason, TransitionError};
use crate::state::ProcessorContext;
use crate::window::{DealWindow, EpochWindow};

/// Operator request to re-run deal making, optionally with a new provider or new deal window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRequest {
    pub connection_mode: ConnectionMode,
    #[serde(default)]
    pub miner: Option<String>,
    #[serde(default)]
    pub duration_in_days: Option<i64>,
    #[serde(default)]
    pub start_epoch_in_days: Option<i64>,
}

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("{0}")]
    Invalid(String),
    #[error("content {0} not found")]
    NotFound(i32),
    #[error("piece commitment {0} not found")]
    PieceNotFound(i32),
    #[error("content {id} is {status}, wait for it to settle")]
    InFlight { id: i32, status: ContentStatus },
    #[error(transparent)]
    Db(#[from] DbErr),
}

impl RepairRequest {
    fn window(&self) -> Option<DealWindow> {
        DealWindow::from_days(self.start_epoch_in_days, self.duration_in_days)
    }

    pub fn validate(&self) -> Result<(), RepairError> {
        if self.miner.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(RepairError::Invalid("miner must not be empty".into()));
        }
        if let Some(window) = self.window() {
            window.validate().map_err(RepairError::Invalid)?;
        }
        Ok(())
    }
}

async fn load_settled<C: ConnectionTrait>(
    db: &C,
    content_id: i32,
    mode: ConnectionMode,
) -> Result<content::Model, RepairError> {
    let content = content::Entity::find_by_id(content_id)
        .one(db)
        .await?
        .ok_or(RepairError::NotFound(content_id))?;
    if content.connection_mode != mode {
        return Err(RepairError::Invalid(format!(
            "content {content_id} uses connection mode {}, not {mode}",
            content.connection_mode
        )));
    }
    if content.status.is_in_flight() {
        return Err(RepairError::InFlight {
            id: content_id,
            status: content.status,
        });
    }
    Ok(content)
}

/// Synchronous checks run before a [`RepairJob`] is submitted.
pub async fn prepare_repair<C: ConnectionTrait>(
    db: &C,
    content_id: i32,
    request: &RepairRequest,
) -> Result<content::Model, RepairError> {
    request.validate()?;
    let content = load_settled(db, content_id, request.connection_mode).await?;
    if content.piece_commitment_id.is_none() {
        return Err(RepairError::Invalid(format!(
            "content {content_id} has no piece commitment to repair"
        )));
    }
    let deals = content_deal::Entity::find()
        .filter(content_deal::Column::ContentId.eq(content_id))
        .count(db)
        .await?;
    if deals == 0 {
        return Err(RepairError::Invalid(format!(
            "content {content_id} has no deal to repair"
        )));
    }
    Ok(content)
}

/// The settled content a piece commitment belongs to.
async fn piece_owner<C: ConnectionTrait>(
    db: &C,
    piece_id: i32,
) -> Result<content::Model, RepairError> {
    piece_commitment::Entity::find_by_id(piece_id)
        .one(db)
        .await?
        .ok_or(RepairError::PieceNotFound(piece_id))?;
    let content = content::Entity::find()
        .filter(content::Column::PieceCommitmentId.eq(piece_id))
        .one(db)
        .await?
        .ok_or_else(|| {
            RepairError::Invalid(format!(
                "piece commitment {piece_id} is not attached to any content"
            ))
        })?;
    if content.status.is_in_flight() {
        return Err(RepairError::InFlight {
            id: content.id,
            status: content.status,
        });
    }
    Ok(content)
}

/// Synchronous checks run before a [`PieceRepairJob`] is submitted.
pub async fn prepare_piece_repair<C: ConnectionTrait>(
    db: &C,
    piece_id: i32,
) -> Result<content::Model, RepairError> {
    piece_owner(db, piece_id).await
}

pub async fn prepare_retry<C: ConnectionTrait>(
    db: &C,
    content_id: i32,
    mode: ConnectionMode,
) -> Result<content::Model, RepairError> {
    load_settled(db, content_id, mode).await
}

/// Move settled content back to the earliest stage that still has work: `piece-assigned` when a
/// piece exists, otherwise `pinned`. `None` when the content is busy and nothing was written.
async fn reenter<C: ConnectionTrait>(
    conn: &C,
    job: &'static str,
    content: &content::Model,
    reason: ReplacementReason,
) -> anyhow::Result<Option<ContentStatus>> {
    let target = if content.piece_commitment_id.is_some() {
        ContentStatus::PieceAssigned
    } else {
        ContentStatus::Pinned
    };
    if let Err(e) = Lifecycle::new(conn)
        .transition(
            content.id,
            content.status,
            target,
            TransitionKind::Repair,
            Some(format!("{reason} requested")),
        )
        .await
    {
        if matches!(e, TransitionError::IllegalTransition { .. }) {
            warn!(job, content_id = content.id, status = %content.status, "Content is busy, restart skipped");
            return Ok(None);
        }
        contended(job, content.id, e)?;
        return Ok(None);
    }
    info!(job, content_id = content.id, from = %content.status, to = %target, reason = %reason, "Restarting pipeline");
    Ok(Some(target))
}

fn submit_next(
    ctx: &Arc<ProcessorContext>,
    content_id: i32,
    target: ContentStatus,
    reason: ReplacementReason,
) -> anyhow::Result<()> {
    match target {
        ContentStatus::PieceAssigned => {
            ctx.dispatcher
                .submit(DealMakingJob::new(ctx.clone(), content_id, 1, reason))?;
        }
        _ => {
            ctx.dispatcher
                .submit(CommitmentJob::with_reason(ctx.clone(), content_id, reason))?;
        }
    }
    Ok(())
}

pub struct RepairJob {
    ctx: Arc<ProcessorContext>,
    content_id: i32,
    request: RepairRequest,
}

impl RepairJob {
    pub fn new(ctx: Arc<ProcessorContext>, content_id: i32, request: RepairRequest) -> Self {
        Self {
            ctx,
            content_id,
            request,
        }
    }

    /// Retire the active provider assignment and append `miner` as the new one.
    async fn assign_miner<C: ConnectionTrait>(&self, conn: &C, miner: &str) -> Result<(), DbErr> {
        let now = Utc::now();
        content_miner::Entity::update_many()
            .col_expr(content_miner::Column::Active, Expr::value(false))
            .col_expr(content_miner::Column::UpdatedAt, Expr::value(now))
            .filter(content_miner::Column::ContentId.eq(self.content_id))
            .filter(content_miner::Column::Active.eq(true))
            .exec(conn)
            .await?;
        content_miner::ActiveModel {
            content_id: Set(self.content_id),
            miner: Set(miner.to_string()),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(conn)
        .await?;
        Ok(())
    }

    /// Append a parameter row with the new deal window, carrying the other fields over from the
    /// row it retires.
    async fn rewrite_window<C: ConnectionTrait>(
        &self,
        conn: &C,
        window: DealWindow,
    ) -> Result<(), DbErr> {
        let now = Utc::now();
        let EpochWindow {
            start_epoch,
            end_epoch,
            duration,
        } = window.epochs_from(now);

        let previous = content_deal_proposal_parameters::Entity::find()
            .filter(content_deal_proposal_parameters::Column::ContentId.eq(self.content_id))
            .filter(content_deal_proposal_parameters::Column::Active.eq(true))
            .order_by_desc(content_deal_proposal_parameters::Column::Id)
            .one(conn)
            .await?;
        content_deal_proposal_parameters::Entity::update_many()
            .col_expr(content_deal_proposal_parameters::Column::Active, Expr::value(false))
            .col_expr(content_deal_proposal_parameters::Column::UpdatedAt, Expr::value(now))
            .filter(content_deal_proposal_parameters::Column::ContentId.eq(self.content_id))
            .filter(content_deal_proposal_parameters::Column::Active.eq(true))
            .exec(conn)
            .await?;

        let (label, verified, remove_unsealed, skip_ipni) = match previous {
            Some(p) => (
                p.label,
                p.verified_deal,
                p.remove_unsealed_copy,
                p.skip_ipni_announce,
            ),
            None => (None, true, false, false),
        };
        content_deal_proposal_parameters::ActiveModel {
            content_id: Set(self.content_id),
            label: Set(label),
            duration: Set(duration),
            start_epoch: Set(Some(start_epoch)),
            end_epoch: Set(Some(end_epoch)),
            verified_deal: Set(verified),
            remove_unsealed_copy: Set(remove_unsealed),
            skip_ipni_announce: Set(skip_ipni),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(conn)
        .await?;
        info!(content_id = self.content_id, start_epoch, end_epoch, "Deal window rewritten");
        Ok(())
    }
}

#[async_trait]
impl Job for RepairJob {
    fn name(&self) -> &'static str {
        "repair"
    }

    fn key(&self) -> Option<String> {
        Some(format!("repair:{}", self.content_id))
    }

    /// New assignments, the settled re-check and the repair transition commit together; a repair
    /// that finds the content busy leaves every row as it was.
    async fn run(&self) -> anyhow::Result<()> {
        let txn = self.ctx.db.begin().await?;
        let content = match load_settled(&txn, self.content_id, self.request.connection_mode).await
        {
            Ok(content) => content,
            Err(RepairError::Db(e)) => return Err(e.into()),
            Err(e) => {
                warn!(content_id = self.content_id, error = %e, "Repair no longer applies");
                return Ok(());
            }
        };

        if let Some(miner) = &self.request.miner {
            self.assign_miner(&txn, miner).await?;
        }
        if let Some(window) = self.request.window() {
            self.rewrite_window(&txn, window).await?;
        }
        let Some(target) = reenter(&txn, self.name(), &content, ReplacementReason::Repair).await?
        else {
            return Ok(());
        };
        txn.commit().await?;

        submit_next(&self.ctx, self.content_id, target, ReplacementReason::Repair)
    }
}

/// Throw away a piece commitment and compute it again from the local copy of its content.
///
/// The old row is detached from the content and kept; the content goes back to `pinned` and the
/// usual commitment job takes over.
pub struct PieceRepairJob {
    ctx: Arc<ProcessorContext>,
    piece_id: i32,
}

impl PieceRepairJob {
    pub fn new(ctx: Arc<ProcessorContext>, piece_id: i32) -> Self {
        Self { ctx, piece_id }
    }
}

#[async_trait]
impl Job for PieceRepairJob {
    fn name(&self) -> &'static str {
        "piece-repair"
    }

    fn key(&self) -> Option<String> {
        Some(format!("piece-repair:{}", self.piece_id))
    }

    async fn run(&self) -> anyhow::Result<()> {
        let txn = self.ctx.db.begin().await?;
        let content = match piece_owner(&txn, self.piece_id).await {
            Ok(content) => content,
            Err(RepairError::Db(e)) => return Err(e.into()),
            Err(e) => {
                warn!(piece_id = self.piece_id, error = %e, "Piece repair no longer applies");
                return Ok(());
            }
        };

        if let Err(e) = Lifecycle::new(&txn)
            .transition(
                content.id,
                content.status,
                ContentStatus::Pinned,
                TransitionKind::Repair,
                Some(format!("piece commitment {} recomputation requested", self.piece_id)),
            )
            .await
        {
            if matches!(e, TransitionError::IllegalTransition { .. }) {
                warn!(piece_id = self.piece_id, content_id = content.id, status = %content.status, "Content is busy, piece repair skipped");
                return Ok(());
            }
            return contended(self.name(), content.id, e);
        }
        content::Entity::update_many()
            .col_expr(content::Column::PieceCommitmentId, Expr::value(Option::<i32>::None))
            .filter(content::Column::Id.eq(content.id))
            .exec(&txn)
            .await?;
        piece_commitment::Entity::update_many()
            .col_expr(
                piece_commitment::Column::LastMessage,
                Expr::value(Some(format!("detached from content {}", content.id))),
            )
            .col_expr(piece_commitment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(piece_commitment::Column::Id.eq(self.piece_id))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!(piece_id = self.piece_id, content_id = content.id, "Recomputing piece commitment");
        submit_next(
            &self.ctx,
            content.id,
            ContentStatus::Pinned,
            ReplacementReason::Repair,
        )
    }
}

/// Same path as [`RepairJob`] with the stored parameters left alone.
pub struct RetryJob {
    ctx: Arc<ProcessorContext>,
    content_id: i32,
    reason: ReplacementReason,
}

impl RetryJob {
    pub fn new(ctx: Arc<ProcessorContext>, content_id: i32, reason: ReplacementReason) -> Self {
        Self {
            ctx,
            content_id,
            reason,
        }
    }
}

#[async_trait]
impl Job for RetryJob {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn key(&self) -> Option<String> {
        Some(format!("retry:{}", self.content_id))
    }

    async fn run(&self) -> anyhow::Result<()> {
        let content = match Lifecycle::new(&self.ctx.db).load(self.content_id).await {
            Ok(content) => content,
            Err(TransitionError::NotFound(_)) => {
                warn!(content_id = self.content_id, "Content vanished before retry");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(target) = reenter(&self.ctx.db, self.name(), &content, self.reason).await? {
            submit_next(&self.ctx, self.content_id, target, self.reason)?;
        }
        Ok(())
    }
}
