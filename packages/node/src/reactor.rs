//! Applies transport events for transfer channels to deals and content.

use std::sync::Arc;

use chrono::Utc;
use common::storage::ContentHash;
use common::{ContentStatus, TransferEvent, TransferPhase, TransitionKind};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, TransactionTrait};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::entity::{content, content_deal};
use crate::jobs::TransferRestartJob;
use crate::lifecycle::{Lifecycle, TransitionError};
use crate::state::ProcessorContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorOutcome {
    Applied(ContentStatus),
    Ignored(&'static str),
}

pub struct TransferReactor {
    ctx: Arc<ProcessorContext>,
}

impl TransferReactor {
    pub fn new(ctx: Arc<ProcessorContext>) -> Self {
        Self { ctx }
    }

    pub async fn on_transfer_event(&self, event: &TransferEvent) -> anyhow::Result<ReactorOutcome> {
        let phase = event.status.phase();
        let target = match phase {
            TransferPhase::Started => ContentStatus::TransferStarted,
            TransferPhase::Ongoing => ContentStatus::TransferOngoing,
            TransferPhase::Finished => ContentStatus::TransferFinished,
            TransferPhase::Failed => ContentStatus::TransferFailed,
            TransferPhase::Ignored => return Ok(ReactorOutcome::Ignored("uninteresting status")),
        };

        let Some(deal) = content_deal::Entity::find_by_id(event.deal_id)
            .one(&self.ctx.db)
            .await?
        else {
            return Ok(ReactorOutcome::Ignored("unknown deal"));
        };
        if deal.failed {
            return Ok(ReactorOutcome::Ignored("deal is no longer active"));
        }
        if deal.transfer_finished.is_some() {
            return Ok(ReactorOutcome::Ignored("transfer already finished"));
        }

        let content = match Lifecycle::new(&self.ctx.db).load(deal.content_id).await {
            Ok(content) => content,
            Err(TransitionError::NotFound(_)) => return Ok(ReactorOutcome::Ignored("unknown content")),
            Err(e) => return Err(e.into()),
        };
        if !content.status.can_transition_to(target, TransitionKind::Forward) {
            return Ok(ReactorOutcome::Ignored("not a legal edge from the current status"));
        }

        let message = match phase {
            TransferPhase::Failed => Some(
                event
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("transfer {}", event.status)),
            ),
            _ => event.message.clone(),
        };

        let now = Utc::now();
        let mut update = content_deal::Entity::update_many()
            .col_expr(content_deal::Column::UpdatedAt, Expr::value(now));
        match phase {
            TransferPhase::Started => {
                if deal.transfer_started.is_none() {
                    update = update
                        .col_expr(content_deal::Column::TransferStarted, Expr::value(Some(now)));
                }
                if deal.dt_chan.is_none() {
                    update = update.col_expr(
                        content_deal::Column::DtChan,
                        Expr::value(Some(event.transfer_id.clone())),
                    );
                }
            }
            TransferPhase::Finished => {
                update = update
                    .col_expr(content_deal::Column::TransferFinished, Expr::value(Some(now)))
                    .col_expr(content_deal::Column::SealedAt, Expr::value(Some(now)))
                    .col_expr(content_deal::Column::OnChainAt, Expr::value(Some(now)));
            }
            TransferPhase::Failed => {
                update = update
                    .col_expr(content_deal::Column::FailedAt, Expr::value(Some(now)))
                    .col_expr(content_deal::Column::LastMessage, Expr::value(message.clone()));
            }
            _ => {}
        }

        let txn = self.ctx.db.begin().await?;
        update
            .filter(content_deal::Column::Id.eq(deal.id))
            .exec(&txn)
            .await?;
        match Lifecycle::new(&txn)
            .transition(content.id, content.status, target, TransitionKind::Forward, message)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_contended() => {
                debug!(deal_id = deal.id, error = %e, "Transfer event lost a status race");
                return Ok(ReactorOutcome::Ignored("content changed underneath"));
            }
            Err(e) => return Err(e.into()),
        }
        txn.commit().await?;

        info!(
            deal_id = deal.id,
            content_id = content.id,
            channel = %event.transfer_id,
            transfer_status = %event.status,
            "Transfer event applied"
        );

        match phase {
            TransferPhase::Finished => {
                self.ctx
                    .restarts
                    .lock()
                    .await
                    .clear(&TransferRestartJob::tracker_key(deal.id));
                if !self.ctx.config.transfer.keep_copies {
                    self.release_copy(content);
                }
            }
            TransferPhase::Failed => {
                self.ctx
                    .dispatcher
                    .submit(TransferRestartJob::new(self.ctx.clone(), deal.id))?;
            }
            _ => {}
        }

        Ok(ReactorOutcome::Applied(target))
    }

    /// Drop the local bytes once the provider has them, unless another content still needs them.
    fn release_copy(&self, content: content::Model) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let others = content::Entity::find()
                .filter(content::Column::Cid.eq(content.cid.clone()))
                .filter(content::Column::Id.ne(content.id))
                .filter(content::Column::Status.ne(ContentStatus::TransferFinished))
                .count(&ctx.db)
                .await;
            match others {
                Ok(0) => {}
                Ok(n) => {
                    debug!(content_id = content.id, others = n, "Local copy still referenced");
                    return;
                }
                Err(e) => {
                    warn!(content_id = content.id, error = %e, "Could not check copy references");
                    return;
                }
            }

            let result = match ContentHash::from_hex(&content.cid) {
                Ok(hash) => ctx.blockstore.release(&hash).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(removed) => {
                    debug!(content_id = content.id, removed, "Released local copy");
                }
                Err(e) => warn!(content_id = content.id, error = %e, "Failed to release local copy"),
            }
        });
    }

    /// Consume events until every sender is dropped.
    pub async fn run(self, mut events: mpsc::Receiver<TransferEvent>) {
        info!("Transfer reactor started");
        while let Some(event) = events.recv().await {
            match self.on_transfer_event(&event).await {
                Ok(ReactorOutcome::Applied(status)) => {
                    debug!(deal_id = event.deal_id, %status, "Event applied");
                }
                Ok(ReactorOutcome::Ignored(reason)) => {
                    debug!(deal_id = event.deal_id, transfer_status = %event.status, reason, "Event ignored");
                }
                Err(e) => {
                    error!(deal_id = event.deal_id, error = %e, "Failed to apply transfer event");
                }
            }
        }
        info!("Transfer reactor stopped");
    }
}
