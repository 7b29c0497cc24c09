use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::ContentStatus;
use common::retry::{RetryDecision, calculate_backoff};
use dispatcher::Job;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DbErr, EntityTrait, QueryFilter};
use tracing::{debug, error, info, warn};

use crate::entity::content_deal;
use crate::lifecycle::Lifecycle;
use crate::market::MarketError;
use crate::state::ProcessorContext;

/// Ask the transport to resume a failed channel, with a bounded number of attempts per deal.
///
/// The first run counts the attempt and resubmits itself after the backoff; the delayed run talks
/// to the transport. No worker is held while the backoff elapses.
pub struct TransferRestartJob {
    ctx: Arc<ProcessorContext>,
    deal_id: i32,
    due: Option<u32>,
}

impl TransferRestartJob {
    pub fn new(ctx: Arc<ProcessorContext>, deal_id: i32) -> Self {
        Self {
            ctx,
            deal_id,
            due: None,
        }
    }

    fn resume(&self, attempt: u32) -> Self {
        Self {
            ctx: self.ctx.clone(),
            deal_id: self.deal_id,
            due: Some(attempt),
        }
    }

    pub(crate) fn tracker_key(deal_id: i32) -> String {
        format!("deal-{deal_id}")
    }

    /// Record `message` on the deal and its content.
    async fn note(&self, deal: &content_deal::Model, message: String) -> Result<(), DbErr> {
        content_deal::Entity::update_many()
            .col_expr(content_deal::Column::LastMessage, Expr::value(Some(message.clone())))
            .col_expr(content_deal::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(content_deal::Column::Id.eq(deal.id))
            .exec(&self.ctx.db)
            .await?;
        Lifecycle::new(&self.ctx.db)
            .set_message(deal.content_id, message)
            .await
    }
}

#[async_trait]
impl Job for TransferRestartJob {
    fn name(&self) -> &'static str {
        match self.due {
            None => "transfer-restart",
            Some(_) => "transfer-resume",
        }
    }

    fn key(&self) -> Option<String> {
        match self.due {
            None => Some(format!("restart:{}", self.deal_id)),
            Some(_) => Some(format!("resume:{}", self.deal_id)),
        }
    }

    async fn run(&self) -> anyhow::Result<()> {
        let Some(deal) = content_deal::Entity::find_by_id(self.deal_id)
            .one(&self.ctx.db)
            .await?
        else {
            warn!(deal_id = self.deal_id, "Deal vanished before restart");
            return Ok(());
        };
        if deal.failed || deal.transfer_finished.is_some() {
            return Ok(());
        }
        let Some(channel) = deal.dt_chan.clone() else {
            self.note(&deal, "transfer failed before a channel was opened".into())
                .await?;
            return Ok(());
        };

        match self.due {
            None => self.schedule(&deal, &channel).await,
            Some(attempt) => self.restart(&deal, &channel, attempt).await,
        }
    }
}

impl TransferRestartJob {
    async fn schedule(&self, deal: &content_deal::Model, channel: &str) -> anyhow::Result<()> {
        let key = Self::tracker_key(deal.id);
        let decision = self
            .ctx
            .restarts
            .lock()
            .await
            .record_failure(&key, "transfer failed");
        let attempt = match decision {
            RetryDecision::Retry { attempt, .. } => attempt,
            RetryDecision::Exhausted { history } => {
                error!(
                    deal_id = deal.id,
                    channel = %channel,
                    attempts = history.len(),
                    "Transfer restart attempts exhausted"
                );
                self.note(deal, "transfer restart attempts exhausted".into())
                    .await?;
                return Ok(());
            }
        };

        let transfer = &self.ctx.config.transfer;
        let delay = calculate_backoff(
            attempt,
            transfer.restart_base_delay_ms,
            transfer.restart_max_delay_ms,
        );
        debug!(deal_id = deal.id, attempt, ?delay, "Transfer restart scheduled");
        self.ctx.dispatcher.submit_after(self.resume(attempt), delay);
        Ok(())
    }

    async fn restart(
        &self,
        deal: &content_deal::Model,
        channel: &str,
        attempt: u32,
    ) -> anyhow::Result<()> {
        let content = Lifecycle::new(&self.ctx.db).load(deal.content_id).await?;
        if content.status != ContentStatus::TransferFailed {
            debug!(deal_id = deal.id, status = %content.status, "Transfer recovered before restart");
            return Ok(());
        }

        match self.ctx.market.transfer_status(channel).await {
            Ok(Some(state)) => {
                info!(deal_id = deal.id, channel = %channel, status = %state.status, attempt, "Restarting transfer");
            }
            Ok(None) => {
                let err = MarketError::NoTransferState(channel.to_string());
                warn!(deal_id = deal.id, error = %err, "Transfer cannot be restarted");
                self.note(deal, err.to_string()).await?;
                return Ok(());
            }
            Err(e) => {
                warn!(deal_id = deal.id, channel = %channel, error = %e, "Transfer status query failed");
                self.note(deal, format!("transfer status query failed: {e}"))
                    .await?;
                return Ok(());
            }
        }

        if let Err(e) = self.ctx.market.restart_transfer(channel).await {
            warn!(deal_id = deal.id, channel = %channel, error = %e, "Transfer restart failed");
            self.note(deal, format!("transfer restart failed: {e}"))
                .await?;
        }
        Ok(())
    }
}
