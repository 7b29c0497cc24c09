use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dispatcher::Job;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tracing::{debug, info, warn};

use crate::entity::content_deal;
use crate::lifecycle::Lifecycle;
use crate::market::DealStatusQuery;
use crate::state::ProcessorContext;

/// Ask the provider about the content's newest deal and copy what it reports onto the deal row.
/// Never changes the content status.
pub struct StatusCheckJob {
    ctx: Arc<ProcessorContext>,
    content_id: i32,
}

impl StatusCheckJob {
    pub fn new(ctx: Arc<ProcessorContext>, content_id: i32) -> Self {
        Self { ctx, content_id }
    }
}

#[async_trait]
impl Job for StatusCheckJob {
    fn name(&self) -> &'static str {
        "status-check"
    }

    fn key(&self) -> Option<String> {
        Some(format!("status:{}", self.content_id))
    }

    async fn run(&self) -> anyhow::Result<()> {
        let lifecycle = Lifecycle::new(&self.ctx.db);
        let Some(deal) = lifecycle.latest_deal(self.content_id).await? else {
            debug!(content_id = self.content_id, "No deal to check");
            return Ok(());
        };
        if deal.proposal_cid.is_none() && deal.deal_uuid.is_nil() {
            return Ok(());
        }

        let query = DealStatusQuery {
            miner: deal.miner.clone(),
            deal_uuid: (!deal.deal_uuid.is_nil()).then_some(deal.deal_uuid),
            proposal_cid: deal.proposal_cid.clone(),
        };
        let report = match self.ctx.market.deal_status(&query).await {
            Ok(report) => report,
            Err(e) => {
                warn!(content_id = self.content_id, deal_id = deal.id, error = %e, "Deal status query failed");
                lifecycle
                    .set_message(self.content_id, format!("status check failed: {e}"))
                    .await?;
                return Ok(());
            }
        };

        let now = Utc::now();
        let message = match &report.message {
            Some(m) => format!("{}: {m}", report.state),
            None => report.state.clone(),
        };

        let mut update = content_deal::Entity::update_many()
            .col_expr(content_deal::Column::LastMessage, Expr::value(Some(message.clone())))
            .col_expr(content_deal::Column::Slashed, Expr::value(report.slashed))
            .col_expr(content_deal::Column::UpdatedAt, Expr::value(now));
        if let Some(chain_id) = report.deal_id {
            update = update.col_expr(content_deal::Column::DealId, Expr::value(Some(chain_id)));
        }
        if report.on_chain && deal.on_chain_at.is_none() {
            update = update.col_expr(content_deal::Column::OnChainAt, Expr::value(Some(now)));
        }
        if report.sealed && deal.sealed_at.is_none() {
            update = update.col_expr(content_deal::Column::SealedAt, Expr::value(Some(now)));
        }
        update
            .filter(content_deal::Column::Id.eq(deal.id))
            .exec(&self.ctx.db)
            .await?;

        lifecycle.set_message(self.content_id, message).await?;
        info!(
            content_id = self.content_id,
            deal_id = deal.id,
            state = %report.state,
            on_chain = report.on_chain,
            sealed = report.sealed,
            "Deal status refreshed"
        );
        Ok(())
    }
}
