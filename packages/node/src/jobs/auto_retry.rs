use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::ContentStatus;
use sea_orm::{ColumnTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::RetryJob;
use crate::entity::{content, content_deal};
use crate::lifecycle::ReplacementReason;
use crate::state::ProcessorContext;

/// Statuses the sweep picks up. Computation failures are left for an operator.
const RETRYABLE: [ContentStatus; 2] = [
    ContentStatus::DealProposalFailed,
    ContentStatus::TransferFailed,
];

/// Submit a [`RetryJob`] for every failed content that has cooled down and still has retries left.
/// Returns the content ids submitted.
pub async fn sweep_auto_retry(ctx: &Arc<ProcessorContext>) -> Result<Vec<i32>, DbErr> {
    let retry = &ctx.config.retry;
    let cutoff = Utc::now() - chrono::Duration::seconds(retry.cooldown_secs as i64);

    let candidates = content::Entity::find()
        .filter(content::Column::Status.is_in(RETRYABLE))
        .filter(content::Column::AutoRetry.eq(true))
        .filter(content::Column::UpdatedAt.lt(cutoff))
        .order_by_asc(content::Column::UpdatedAt)
        .all(&ctx.db)
        .await?;

    let mut submitted = Vec::new();
    for row in candidates {
        let deals = content_deal::Entity::find()
            .filter(content_deal::Column::ContentId.eq(row.id))
            .count(&ctx.db)
            .await?;
        if deals >= retry.max_auto_retry + 1 {
            debug!(content_id = row.id, deals, "Auto-retry budget spent");
            continue;
        }

        let job = RetryJob::new(ctx.clone(), row.id, ReplacementReason::AutoRetry);
        match ctx.dispatcher.submit(job) {
            Ok(_) => submitted.push(row.id),
            Err(e) => {
                error!(content_id = row.id, error = %e, "Auto-retry submission refused");
                break;
            }
        }
    }

    if !submitted.is_empty() {
        info!(count = submitted.len(), "Auto-retry submitted failed content");
    }
    Ok(submitted)
}

/// Periodic sweep loop. Exits when `shutdown` is cancelled.
pub async fn run_auto_retry(ctx: Arc<ProcessorContext>, shutdown: CancellationToken) {
    let period = Duration::from_secs(ctx.config.retry.scan_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs = period.as_secs(), "Auto-retry sweep started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = sweep_auto_retry(&ctx).await {
                    error!(error = %e, "Auto-retry sweep failed");
                }
            }
        }
    }
    info!("Auto-retry sweep stopped");
}
