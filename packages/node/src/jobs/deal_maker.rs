use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use common::retry::calculate_backoff;
use common::{ContentStatus, TransitionKind};
use commp::PieceCid;
use dispatcher::Job;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::contended;
use crate::entity::{
    content, content_deal, content_deal_proposal_parameters, content_miner, content_wallet,
    piece_commitment,
};
use crate::lifecycle::{Lifecycle, ReplacementReason, TransitionError};
use crate::market::{DealProposal, MarketError, TransferRequest};
use crate::state::ProcessorContext;

/// `piece-assigned -> making-deal-proposal -> deal-proposal-sent [-> transfer-started]`.
///
/// Every run opens a fresh deal row. Transport failures send the content back to
/// `piece-assigned` and resubmit with `attempt + 1` until `deal.max_attempts` is reached.
pub struct DealMakingJob {
    ctx: Arc<ProcessorContext>,
    content_id: i32,
    attempt: u32,
    reason: ReplacementReason,
}

struct Prepared {
    piece: piece_commitment::Model,
    piece_cid: PieceCid,
    miner: String,
    wallet: String,
    label: String,
    duration: i64,
    start_epoch: Option<i64>,
    end_epoch: Option<i64>,
    verified: bool,
    remove_unsealed_copy: bool,
    skip_ipni_announce: bool,
}

/// Where a run stopped and whether another attempt is worth it.
struct Failure {
    from: ContentStatus,
    deal_id: Option<i32>,
    retryable: bool,
    message: String,
}

impl Failure {
    fn fatal(from: ContentStatus, deal_id: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            from,
            deal_id,
            retryable: false,
            message: message.into(),
        }
    }

    fn market(from: ContentStatus, deal_id: i32, err: MarketError) -> Self {
        Self {
            from,
            deal_id: Some(deal_id),
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl DealMakingJob {
    pub fn new(
        ctx: Arc<ProcessorContext>,
        content_id: i32,
        attempt: u32,
        reason: ReplacementReason,
    ) -> Self {
        Self {
            ctx,
            content_id,
            attempt,
            reason,
        }
    }

    async fn resolve_miner(&self) -> Result<Option<String>, DbErr> {
        let assigned = content_miner::Entity::find()
            .filter(content_miner::Column::ContentId.eq(self.content_id))
            .filter(content_miner::Column::Active.eq(true))
            .order_by_desc(content_miner::Column::Id)
            .one(&self.ctx.db)
            .await?;
        if let Some(row) = assigned {
            return Ok(Some(row.miner));
        }

        let miners = &self.ctx.config.deal.default_miners;
        if miners.is_empty() {
            return Ok(None);
        }
        let slot = self.content_id.unsigned_abs() as usize % miners.len();
        Ok(Some(miners[slot].clone()))
    }

    async fn resolve_wallet(&self) -> Result<String, DbErr> {
        let assigned = content_wallet::Entity::find()
            .filter(content_wallet::Column::ContentId.eq(self.content_id))
            .one(&self.ctx.db)
            .await?;
        Ok(assigned
            .map(|row| row.wallet)
            .unwrap_or_else(|| self.ctx.config.deal.default_wallet.clone()))
    }

    async fn prepare(&self, content: &content::Model) -> anyhow::Result<Prepared> {
        let piece_id = content
            .piece_commitment_id
            .context("content has no piece commitment")?;
        let piece = piece_commitment::Entity::find_by_id(piece_id)
            .one(&self.ctx.db)
            .await?
            .with_context(|| format!("piece commitment {piece_id} is missing"))?;
        let piece_cid = PieceCid::parse(&piece.piece)
            .with_context(|| format!("undecodable piece cid {}", piece.piece))?;

        let miner = self
            .resolve_miner()
            .await?
            .context("no storage provider available")?;
        let wallet = self.resolve_wallet().await?;

        let params = content_deal_proposal_parameters::Entity::find()
            .filter(content_deal_proposal_parameters::Column::ContentId.eq(content.id))
            .filter(content_deal_proposal_parameters::Column::Active.eq(true))
            .order_by_desc(content_deal_proposal_parameters::Column::Id)
            .one(&self.ctx.db)
            .await?;

        let deal_config = &self.ctx.config.deal;
        let default_label = if deal_config.label.is_empty() {
            content.cid.clone()
        } else {
            format!("{}{}", deal_config.label, content.cid)
        };

        Ok(match params {
            Some(p) => Prepared {
                piece,
                piece_cid,
                miner,
                wallet,
                label: p.label.unwrap_or(default_label),
                duration: p.duration,
                start_epoch: p.start_epoch,
                end_epoch: p.end_epoch,
                verified: p.verified_deal,
                remove_unsealed_copy: p.remove_unsealed_copy,
                skip_ipni_announce: p.skip_ipni_announce,
            },
            None => Prepared {
                piece,
                piece_cid,
                miner,
                wallet,
                label: default_label,
                duration: deal_config.default_duration_epochs,
                start_epoch: None,
                end_epoch: None,
                verified: true,
                remove_unsealed_copy: false,
                skip_ipni_announce: false,
            },
        })
    }

    async fn open_deal(
        &self,
        prepared: &Prepared,
    ) -> Result<content_deal::Model, DbErr> {
        let now = Utc::now();
        let deal = content_deal::ActiveModel {
            content_id: Set(self.content_id),
            miner: Set(prepared.miner.clone()),
            proposal_cid: Set(None),
            deal_uuid: Set(Uuid::new_v4()),
            deal_id: Set(None),
            dt_chan: Set(None),
            verified: Set(prepared.verified),
            slashed: Set(false),
            failed: Set(false),
            failed_at: Set(None),
            transfer_started: Set(None),
            transfer_finished: Set(None),
            on_chain_at: Set(None),
            sealed_at: Set(None),
            last_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let txn = self.ctx.db.begin().await?;
        let deal = Lifecycle::new(&txn)
            .open_deal(deal, self.content_id, self.reason)
            .await?;
        txn.commit().await?;
        Ok(deal)
    }

    /// Store the provider's answer, move to `deal-proposal-sent` and commit the piece.
    async fn record_proposal(
        &self,
        deal: &content_deal::Model,
        piece_id: i32,
        proposal_cid: Option<String>,
        message: Option<String>,
    ) -> Result<(), TransitionError> {
        let txn = self.ctx.db.begin().await?;
        content_deal::Entity::update_many()
            .col_expr(content_deal::Column::ProposalCid, Expr::value(proposal_cid))
            .col_expr(content_deal::Column::LastMessage, Expr::value(message.clone()))
            .col_expr(content_deal::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(content_deal::Column::Id.eq(deal.id))
            .exec(&txn)
            .await?;

        let lifecycle = Lifecycle::new(&txn);
        lifecycle
            .transition(
                self.content_id,
                ContentStatus::MakingDealProposal,
                ContentStatus::DealProposalSent,
                TransitionKind::Forward,
                message,
            )
            .await?;
        lifecycle
            .commit_piece(piece_id, Some(format!("accepted by {}", deal.miner)))
            .await?;
        txn.commit().await?;
        Ok(())
    }

    async fn record_transfer(&self, deal_id: i32, channel: String) -> Result<(), TransitionError> {
        let now = Utc::now();
        content_deal::Entity::update_many()
            .col_expr(content_deal::Column::DtChan, Expr::value(Some(channel)))
            .col_expr(content_deal::Column::TransferStarted, Expr::value(Some(now)))
            .col_expr(content_deal::Column::UpdatedAt, Expr::value(now))
            .filter(content_deal::Column::Id.eq(deal_id))
            .exec(&self.ctx.db)
            .await?;

        Lifecycle::new(&self.ctx.db)
            .transition(
                self.content_id,
                ContentStatus::DealProposalSent,
                ContentStatus::TransferStarted,
                TransitionKind::Forward,
                None,
            )
            .await?;
        Ok(())
    }

    async fn make_deal(&self, content: &content::Model) -> Result<(), Failure> {
        let stage = ContentStatus::MakingDealProposal;
        let prepared = self
            .prepare(content)
            .await
            .map_err(|e| Failure::fatal(stage, None, format!("{e:#}")))?;
        let deal = self
            .open_deal(&prepared)
            .await
            .map_err(|e| Failure::fatal(stage, None, e.to_string()))?;

        let proposal = DealProposal {
            deal_uuid: deal.deal_uuid,
            miner: prepared.miner.clone(),
            client: prepared.wallet.clone(),
            piece_cid: prepared.piece_cid.to_string(),
            piece_size: prepared.piece.padded_piece_size as u64,
            payload_size: content.size as u64,
            payload_cid: content.cid.clone(),
            duration: prepared.duration,
            start_epoch: prepared.start_epoch,
            end_epoch: prepared.end_epoch,
            verified: prepared.verified,
            label: prepared.label.clone(),
            offline: content.connection_mode.is_offline(),
            remove_unsealed_copy: prepared.remove_unsealed_copy,
            skip_ipni_announce: prepared.skip_ipni_announce,
        };

        let (proposal_cid, message) = match self.ctx.market.send_proposal(&proposal).await {
            Ok(response) => (Some(response.proposal_cid), response.message),
            Err(MarketError::ProposalIdentical(message)) => {
                info!(
                    content_id = content.id,
                    deal_id = deal.id,
                    "Provider already holds this proposal"
                );
                (None, Some(message))
            }
            Err(e) => return Err(Failure::market(stage, deal.id, e)),
        };

        if let Err(e) = self
            .record_proposal(&deal, prepared.piece.id, proposal_cid, message)
            .await
        {
            return if e.is_contended() {
                warn!(content_id = content.id, error = %e, "Proposal outcome lost a status race");
                Ok(())
            } else {
                Err(Failure::fatal(stage, Some(deal.id), e.to_string()))
            };
        }
        info!(
            content_id = content.id,
            deal_id = deal.id,
            miner = %deal.miner,
            attempt = self.attempt,
            "Deal proposal sent"
        );

        if content.connection_mode.is_offline() {
            return Ok(());
        }

        let stage = ContentStatus::DealProposalSent;
        let request = TransferRequest {
            deal_id: deal.id,
            deal_uuid: deal.deal_uuid,
            miner: deal.miner.clone(),
            payload_cid: content.cid.clone(),
            size: content.size as u64,
        };
        let channel = self
            .ctx
            .market
            .start_transfer(&request)
            .await
            .map_err(|e| Failure::market(stage, deal.id, e))?;

        match self.record_transfer(deal.id, channel.clone()).await {
            Ok(()) => {
                info!(content_id = content.id, deal_id = deal.id, channel = %channel, "Transfer started");
                Ok(())
            }
            // The channel's first event got there before us.
            Err(e) if e.is_contended() => Ok(()),
            Err(e) => Err(Failure::fatal(stage, Some(deal.id), e.to_string())),
        }
    }

    async fn handle_failure(&self, failure: Failure) -> anyhow::Result<()> {
        let lifecycle = Lifecycle::new(&self.ctx.db);
        if let Some(deal_id) = failure.deal_id {
            lifecycle.fail_deal(deal_id, failure.message.clone()).await?;
        }

        let deal_config = &self.ctx.config.deal;
        if failure.retryable && self.attempt < deal_config.max_attempts {
            if let Err(e) = lifecycle
                .transition(
                    self.content_id,
                    failure.from,
                    ContentStatus::PieceAssigned,
                    TransitionKind::Retry,
                    Some(failure.message.clone()),
                )
                .await
            {
                return contended(self.name(), self.content_id, e);
            }

            let delay = calculate_backoff(
                self.attempt,
                deal_config.retry_base_delay_ms,
                deal_config.retry_max_delay_ms,
            );
            warn!(
                content_id = self.content_id,
                attempt = self.attempt,
                max_attempts = deal_config.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure.message,
                "Deal attempt failed, retrying"
            );
            self.ctx.dispatcher.submit_after(
                DealMakingJob::new(
                    self.ctx.clone(),
                    self.content_id,
                    self.attempt + 1,
                    ReplacementReason::Resend,
                ),
                delay,
            );
            return Ok(());
        }

        let message = if failure.retryable {
            format!("giving up after {} attempts: {}", self.attempt, failure.message)
        } else {
            failure.message
        };
        let to = match failure.from {
            ContentStatus::MakingDealProposal => ContentStatus::DealProposalFailed,
            _ => ContentStatus::TransferFailed,
        };
        error!(content_id = self.content_id, status = %to, error = %message, "Deal making failed");

        if let Err(e) = lifecycle
            .transition(
                self.content_id,
                failure.from,
                to,
                TransitionKind::Forward,
                Some(message),
            )
            .await
        {
            return contended(self.name(), self.content_id, e);
        }
        Ok(())
    }
}

#[async_trait]
impl Job for DealMakingJob {
    fn name(&self) -> &'static str {
        "deal-making"
    }

    fn key(&self) -> Option<String> {
        Some(format!("deal:{}", self.content_id))
    }

    async fn run(&self) -> anyhow::Result<()> {
        let content = match Lifecycle::new(&self.ctx.db)
            .transition(
                self.content_id,
                ContentStatus::PieceAssigned,
                ContentStatus::MakingDealProposal,
                TransitionKind::Forward,
                None,
            )
            .await
        {
            Ok(content) => content,
            Err(e) => return contended(self.name(), self.content_id, e),
        };

        match self.make_deal(&content).await {
            Ok(()) => Ok(()),
            Err(failure) => self.handle_failure(failure).await,
        }
    }
}
