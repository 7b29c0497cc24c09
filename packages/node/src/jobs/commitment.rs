use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use common::storage::ContentHash;
use common::{CommitmentStatus, ContentStatus, TransitionKind};
use commp::PieceInfo;
use dispatcher::Job;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use tokio_util::io::SyncIoBridge;
use tracing::{error, info};

use super::{DealMakingJob, contended};
use crate::entity::{content, piece_commitment};
use crate::lifecycle::{Lifecycle, ReplacementReason};
use crate::state::ProcessorContext;

/// `pinned -> piece-computing -> piece-assigned | piece-computing-failed`.
pub struct CommitmentJob {
    ctx: Arc<ProcessorContext>,
    content_id: i32,
    /// Recorded on the deal replacement if the follow-up deal supersedes an active one.
    reason: ReplacementReason,
}

impl CommitmentJob {
    pub fn new(ctx: Arc<ProcessorContext>, content_id: i32) -> Self {
        Self::with_reason(ctx, content_id, ReplacementReason::Resend)
    }

    pub fn with_reason(
        ctx: Arc<ProcessorContext>,
        content_id: i32,
        reason: ReplacementReason,
    ) -> Self {
        Self {
            ctx,
            content_id,
            reason,
        }
    }

    async fn compute(&self, content: &content::Model) -> anyhow::Result<PieceInfo> {
        let hash = ContentHash::from_hex(&content.cid).context("Undecodable content address")?;
        let reader = self
            .ctx
            .blockstore
            .open(&hash)
            .await
            .context("Failed to open content bytes")?;

        let commp_config = self.ctx.config.commp.clone();
        let parallelism = commp_config.effective_parallelism();
        let mut bridge = SyncIoBridge::new(reader);

        let info = tokio::task::spawn_blocking(move || {
            commp::compute_with_leaf_size(&mut bridge, commp_config.padded_leaf_size, parallelism)
        })
        .await
        .context("Commitment task panicked")??;

        Ok(info)
    }

    async fn assign(&self, content: &content::Model, info: &PieceInfo) -> anyhow::Result<()> {
        let now = Utc::now();
        let txn = self.ctx.db.begin().await?;

        let piece = piece_commitment::ActiveModel {
            cid: Set(content.cid.clone()),
            piece: Set(info.piece_cid.to_string()),
            size: Set(info.payload_size as i64),
            padded_piece_size: Set(info.piece_size as i64),
            unpadded_piece_size: Set(commp::unpadded_size(info.piece_size) as i64),
            status: Set(CommitmentStatus::Open),
            last_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        content::Entity::update_many()
            .col_expr(content::Column::PieceCommitmentId, Expr::value(Some(piece.id)))
            .filter(content::Column::Id.eq(content.id))
            .exec(&txn)
            .await?;

        let lifecycle = Lifecycle::new(&txn);
        lifecycle
            .audit(
                crate::lifecycle::AUDIT_PIECE,
                piece.id,
                None,
                CommitmentStatus::Open.as_str(),
                None,
            )
            .await?;
        if let Err(e) = lifecycle
            .transition(
                content.id,
                ContentStatus::PieceComputing,
                ContentStatus::PieceAssigned,
                TransitionKind::Forward,
                None,
            )
            .await
        {
            // Dropping the transaction discards the piece row.
            return contended(self.name(), content.id, e);
        }
        txn.commit().await?;

        info!(
            content_id = content.id,
            piece_commitment_id = piece.id,
            piece_cid = %info.piece_cid,
            piece_size = info.piece_size,
            "Piece commitment assigned"
        );

        self.ctx.dispatcher.submit(DealMakingJob::new(
            self.ctx.clone(),
            content.id,
            1,
            self.reason,
        ))?;
        Ok(())
    }
}

#[async_trait]
impl Job for CommitmentJob {
    fn name(&self) -> &'static str {
        "commitment"
    }

    fn key(&self) -> Option<String> {
        Some(format!("commp:{}", self.content_id))
    }

    async fn run(&self) -> anyhow::Result<()> {
        let lifecycle = Lifecycle::new(&self.ctx.db);
        let content = match lifecycle
            .transition(
                self.content_id,
                ContentStatus::Pinned,
                ContentStatus::PieceComputing,
                TransitionKind::Forward,
                None,
            )
            .await
        {
            Ok(content) => content,
            Err(e) => return contended(self.name(), self.content_id, e),
        };

        let started = Instant::now();
        match self.compute(&content).await {
            Ok(info) => {
                info!(
                    content_id = content.id,
                    payload_size = info.payload_size,
                    real_leaves = info.leaves.real,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Computed piece commitment"
                );
                self.assign(&content, &info).await
            }
            Err(e) => {
                let message = format!("piece commitment failed: {e:#}");
                error!(content_id = content.id, error = %message, "Piece commitment failed");
                lifecycle
                    .transition(
                        content.id,
                        ContentStatus::PieceComputing,
                        ContentStatus::PieceComputingFailed,
                        TransitionKind::Forward,
                        Some(message),
                    )
                    .await
                    .or_else(|e| contended(self.name(), content.id, e).map(|_| content.clone()))?;
                Ok(())
            }
        }
    }
}
