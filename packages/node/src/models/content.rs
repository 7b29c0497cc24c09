use chrono::{DateTime, Utc};
use common::{CommitmentStatus, ConnectionMode, ContentStatus};
use commp::PieceCid;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{content, content_deal, deal_replacement, piece_commitment};
use crate::error::AppError;
use crate::window::DealWindow;

/// Query parameters of `POST /contents`; the body is the raw payload.
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub connection_mode: ConnectionMode,
    pub name: Option<String>,
    pub miner: Option<String>,
    pub wallet: Option<String>,
    pub duration_in_days: Option<i64>,
    pub start_epoch_in_days: Option<i64>,
    pub label: Option<String>,
    pub auto_retry: Option<bool>,
}

/// Content whose piece commitment was computed elsewhere.
#[derive(Debug, Deserialize)]
pub struct CommitmentUploadRequest {
    /// Payload address.
    pub cid: String,
    /// Payload size in bytes.
    pub size: i64,
    pub piece_cid: String,
    pub padded_piece_size: i64,
    #[serde(default = "offline")]
    pub connection_mode: ConnectionMode,
    pub name: Option<String>,
    pub miner: Option<String>,
    pub wallet: Option<String>,
    pub duration_in_days: Option<i64>,
    pub start_epoch_in_days: Option<i64>,
    pub label: Option<String>,
    pub auto_retry: Option<bool>,
}

fn offline() -> ConnectionMode {
    ConnectionMode::Import
}

/// Per-content deal settings shared by both upload flavours.
#[derive(Debug, Clone, Default)]
pub struct Assignments {
    pub miner: Option<String>,
    pub wallet: Option<String>,
    pub label: Option<String>,
    pub window: Option<DealWindow>,
}

fn non_blank(field: &str, value: Option<String>) -> Result<Option<String>, AppError> {
    match value {
        Some(v) if v.trim().is_empty() => {
            Err(AppError::Validation(format!("{field} must not be empty")))
        }
        Some(v) => Ok(Some(v.trim().to_string())),
        None => Ok(None),
    }
}

fn assignments(
    miner: Option<String>,
    wallet: Option<String>,
    label: Option<String>,
    start_days: Option<i64>,
    duration_days: Option<i64>,
) -> Result<Assignments, AppError> {
    let window = DealWindow::from_days(start_days, duration_days);
    if let Some(window) = &window {
        window.validate().map_err(AppError::Validation)?;
    }
    Ok(Assignments {
        miner: non_blank("miner", miner)?,
        wallet: non_blank("wallet", wallet)?,
        label,
        window,
    })
}

impl UploadQuery {
    pub fn validate(&self) -> Result<Assignments, AppError> {
        assignments(
            self.miner.clone(),
            self.wallet.clone(),
            self.label.clone(),
            self.start_epoch_in_days,
            self.duration_in_days,
        )
    }
}

impl CommitmentUploadRequest {
    pub fn validate(&self) -> Result<(PieceCid, Assignments), AppError> {
        if self.cid.trim().is_empty() {
            return Err(AppError::Validation("cid must not be empty".into()));
        }
        let piece_cid = PieceCid::parse(&self.piece_cid)
            .map_err(|e| AppError::Validation(format!("Invalid piece_cid: {e}")))?;

        let padded = u64::try_from(self.padded_piece_size)
            .ok()
            .filter(|p| p.is_power_of_two() && *p >= 128)
            .ok_or_else(|| {
                AppError::Validation("padded_piece_size must be a power of two of at least 128".into())
            })?;
        if self.size <= 0 || self.size as u64 > commp::unpadded_size(padded) {
            return Err(AppError::Validation(format!(
                "size must be between 1 and {} for a {padded}-byte piece",
                commp::unpadded_size(padded)
            )));
        }

        let assignments = assignments(
            self.miner.clone(),
            self.wallet.clone(),
            self.label.clone(),
            self.start_epoch_in_days,
            self.duration_in_days,
        )?;
        Ok((piece_cid, assignments))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContentAccepted {
    pub content_id: i32,
    pub status: ContentStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommitmentAccepted {
    pub content_id: i32,
    pub piece_commitment_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub connection_mode: ConnectionMode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AutoRetryRequest {
    pub enabled: bool,
}

/// Returned by endpoints that queued work for a content.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobQueued {
    pub content_id: i32,
    pub job: String,
    /// False when an identical job was already waiting.
    pub queued: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContentResponse {
    pub id: i32,
    pub name: String,
    pub cid: String,
    pub size: i64,
    pub status: ContentStatus,
    pub last_message: Option<String>,
    pub connection_mode: ConnectionMode,
    pub auto_retry: bool,
    pub piece_commitment_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<content::Model> for ContentResponse {
    fn from(m: content::Model) -> Self {
        Self {
            id: m.id,
            name: m.name,
            cid: m.cid,
            size: m.size,
            status: m.status,
            last_message: m.last_message,
            connection_mode: m.connection_mode,
            auto_retry: m.auto_retry,
            piece_commitment_id: m.piece_commitment_id,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PieceResponse {
    pub id: i32,
    pub piece_cid: String,
    pub size: i64,
    pub padded_piece_size: i64,
    pub unpadded_piece_size: i64,
    pub status: CommitmentStatus,
}

impl From<piece_commitment::Model> for PieceResponse {
    fn from(m: piece_commitment::Model) -> Self {
        Self {
            id: m.id,
            piece_cid: m.piece,
            size: m.size,
            padded_piece_size: m.padded_piece_size,
            unpadded_piece_size: m.unpadded_piece_size,
            status: m.status,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DealResponse {
    pub id: i32,
    pub miner: String,
    pub deal_uuid: Uuid,
    pub proposal_cid: Option<String>,
    pub deal_id: Option<i64>,
    pub dt_chan: Option<String>,
    pub verified: bool,
    pub failed: bool,
    pub slashed: bool,
    pub last_message: Option<String>,
    pub transfer_started: Option<DateTime<Utc>>,
    pub transfer_finished: Option<DateTime<Utc>>,
    pub on_chain_at: Option<DateTime<Utc>>,
    pub sealed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<content_deal::Model> for DealResponse {
    fn from(m: content_deal::Model) -> Self {
        Self {
            id: m.id,
            miner: m.miner,
            deal_uuid: m.deal_uuid,
            proposal_cid: m.proposal_cid,
            deal_id: m.deal_id,
            dt_chan: m.dt_chan,
            verified: m.verified,
            failed: m.failed,
            slashed: m.slashed,
            last_message: m.last_message,
            transfer_started: m.transfer_started,
            transfer_finished: m.transfer_finished,
            on_chain_at: m.on_chain_at,
            sealed_at: m.sealed_at,
            failed_at: m.failed_at,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplacementResponse {
    pub old_deal_id: i32,
    pub new_deal_id: i32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl From<deal_replacement::Model> for ReplacementResponse {
    fn from(m: deal_replacement::Model) -> Self {
        Self {
            old_deal_id: m.old_deal_id,
            new_deal_id: m.new_deal_id,
            reason: m.reason,
            created_at: m.created_at,
        }
    }
}

/// Everything the node knows about one content.
#[derive(Debug, Serialize, Deserialize)]
pub struct ContentView {
    pub content: ContentResponse,
    pub piece: Option<PieceResponse>,
    /// Newest first.
    pub deals: Vec<DealResponse>,
    pub replacements: Vec<ReplacementResponse>,
}
