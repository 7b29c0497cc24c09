use common::TransferStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything a provider needs to evaluate a storage deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealProposal {
    pub deal_uuid: Uuid,
    pub miner: String,
    /// Signing identity of the client.
    pub client: String,
    pub piece_cid: String,
    /// Padded piece size.
    pub piece_size: u64,
    pub payload_size: u64,
    pub payload_cid: String,
    pub duration: i64,
    pub start_epoch: Option<i64>,
    pub end_epoch: Option<i64>,
    pub verified: bool,
    pub label: String,
    /// The provider imports the data itself instead of receiving a transfer.
    pub offline: bool,
    pub remove_unsealed_copy: bool,
    pub skip_ipni_announce: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub proposal_cid: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Row id of the content deal; echoed back in transfer events.
    pub deal_id: i32,
    pub deal_uuid: Uuid,
    pub miner: String,
    pub payload_cid: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealStatusQuery {
    pub miner: String,
    pub deal_uuid: Option<Uuid>,
    pub proposal_cid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealStatusReport {
    /// Chain deal id, once published.
    #[serde(default)]
    pub deal_id: Option<i64>,
    pub state: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub on_chain: bool,
    #[serde(default)]
    pub sealed: bool,
    #[serde(default)]
    pub slashed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel_id: String,
    pub status: TransferStatus,
    #[serde(default)]
    pub message: Option<String>,
}
