use serde::{Deserialize, Serialize};
use std::fmt;

/// Status reported by the transport for a data-transfer channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Requested,
    Ongoing,
    TransferFinished,
    Completed,
    Failed,
    Failing,
    Cancelled,
    Cancelling,
    Disconnected,
    TimedOut,
    InitiatorPaused,
    ResponderPaused,
    ChannelNotFound,
    #[serde(other)]
    Other,
}

/// What a transport status means for the deal lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferPhase {
    Started,
    Ongoing,
    Finished,
    Failed,
    /// Intermediate states that carry no lifecycle meaning.
    Ignored,
}

impl TransferStatus {
    pub fn phase(&self) -> TransferPhase {
        match self {
            Self::Requested => TransferPhase::Started,
            Self::Ongoing => TransferPhase::Ongoing,
            Self::TransferFinished | Self::Completed => TransferPhase::Finished,
            Self::Failed
            | Self::Failing
            | Self::Cancelled
            | Self::Cancelling
            | Self::Disconnected
            | Self::TimedOut
            | Self::InitiatorPaused
            | Self::ResponderPaused
            | Self::ChannelNotFound => TransferPhase::Failed,
            Self::Other => TransferPhase::Ignored,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Ongoing => "ongoing",
            Self::TransferFinished => "transfer_finished",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Failing => "failing",
            Self::Cancelled => "cancelled",
            Self::Cancelling => "cancelling",
            Self::Disconnected => "disconnected",
            Self::TimedOut => "timed_out",
            Self::InitiatorPaused => "initiator_paused",
            Self::ResponderPaused => "responder_paused",
            Self::ChannelNotFound => "channel_not_found",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A push notification from the transport about one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Opaque channel identifier assigned by the transport.
    pub transfer_id: String,
    /// Row id of the content deal the channel belongs to.
    pub deal_id: i32,
    pub status: TransferStatus,
    #[serde(default)]
    pub message: Option<String>,
}

impl TransferEvent {
    pub fn new(transfer_id: impl Into<String>, deal_id: i32, status: TransferStatus) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            deal_id,
            status,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
