#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a content row.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "kebab-case")]
pub enum ContentStatus {
    /// Bytes are stored locally, nothing computed yet.
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "pinned"))]
    Pinned,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "piece-computing"))]
    PieceComputing,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "piece-computing-failed"))]
    PieceComputingFailed,
    /// A piece commitment is attached and the content is ready for a deal.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "piece-assigned"))]
    PieceAssigned,
    /// A deal-making job owns the content and is talking to the provider.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "making-deal-proposal"))]
    MakingDealProposal,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "deal-proposal-sent"))]
    DealProposalSent,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "deal-proposal-failed"))]
    DealProposalFailed,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "transfer-started"))]
    TransferStarted,
    /// Informational, bytes are moving.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "transfer-ongoing"))]
    TransferOngoing,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "transfer-finished"))]
    TransferFinished,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "transfer-failed"))]
    TransferFailed,
}

/// Why a status change is happening. Each kind unlocks a different set of edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Normal pipeline progress.
    Forward,
    /// Bounded self-resubmission of the deal-making job.
    Retry,
    /// Operator repair/retry or auto-retry, re-entering an earlier stage.
    Repair,
    /// Restart sweep correcting rows left in flight by a dead process.
    Recovery,
}

impl ContentStatus {
    pub const ALL: &'static [ContentStatus] = &[
        Self::Pinned,
        Self::PieceComputing,
        Self::PieceComputingFailed,
        Self::PieceAssigned,
        Self::MakingDealProposal,
        Self::DealProposalSent,
        Self::DealProposalFailed,
        Self::TransferStarted,
        Self::TransferOngoing,
        Self::TransferFinished,
        Self::TransferFailed,
    ];

    /// Statuses owned by a running job or an open transfer channel.
    pub const IN_FLIGHT: &'static [ContentStatus] = &[
        Self::PieceComputing,
        Self::MakingDealProposal,
        Self::TransferStarted,
        Self::TransferOngoing,
    ];

    pub const FAILED: &'static [ContentStatus] = &[
        Self::PieceComputingFailed,
        Self::DealProposalFailed,
        Self::TransferFailed,
    ];

    pub fn is_in_flight(&self) -> bool {
        Self::IN_FLIGHT.contains(self)
    }

    pub fn is_failed(&self) -> bool {
        Self::FAILED.contains(self)
    }

    /// Failure status a restart sweep moves an in-flight row to.
    pub fn interrupted(&self) -> Option<ContentStatus> {
        match self {
            Self::PieceComputing => Some(Self::PieceComputingFailed),
            Self::MakingDealProposal => Some(Self::DealProposalFailed),
            Self::TransferStarted | Self::TransferOngoing => Some(Self::TransferFailed),
            _ => None,
        }
    }

    /// Returns true if `self -> to` is a legal edge for the given kind of transition.
    pub fn can_transition_to(&self, to: ContentStatus, kind: TransitionKind) -> bool {
        use ContentStatus::*;

        match kind {
            TransitionKind::Forward => matches!(
                (self, to),
                (Pinned, PieceComputing)
                    | (PieceComputing, PieceAssigned | PieceComputingFailed)
                    | (PieceAssigned, MakingDealProposal)
                    | (MakingDealProposal, DealProposalSent | DealProposalFailed)
                    | (
                        DealProposalSent,
                        TransferStarted | TransferOngoing | TransferFinished | TransferFailed
                    )
                    | (
                        TransferStarted,
                        TransferStarted | TransferOngoing | TransferFinished | TransferFailed
                    )
                    | (
                        TransferOngoing,
                        TransferOngoing | TransferFinished | TransferFailed
                    )
                    | (
                        TransferFailed,
                        TransferStarted | TransferOngoing | TransferFinished
                    )
            ),
            TransitionKind::Retry => matches!(
                (self, to),
                (MakingDealProposal | DealProposalSent, PieceAssigned)
            ),
            TransitionKind::Repair => {
                !self.is_in_flight() && matches!(to, PieceAssigned | Pinned)
            }
            TransitionKind::Recovery => self.interrupted() == Some(to),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pinned => "pinned",
            Self::PieceComputing => "piece-computing",
            Self::PieceComputingFailed => "piece-computing-failed",
            Self::PieceAssigned => "piece-assigned",
            Self::MakingDealProposal => "making-deal-proposal",
            Self::DealProposalSent => "deal-proposal-sent",
            Self::DealProposalFailed => "deal-proposal-failed",
            Self::TransferStarted => "transfer-started",
            Self::TransferOngoing => "transfer-ongoing",
            Self::TransferFinished => "transfer-finished",
            Self::TransferFailed => "transfer-failed",
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    pub(crate) invalid: String,
    pub(crate) expected: &'static [&'static str],
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            self.expected.join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for ContentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                invalid: s.to_string(),
                expected: &[
                    "pinned",
                    "piece-computing",
                    "piece-computing-failed",
                    "piece-assigned",
                    "making-deal-proposal",
                    "deal-proposal-sent",
                    "deal-proposal-failed",
                    "transfer-started",
                    "transfer-ongoing",
                    "transfer-finished",
                    "transfer-failed",
                ],
            })
    }
}
