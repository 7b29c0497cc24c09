use thiserror::Error;

const RETRYABLE_FRAGMENTS: &[&str] = &[
    "send proposal rpc",
    "stream reset",
    "connection refused",
    "timed out",
    "deadline exceeded",
    "failed to dial",
    "i/o timeout",
];

const IDENTICAL_PROPOSAL: &str = "deal proposal is identical";
const NO_TRANSFER_STATE: &str = "no data transfer state was found";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    /// The provider could not be reached or dropped the stream. Worth another attempt.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("proposal rejected: {0}")]
    Rejected(String),
    /// The provider already holds this exact proposal.
    #[error("{0}")]
    ProposalIdentical(String),
    #[error("no data transfer state was found for channel {0}")]
    NoTransferState(String),
    #[error("malformed provider response: {0}")]
    Decode(String),
}

impl MarketError {
    /// Classify a provider error message by its text.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains(IDENTICAL_PROPOSAL) {
            MarketError::ProposalIdentical(message)
        } else if lower.contains(NO_TRANSFER_STATE) {
            MarketError::NoTransferState(message)
        } else if RETRYABLE_FRAGMENTS.iter().any(|f| lower.contains(f)) {
            MarketError::Transport(message)
        } else {
            MarketError::Rejected(message)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketError::Transport(_))
    }
}

impl From<reqwest::Error> for MarketError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MarketError::Decode(err.to_string())
        } else {
            // Connect failures, timeouts and resets all land here.
            MarketError::Transport(err.to_string())
        }
    }
}
