//! Seam between the node and the storage provider's deal protocol.
//!
//! Jobs only ever talk to a [`DealClient`]. The wire format of the real protocol lives behind a
//! gateway reached by [`HttpDealClient`]. Tests script a `FakeDealClient`, available with the
//! `test-util` feature.

mod error;
#[cfg(any(test, feature = "test-util"))]
mod fake;
mod http;
mod types;

use async_trait::async_trait;

pub use error::MarketError;
#[cfg(any(test, feature = "test-util"))]
pub use fake::FakeDealClient;
pub use http::HttpDealClient;
pub use types::{
    ChannelState, DealProposal, DealStatusQuery, DealStatusReport, ProposalResponse,
    TransferRequest,
};

#[async_trait]
pub trait DealClient: Send + Sync {
    async fn send_proposal(&self, proposal: &DealProposal)
    -> Result<ProposalResponse, MarketError>;

    /// Open a transfer channel for an accepted online deal. Returns the channel id.
    async fn start_transfer(&self, request: &TransferRequest) -> Result<String, MarketError>;

    async fn deal_status(&self, query: &DealStatusQuery) -> Result<DealStatusReport, MarketError>;

    /// `None` when the transport has no state for the channel.
    async fn transfer_status(&self, channel_id: &str)
    -> Result<Option<ChannelState>, MarketError>;

    async fn restart_transfer(&self, channel_id: &str) -> Result<(), MarketError>;
}
