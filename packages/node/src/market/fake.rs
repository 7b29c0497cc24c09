use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use common::TransferStatus;

use super::{
    ChannelState, DealClient, DealProposal, DealStatusQuery, DealStatusReport, MarketError,
    ProposalResponse, TransferRequest,
};

/// Scriptable in-memory provider.
///
/// Queued replies are consumed in order; once a queue is empty every call succeeds. All calls are
/// recorded for assertions.
#[derive(Default)]
pub struct FakeDealClient {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    proposal_replies: VecDeque<MarketError>,
    transfer_replies: VecDeque<MarketError>,
    restart_replies: VecDeque<MarketError>,
    status_report: DealStatusReport,
    channels: HashMap<String, ChannelState>,

    proposals: Vec<DealProposal>,
    transfers: Vec<TransferRequest>,
    status_queries: Vec<DealStatusQuery>,
    restarts: Vec<String>,
}

impl FakeDealClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next proposal with `err`.
    pub fn fail_next_proposal(&self, err: MarketError) {
        self.state().proposal_replies.push_back(err);
    }

    pub fn fail_next_transfer(&self, err: MarketError) {
        self.state().transfer_replies.push_back(err);
    }

    pub fn fail_next_restart(&self, err: MarketError) {
        self.state().restart_replies.push_back(err);
    }

    pub fn set_status_report(&self, report: DealStatusReport) {
        self.state().status_report = report;
    }

    /// Make the transport forget a channel, as after a provider restart.
    pub fn forget_channel(&self, channel_id: &str) {
        self.state().channels.remove(channel_id);
    }

    pub fn proposals(&self) -> Vec<DealProposal> {
        self.state().proposals.clone()
    }

    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.state().transfers.clone()
    }

    pub fn status_queries(&self) -> usize {
        self.state().status_queries.len()
    }

    pub fn restarts(&self) -> Vec<String> {
        self.state().restarts.clone()
    }
}

#[async_trait]
impl DealClient for FakeDealClient {
    async fn send_proposal(
        &self,
        proposal: &DealProposal,
    ) -> Result<ProposalResponse, MarketError> {
        let mut state = self.state();
        state.proposals.push(proposal.clone());
        if let Some(err) = state.proposal_replies.pop_front() {
            return Err(err);
        }
        Ok(ProposalResponse {
            proposal_cid: format!("bafyproposal{}", proposal.deal_uuid.simple()),
            message: Some("accepted".into()),
        })
    }

    async fn start_transfer(&self, request: &TransferRequest) -> Result<String, MarketError> {
        let mut state = self.state();
        state.transfers.push(request.clone());
        if let Some(err) = state.transfer_replies.pop_front() {
            return Err(err);
        }
        let channel_id = format!("chan-{}", request.deal_id);
        state.channels.insert(
            channel_id.clone(),
            ChannelState {
                channel_id: channel_id.clone(),
                status: TransferStatus::Requested,
                message: None,
            },
        );
        Ok(channel_id)
    }

    async fn deal_status(&self, query: &DealStatusQuery) -> Result<DealStatusReport, MarketError> {
        let mut state = self.state();
        state.status_queries.push(query.clone());
        Ok(state.status_report.clone())
    }

    async fn transfer_status(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelState>, MarketError> {
        Ok(self.state().channels.get(channel_id).cloned())
    }

    async fn restart_transfer(&self, channel_id: &str) -> Result<(), MarketError> {
        let mut state = self.state();
        state.restarts.push(channel_id.to_string());
        match state.restart_replies.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
