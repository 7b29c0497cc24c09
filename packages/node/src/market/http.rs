use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    ChannelState, DealClient, DealProposal, DealStatusQuery, DealStatusReport, MarketError,
    ProposalResponse, TransferRequest,
};
use crate::config::MarketConfig;

/// [`DealClient`] that talks JSON to a deal-protocol gateway.
pub struct HttpDealClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct GatewayError {
    #[serde(alias = "error")]
    message: String,
}

#[derive(Deserialize)]
struct TransferStarted {
    channel_id: String,
}

impl HttpDealClient {
    pub fn new(config: &MarketConfig) -> Result<Self, MarketError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MarketError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Turn a non-2xx response into a classified error.
    async fn reject(res: Response) -> MarketError {
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GatewayError>(&text)
            .map(|e| e.message)
            .unwrap_or(text);
        debug!(status = %status, message = %message, "Gateway returned an error");

        if status.is_server_error() && message.is_empty() {
            return MarketError::Transport(format!("gateway returned {status}"));
        }
        MarketError::classify(message)
    }

    async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, MarketError> {
        if !res.status().is_success() {
            return Err(Self::reject(res).await);
        }
        Ok(res.json::<T>().await?)
    }
}

#[async_trait]
impl DealClient for HttpDealClient {
    async fn send_proposal(
        &self,
        proposal: &DealProposal,
    ) -> Result<ProposalResponse, MarketError> {
        let res = self
            .client
            .post(self.url("/deals/proposals"))
            .json(proposal)
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn start_transfer(&self, request: &TransferRequest) -> Result<String, MarketError> {
        let res = self
            .client
            .post(self.url("/transfers"))
            .json(request)
            .send()
            .await?;
        let started: TransferStarted = Self::decode(res).await?;
        Ok(started.channel_id)
    }

    async fn deal_status(&self, query: &DealStatusQuery) -> Result<DealStatusReport, MarketError> {
        let res = self
            .client
            .post(self.url("/deals/status"))
            .json(query)
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn transfer_status(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelState>, MarketError> {
        let res = self
            .client
            .get(self.url(&format!("/transfers/{channel_id}")))
            .send()
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        match Self::decode(res).await {
            Ok(state) => Ok(Some(state)),
            Err(MarketError::NoTransferState(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn restart_transfer(&self, channel_id: &str) -> Result<(), MarketError> {
        let res = self
            .client
            .post(self.url(&format!("/transfers/{channel_id}/restart")))
            .send()
            .await?;
        if res.status().is_success() {
            Ok(())
        } else {
            Err(Self::reject(res).await)
        }
    }
}
