use axum::extract::State;
use axum::http::StatusCode;
use common::TransferEvent;
use tracing::instrument;

use crate::error::AppError;
use crate::extractors::json::AppJson;
use crate::state::AppState;

/// Webhook for transport events. The event is queued for the transfer reactor; its outcome is
/// visible on the content afterwards.
#[instrument(skip(state, event), fields(deal_id = event.deal_id, status = %event.status))]
pub async fn post_event(
    State(state): State<AppState>,
    AppJson(event): AppJson<TransferEvent>,
) -> Result<StatusCode, AppError> {
    state
        .events
        .send(event)
        .await
        .map_err(|_| AppError::Internal("transfer reactor is not running".into()))?;
    Ok(StatusCode::ACCEPTED)
}
