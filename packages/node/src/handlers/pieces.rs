use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::instrument;

use crate::error::AppError;
use crate::jobs::{PieceRepairJob, prepare_piece_repair};
use crate::models::content::JobQueued;
use crate::state::AppState;

/// Recompute a piece commitment from its content's local copy.
#[instrument(skip(state))]
pub async fn repair_piece(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let content = prepare_piece_repair(&state.ctx.db, id).await?;
    let submission = state
        .ctx
        .dispatcher
        .submit(PieceRepairJob::new(state.ctx.clone(), id))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobQueued {
            content_id: content.id,
            job: "piece-repair".into(),
            queued: submission == dispatcher::Submission::Accepted,
        }),
    ))
}
