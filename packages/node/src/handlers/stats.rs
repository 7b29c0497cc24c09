use axum::Json;
use axum::extract::State;
use dispatcher::DispatcherStats;

use crate::state::AppState;

pub async fn dispatcher_stats(State(state): State<AppState>) -> Json<DispatcherStats> {
    Json(state.ctx.dispatcher.stats())
}
