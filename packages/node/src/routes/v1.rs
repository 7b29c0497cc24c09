use axum::{
    Router,
    routing::{get, post, put},
};

use crate::handlers;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/contents", content_routes())
        .route(
            "/piece-commitments/{id}/repair",
            post(handlers::pieces::repair_piece),
        )
        .route("/transfers/events", post(handlers::transfers::post_event))
        .route("/dispatcher/stats", get(handlers::stats::dispatcher_stats))
}

fn content_routes() -> Router<AppState> {
    let upload = Router::new()
        .route("/", post(handlers::contents::upload_content))
        .layer(handlers::contents::upload_body_limit());

    Router::new()
        .route("/commitment", post(handlers::contents::upload_commitment))
        .route("/{id}", get(handlers::contents::get_content))
        .route(
            "/{id}/status-check",
            post(handlers::contents::status_check),
        )
        .route("/{id}/repair", post(handlers::contents::repair_content))
        .route("/{id}/retry", post(handlers::contents::retry_content))
        .route("/{id}/auto-retry", put(handlers::contents::set_auto_retry))
        .merge(upload)
}
