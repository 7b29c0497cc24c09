use std::io;

use axum::Json;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use common::storage::{BoxReader, PinnedBlock};
use common::{CommitmentStatus, ConnectionMode, ContentStatus};
use futures::{StreamExt, TryStreamExt};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use tokio_util::io::StreamReader;
use tracing::{info, instrument};

use crate::entity::{
    content, content_deal, content_deal_proposal_parameters, content_miner, content_wallet,
    deal_replacement, piece_commitment,
};
use crate::error::AppError;
use crate::extractors::api_key::ApiKey;
use crate::extractors::json::{AppJson, AppQuery};
use crate::jobs::{
    CommitmentJob, DealMakingJob, RepairJob, RepairRequest, RetryJob, StatusCheckJob,
    prepare_repair, prepare_retry,
};
use crate::lifecycle::{AUDIT_CONTENT, AUDIT_PIECE, Lifecycle, ReplacementReason};
use crate::models::content::*;
use crate::state::AppState;

/// Payloads are streamed to the blockstore, which enforces its own size cap.
pub fn upload_body_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::disable()
}

struct NewContent<'a> {
    name: String,
    cid: String,
    size: i64,
    api_key: Option<String>,
    status: ContentStatus,
    piece_commitment_id: Option<i32>,
    connection_mode: ConnectionMode,
    auto_retry: bool,
    assignments: &'a Assignments,
    default_duration: i64,
}

/// Insert the content row with its assignments and an audit row for its initial status.
async fn create_content<C: ConnectionTrait>(
    db: &C,
    new: NewContent<'_>,
) -> Result<content::Model, DbErr> {
    let now = Utc::now();
    let model = content::ActiveModel {
        name: Set(new.name),
        cid: Set(new.cid),
        size: Set(new.size),
        requesting_api_key: Set(new.api_key),
        piece_commitment_id: Set(new.piece_commitment_id),
        status: Set(new.status),
        last_message: Set(None),
        connection_mode: Set(new.connection_mode),
        auto_retry: Set(new.auto_retry),
        version: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    let assignments = new.assignments;
    if let Some(miner) = &assignments.miner {
        content_miner::ActiveModel {
            content_id: Set(model.id),
            miner: Set(miner.clone()),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }
    if let Some(wallet) = &assignments.wallet {
        content_wallet::ActiveModel {
            content_id: Set(model.id),
            wallet: Set(wallet.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }
    if assignments.window.is_some() || assignments.label.is_some() {
        let (start_epoch, end_epoch, duration) = match assignments.window {
            Some(window) => {
                let epochs = window.epochs_from(now);
                (Some(epochs.start_epoch), Some(epochs.end_epoch), epochs.duration)
            }
            None => (None, None, new.default_duration),
        };
        content_deal_proposal_parameters::ActiveModel {
            content_id: Set(model.id),
            label: Set(assignments.label.clone()),
            duration: Set(duration),
            start_epoch: Set(start_epoch),
            end_epoch: Set(end_epoch),
            verified_deal: Set(true),
            remove_unsealed_copy: Set(false),
            skip_ipni_announce: Set(false),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }

    Lifecycle::new(db)
        .audit(AUDIT_CONTENT, model.id, None, model.status.as_str(), None)
        .await?;
    Ok(model)
}

async fn find_content<C: ConnectionTrait>(db: &C, id: i32) -> Result<content::Model, AppError> {
    content::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Content {id} not found")))
}

async fn content_view<C: ConnectionTrait>(db: &C, id: i32) -> Result<ContentView, AppError> {
    let content = find_content(db, id).await?;
    let piece = match content.piece_commitment_id {
        Some(piece_id) => piece_commitment::Entity::find_by_id(piece_id).one(db).await?,
        None => None,
    };
    let deals = content_deal::Entity::find()
        .filter(content_deal::Column::ContentId.eq(id))
        .order_by_desc(content_deal::Column::Id)
        .all(db)
        .await?;
    let replacements = deal_replacement::Entity::find()
        .filter(deal_replacement::Column::ContentId.eq(id))
        .order_by_asc(deal_replacement::Column::Id)
        .all(db)
        .await?;

    Ok(ContentView {
        content: content.into(),
        piece: piece.map(Into::into),
        deals: deals.into_iter().map(Into::into).collect(),
        replacements: replacements.into_iter().map(Into::into).collect(),
    })
}

/// Store a payload and queue its piece commitment.
#[instrument(skip(state, api_key, query, body), fields(mode = %query.connection_mode))]
pub async fn upload_content(
    State(state): State<AppState>,
    ApiKey(api_key): ApiKey,
    AppQuery(query): AppQuery<UploadQuery>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let assignments = query.validate()?;
    let ctx = &state.ctx;

    // Nothing reaches the blockstore until the body has produced at least one byte.
    let mut stream = Box::pin(body.into_data_stream().map_err(io::Error::other));
    let first = loop {
        match stream.try_next().await {
            Ok(Some(chunk)) if chunk.is_empty() => continue,
            Ok(Some(chunk)) => break chunk,
            Ok(None) => return Err(AppError::Validation("Payload must not be empty".into())),
            Err(e) => return Err(AppError::Validation(format!("Failed to read payload: {e}"))),
        }
    };
    let stream = futures::stream::once(futures::future::ready(Ok(first))).chain(stream);
    let reader: BoxReader = Box::new(StreamReader::new(stream));
    let PinnedBlock { hash, size } = ctx.blockstore.pin(reader).await?;

    let cid = hash.to_hex();
    let txn = ctx.db.begin().await?;
    let model = create_content(
        &txn,
        NewContent {
            name: query.name.clone().unwrap_or_else(|| cid.clone()),
            cid,
            size: size as i64,
            api_key,
            status: ContentStatus::Pinned,
            piece_commitment_id: None,
            connection_mode: query.connection_mode,
            auto_retry: query.auto_retry.unwrap_or(true),
            assignments: &assignments,
            default_duration: ctx.config.deal.default_duration_epochs,
        },
    )
    .await?;
    txn.commit().await?;

    info!(content_id = model.id, size, "Content pinned");
    ctx.dispatcher
        .submit(CommitmentJob::new(ctx.clone(), model.id))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ContentAccepted {
            content_id: model.id,
            status: model.status,
        }),
    ))
}

/// Register content whose piece commitment was computed elsewhere and go straight to deal making.
#[instrument(skip(state, api_key, payload), fields(piece_cid = %payload.piece_cid))]
pub async fn upload_commitment(
    State(state): State<AppState>,
    ApiKey(api_key): ApiKey,
    AppJson(payload): AppJson<CommitmentUploadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (piece_cid, assignments) = payload.validate()?;
    let ctx = &state.ctx;
    let now = Utc::now();
    let padded = payload.padded_piece_size as u64;

    let txn = ctx.db.begin().await?;
    let piece = piece_commitment::ActiveModel {
        cid: Set(payload.cid.clone()),
        piece: Set(piece_cid.to_string()),
        size: Set(payload.size),
        padded_piece_size: Set(payload.padded_piece_size),
        unpadded_piece_size: Set(commp::unpadded_size(padded) as i64),
        status: Set(CommitmentStatus::Open),
        last_message: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    Lifecycle::new(&txn)
        .audit(AUDIT_PIECE, piece.id, None, piece.status.as_str(), None)
        .await?;

    let model = create_content(
        &txn,
        NewContent {
            name: payload.name.clone().unwrap_or_else(|| payload.cid.clone()),
            cid: payload.cid.clone(),
            size: payload.size,
            api_key,
            status: ContentStatus::PieceAssigned,
            piece_commitment_id: Some(piece.id),
            connection_mode: payload.connection_mode,
            auto_retry: payload.auto_retry.unwrap_or(true),
            assignments: &assignments,
            default_duration: ctx.config.deal.default_duration_epochs,
        },
    )
    .await?;
    txn.commit().await?;

    info!(content_id = model.id, piece_commitment_id = piece.id, "Content registered with commitment");
    ctx.dispatcher.submit(DealMakingJob::new(
        ctx.clone(),
        model.id,
        1,
        ReplacementReason::Resend,
    ))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CommitmentAccepted {
            content_id: model.id,
            piece_commitment_id: piece.id,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn get_content(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ContentView>, AppError> {
    Ok(Json(content_view(&state.ctx.db, id).await?))
}

/// Queue a provider status query and return what is persisted right now.
#[instrument(skip(state))]
pub async fn status_check(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let view = content_view(&state.ctx.db, id).await?;
    state
        .ctx
        .dispatcher
        .submit(StatusCheckJob::new(state.ctx.clone(), id))?;
    Ok((StatusCode::ACCEPTED, Json(view)))
}

#[instrument(skip(state, payload))]
pub async fn repair_content(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    AppJson(payload): AppJson<RepairRequest>,
) -> Result<impl IntoResponse, AppError> {
    prepare_repair(&state.ctx.db, id, &payload).await?;
    let submission = state
        .ctx
        .dispatcher
        .submit(RepairJob::new(state.ctx.clone(), id, payload))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobQueued {
            content_id: id,
            job: "repair".into(),
            queued: submission == dispatcher::Submission::Accepted,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn retry_content(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    AppJson(payload): AppJson<RetryRequest>,
) -> Result<impl IntoResponse, AppError> {
    prepare_retry(&state.ctx.db, id, payload.connection_mode).await?;
    let submission = state.ctx.dispatcher.submit(RetryJob::new(
        state.ctx.clone(),
        id,
        ReplacementReason::Retry,
    ))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobQueued {
            content_id: id,
            job: "retry".into(),
            queued: submission == dispatcher::Submission::Accepted,
        }),
    ))
}

#[instrument(skip(state, payload), fields(enabled = payload.enabled))]
pub async fn set_auto_retry(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    AppJson(payload): AppJson<AutoRetryRequest>,
) -> Result<Json<ContentResponse>, AppError> {
    let result = content::Entity::update_many()
        .col_expr(content::Column::AutoRetry, Expr::value(payload.enabled))
        .filter(content::Column::Id.eq(id))
        .exec(&state.ctx.db)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound(format!("Content {id} not found")));
    }

    let model = find_content(&state.ctx.db, id).await?;
    Ok(Json(model.into()))
}
