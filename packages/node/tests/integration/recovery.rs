use chrono::Utc;
use common::{ConnectionMode, ContentStatus};
use node::entity::{audit_log, content};
use node::recovery::{INTERRUPTED, sweep_interrupted};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::json;

use crate::support::{TestApp, routes};

async fn insert_content(app: &TestApp, status: ContentStatus) -> i32 {
    let now = Utc::now();
    content::ActiveModel {
        name: Set(format!("stuck-{status}")),
        cid: Set("ab".repeat(32)),
        size: Set(4096),
        requesting_api_key: Set(None),
        piece_commitment_id: Set(None),
        status: Set(status),
        last_message: Set(None),
        connection_mode: Set(ConnectionMode::Import),
        auto_retry: Set(true),
        version: Set(3),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&app.ctx.db)
    .await
    .expect("Failed to insert content")
    .id
}

#[tokio::test]
async fn in_flight_rows_move_to_their_failure_status() {
    let app = TestApp::spawn().await;
    let cases = [
        (ContentStatus::PieceComputing, ContentStatus::PieceComputingFailed),
        (ContentStatus::MakingDealProposal, ContentStatus::DealProposalFailed),
        (ContentStatus::TransferStarted, ContentStatus::TransferFailed),
        (ContentStatus::TransferOngoing, ContentStatus::TransferFailed),
    ];
    let mut ids = Vec::new();
    for (from, _) in cases {
        ids.push(insert_content(&app, from).await);
    }
    let settled = insert_content(&app, ContentStatus::DealProposalSent).await;

    let mut moved = sweep_interrupted(&app.ctx.db).await.unwrap();
    moved.sort();
    assert_eq!(moved, ids);

    for (id, (from, to)) in ids.iter().zip(cases) {
        let row = app.content(*id).await;
        assert_eq!(row.status, to, "{from} should become {to}");
        assert_eq!(row.last_message.as_deref(), Some(INTERRUPTED));
        assert_eq!(row.version, 4);

        let audit = audit_log::Entity::find()
            .filter(audit_log::Column::EntityId.eq(*id))
            .filter(audit_log::Column::Entity.eq(node::lifecycle::AUDIT_CONTENT))
            .all(&app.ctx.db)
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].from_status.as_deref(), Some(from.as_str()));
        assert_eq!(audit[0].to_status, to.as_str());
    }
    assert_eq!(app.status(settled).await, ContentStatus::DealProposalSent);

    // A second pass finds nothing left in flight.
    assert!(sweep_interrupted(&app.ctx.db).await.unwrap().is_empty());
    assert_eq!(app.content(ids[0]).await.version, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recovered_content_can_be_retried() {
    let app = TestApp::spawn().await;
    let id = app.create_content("connection_mode=import", 4096).await;
    app.settle().await;

    // Pretend the process died mid-computation on a fresh upload.
    content::Entity::update_many()
        .col_expr(
            content::Column::Status,
            sea_orm::sea_query::Expr::value(ContentStatus::PieceComputing),
        )
        .filter(content::Column::Id.eq(id))
        .exec(&app.ctx.db)
        .await
        .unwrap();

    assert_eq!(sweep_interrupted(&app.ctx.db).await.unwrap(), vec![id]);
    assert_eq!(app.status(id).await, ContentStatus::PieceComputingFailed);

    let res = app
        .post(&routes::retry(id), &json!({ "connection_mode": "import" }))
        .await;
    assert_eq!(res.status, 202, "{}", res.text);
    app.settle().await;

    // The piece survived, so the pipeline resumes at deal making.
    assert_eq!(app.status(id).await, ContentStatus::DealProposalSent);
    assert_eq!(app.ctx.dispatcher.submitted_count("commitment"), 1);
    assert_eq!(app.deals(id).await.len(), 2);
}
