use std::time::Duration;

use common::{ContentStatus, TransferStatus};
use dispatcher::Job;
use node::entity::{content, content_deal_proposal_parameters, content_miner, piece_commitment};
use node::jobs::{RepairJob, RepairRequest, prepare_repair, run_auto_retry, sweep_auto_retry};
use node::market::MarketError;
use node::reactor::ReactorOutcome;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::support::{TestApp, event, routes};

async fn miners(app: &TestApp, id: i32) -> Vec<content_miner::Model> {
    content_miner::Entity::find()
        .filter(content_miner::Column::ContentId.eq(id))
        .order_by_asc(content_miner::Column::Id)
        .all(&app.ctx.db)
        .await
        .unwrap()
}

async fn parameters(app: &TestApp, id: i32) -> Vec<content_deal_proposal_parameters::Model> {
    content_deal_proposal_parameters::Entity::find()
        .filter(content_deal_proposal_parameters::Column::ContentId.eq(id))
        .order_by_asc(content_deal_proposal_parameters::Column::Id)
        .all(&app.ctx.db)
        .await
        .unwrap()
}

/// Import content whose only proposal was rejected.
async fn rejected(app: &TestApp) -> i32 {
    app.market
        .fail_next_proposal(MarketError::Rejected("not accepting deals".into()));
    let id = app.create_content("connection_mode=import", 2048).await;
    app.settle().await;
    assert_eq!(app.status(id).await, ContentStatus::DealProposalFailed);
    id
}

mod repair {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn repair_supersedes_the_active_deal() {
        let app = TestApp::spawn().await;
        let id = app.create_content("connection_mode=import", 2048).await;
        app.settle().await;
        assert_eq!(app.status(id).await, ContentStatus::DealProposalSent);

        let res = app
            .post(
                &routes::repair(id),
                &json!({
                    "connection_mode": "import",
                    "miner": "f02222",
                    "duration_in_days": 300,
                }),
            )
            .await;
        assert_eq!(res.status, 202, "{}", res.text);
        assert_eq!(res.body["job"], "repair");
        assert_eq!(res.body["queued"], true);
        app.settle().await;

        assert_eq!(app.status(id).await, ContentStatus::DealProposalSent);
        let deals = app.deals(id).await;
        assert_eq!(deals.len(), 2);
        assert!(deals[0].failed);
        assert_eq!(
            deals[0].last_message.as_deref(),
            Some(format!("superseded by deal {}", deals[1].id).as_str())
        );
        assert_eq!(deals[1].miner, "f02222");

        let proposal = &app.market.proposals()[1];
        assert_eq!(proposal.miner, "f02222");
        assert_eq!(proposal.duration, 300 * common::epoch::EPOCH_PER_DAY);

        let assigned = content_miner::Entity::find()
            .filter(content_miner::Column::ContentId.eq(id))
            .all(&app.ctx.db)
            .await
            .unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].miner, "f02222");
        assert!(assigned[0].active);

        let view = app.get(&routes::content(id)).await;
        let replacements = view.body["replacements"].as_array().unwrap();
        assert_eq!(replacements.len(), 1);
        assert_eq!(replacements[0]["reason"], "repair");
        assert_eq!(replacements[0]["old_deal_id"], deals[0].id);
        assert_eq!(replacements[0]["new_deal_id"], deals[1].id);
        assert_eq!(view.body["deals"][0]["id"], deals[1].id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn repeated_repairs_keep_earlier_assignments() {
        let app = TestApp::spawn().await;
        let id = app
            .create_content("connection_mode=import&miner=f01111&label=keep-me", 2048)
            .await;
        app.settle().await;

        for (miner, days) in [("f02222", 300), ("f03333", 400)] {
            let res = app
                .post(
                    &routes::repair(id),
                    &json!({
                        "connection_mode": "import",
                        "miner": miner,
                        "duration_in_days": days,
                    }),
                )
                .await;
            assert_eq!(res.status, 202, "{}", res.text);
            app.settle().await;
            assert_eq!(app.status(id).await, ContentStatus::DealProposalSent);
        }

        let assigned = miners(&app, id).await;
        let names: Vec<_> = assigned.iter().map(|m| m.miner.as_str()).collect();
        assert_eq!(names, ["f01111", "f02222", "f03333"]);
        let active: Vec<_> = assigned.iter().map(|m| m.active).collect();
        assert_eq!(active, [false, false, true]);

        let params = parameters(&app, id).await;
        assert_eq!(params.len(), 3);
        assert_eq!(params.iter().filter(|p| p.active).count(), 1);
        assert_eq!(params[0].duration, common::epoch::DEFAULT_DURATION);
        assert_eq!(params[2].duration, 400 * common::epoch::EPOCH_PER_DAY);
        assert!(params.iter().all(|p| p.label.as_deref() == Some("keep-me")));

        let last = app.market.proposals().pop().unwrap();
        assert_eq!(last.miner, "f03333");
        assert_eq!(last.label, "keep-me");
        assert_eq!(last.duration, 400 * common::epoch::EPOCH_PER_DAY);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn repair_of_busy_content_changes_nothing() {
        let app = TestApp::spawn().await;
        let id = app
            .create_content("connection_mode=import&miner=f01111&duration_in_days=200", 2048)
            .await;
        app.settle().await;

        let request = RepairRequest {
            connection_mode: common::ConnectionMode::Import,
            miner: Some("f02222".into()),
            duration_in_days: Some(300),
            start_epoch_in_days: None,
        };
        prepare_repair(&app.ctx.db, id, &request).await.unwrap();

        // The content goes back in flight between the request and the job.
        content::Entity::update_many()
            .col_expr(
                content::Column::Status,
                Expr::value(ContentStatus::TransferStarted),
            )
            .filter(content::Column::Id.eq(id))
            .exec(&app.ctx.db)
            .await
            .unwrap();
        let before = parameters(&app, id).await;

        RepairJob::new(app.ctx.clone(), id, request).run().await.unwrap();
        app.settle().await;

        let assigned = miners(&app, id).await;
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].miner, "f01111");
        assert!(assigned[0].active);
        assert_eq!(parameters(&app, id).await, before);
        assert_eq!(app.status(id).await, ContentStatus::TransferStarted);
        assert_eq!(app.deals(id).await.len(), 1);
        assert_eq!(app.market.proposals().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn repair_requests_are_validated() {
        let app = TestApp::spawn().await;
        let id = rejected(&app).await;

        let cases = [
            json!({ "connection_mode": "import", "start_epoch_in_days": 30 }),
            json!({ "connection_mode": "import", "duration_in_days": 541 }),
            json!({ "connection_mode": "import", "start_epoch_in_days": 10, "duration_in_days": 5 }),
            json!({ "connection_mode": "import", "miner": "  " }),
            json!({ "connection_mode": "e2e" }),
            json!({ "miner": "f01000" }),
        ];
        for body in cases {
            let res = app.post(&routes::repair(id), &body).await;
            assert_eq!(res.status, 400, "{body}: {}", res.text);
            assert_eq!(res.body["code"], "VALIDATION_ERROR");
        }

        let res = app
            .post(&routes::repair(999), &json!({ "connection_mode": "import" }))
            .await;
        assert_eq!(res.status, 404);
        assert_eq!(app.ctx.dispatcher.submitted_count("repair"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn content_without_a_piece_cannot_be_repaired() {
        let app = TestApp::spawn().await;
        let id = app.create_content("connection_mode=import", 10).await;
        app.settle().await;

        let res = app
            .post(&routes::repair(id), &json!({ "connection_mode": "import" }))
            .await;
        assert_eq!(res.status, 400, "{}", res.text);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_content_is_a_conflict() {
        let app = TestApp::spawn().await;
        let id = app.create_content("connection_mode=e2e", 2048).await;
        app.settle().await;
        assert_eq!(app.status(id).await, ContentStatus::TransferStarted);

        let res = app
            .post(&routes::repair(id), &json!({ "connection_mode": "e2e" }))
            .await;
        assert_eq!(res.status, 409, "{}", res.text);
        assert_eq!(res.body["code"], "CONFLICT");

        let res = app
            .post(&routes::retry(id), &json!({ "connection_mode": "e2e" }))
            .await;
        assert_eq!(res.status, 409);
    }
}

mod piece_repair {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn piece_is_recomputed_and_redealt() {
        let app = TestApp::spawn().await;
        let id = app.create_content("connection_mode=import", 2048).await;
        app.settle().await;
        let old_piece = app.content(id).await.piece_commitment_id.unwrap();

        let res = app.post_empty(&routes::piece_repair(old_piece)).await;
        assert_eq!(res.status, 202, "{}", res.text);
        assert_eq!(res.body["job"], "piece-repair");
        assert_eq!(res.body["content_id"], id);
        app.settle().await;

        let content = app.content(id).await;
        assert_eq!(content.status, ContentStatus::DealProposalSent);
        let new_piece = content.piece_commitment_id.unwrap();
        assert_ne!(new_piece, old_piece);
        assert_eq!(app.ctx.dispatcher.submitted_count("commitment"), 2);

        let old = piece_commitment::Entity::find_by_id(old_piece)
            .one(&app.ctx.db)
            .await
            .unwrap()
            .unwrap();
        let new = piece_commitment::Entity::find_by_id(new_piece)
            .one(&app.ctx.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(new.piece, old.piece);
        assert_eq!(
            old.last_message.as_deref(),
            Some(format!("detached from content {id}").as_str())
        );

        let deals = app.deals(id).await;
        assert_eq!(deals.len(), 2);
        assert!(deals[0].failed);
        let view = app.get(&routes::content(id)).await;
        assert_eq!(view.body["replacements"][0]["reason"], "repair");

        // The detached row no longer belongs to anything.
        let res = app.post_empty(&routes::piece_repair(old_piece)).await;
        assert_eq!(res.status, 400, "{}", res.text);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unknown_or_busy_pieces_are_refused() {
        let app = TestApp::spawn().await;

        let res = app.post_empty(&routes::piece_repair(999)).await;
        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");

        let id = app.create_content("connection_mode=e2e", 2048).await;
        app.settle().await;
        assert_eq!(app.status(id).await, ContentStatus::TransferStarted);
        let piece = app.content(id).await.piece_commitment_id.unwrap();

        let res = app.post_empty(&routes::piece_repair(piece)).await;
        assert_eq!(res.status, 409, "{}", res.text);
        assert_eq!(app.ctx.dispatcher.submitted_count("piece-repair"), 0);
    }
}

mod retry {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_transfer_is_retried_with_a_new_deal() {
        let app = TestApp::spawn().await;
        let id = app.create_content("connection_mode=e2e", 2048).await;
        app.settle().await;
        let first = app.active_deal(id).await;
        let outcome = app
            .reactor()
            .on_transfer_event(&event(&first, TransferStatus::Failed))
            .await
            .unwrap();
        assert_eq!(outcome, ReactorOutcome::Applied(ContentStatus::TransferFailed));
        app.settle().await;

        let res = app
            .post(&routes::retry(id), &json!({ "connection_mode": "e2e" }))
            .await;
        assert_eq!(res.status, 202, "{}", res.text);
        assert_eq!(res.body["job"], "retry");
        app.settle().await;

        assert_eq!(app.status(id).await, ContentStatus::TransferStarted);
        let deals = app.deals(id).await;
        assert_eq!(deals.len(), 2);
        assert!(deals[0].failed);
        assert_eq!(app.market.transfers().len(), 2);

        let view = app.get(&routes::content(id)).await;
        assert_eq!(view.body["replacements"][0]["reason"], "retry");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_computation_restarts_from_pinned() {
        let app = TestApp::spawn().await;
        let id = app.create_content("connection_mode=import", 10).await;
        app.settle().await;

        let res = app
            .post(&routes::retry(id), &json!({ "connection_mode": "import" }))
            .await;
        assert_eq!(res.status, 202, "{}", res.text);
        app.settle().await;

        assert_eq!(app.ctx.dispatcher.submitted_count("commitment"), 2);
        assert_eq!(app.status(id).await, ContentStatus::PieceComputingFailed);
    }

    #[tokio::test]
    async fn retry_checks_the_connection_mode() {
        let app = TestApp::spawn().await;

        let res = app
            .post(&routes::retry(1), &json!({ "connection_mode": "import" }))
            .await;
        assert_eq!(res.status, 404);

        let res = app.post(&routes::retry(1), &json!({})).await;
        assert_eq!(res.status, 400);
    }
}

mod auto_retry {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sweep_respects_the_retry_budget() {
        let app = TestApp::spawn_with(|config| {
            config.retry.cooldown_secs = 0;
            config.retry.max_auto_retry = 1;
        })
        .await;
        app.market
            .fail_next_proposal(MarketError::Rejected("busy".into()));
        let id = rejected(&app).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(sweep_auto_retry(&app.ctx).await.unwrap(), vec![id]);
        app.settle().await;
        assert_eq!(app.status(id).await, ContentStatus::DealProposalFailed);
        assert_eq!(app.deals(id).await.len(), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sweep_auto_retry(&app.ctx).await.unwrap().is_empty());
        assert_eq!(app.ctx.dispatcher.submitted_count("retry"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn recent_failures_cool_down() {
        let app = TestApp::spawn().await;
        rejected(&app).await;

        assert!(sweep_auto_retry(&app.ctx).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn computation_failures_are_left_alone() {
        let app = TestApp::spawn_with(|config| config.retry.cooldown_secs = 0).await;
        app.create_content("connection_mode=import", 10).await;
        app.settle().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(sweep_auto_retry(&app.ctx).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn opting_out_skips_the_sweep() {
        let app = TestApp::spawn_with(|config| config.retry.cooldown_secs = 0).await;
        let id = rejected(&app).await;

        let res = app
            .put(&routes::auto_retry(id), &json!({ "enabled": false }))
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["auto_retry"], false);
        assert_eq!(res.body["status"], "deal-proposal-failed");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(sweep_auto_retry(&app.ctx).await.unwrap().is_empty());

        let res = app
            .put(&routes::auto_retry(999), &json!({ "enabled": true }))
            .await;
        assert_eq!(res.status, 404);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn background_sweep_retries_and_stops() {
        let app = TestApp::spawn_with(|config| {
            config.retry.cooldown_secs = 0;
            config.retry.scan_interval_secs = 1;
        })
        .await;
        let id = rejected(&app).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let shutdown = CancellationToken::new();
        let sweep = tokio::spawn(run_auto_retry(app.ctx.clone(), shutdown.clone()));

        app.wait_for_status(id, ContentStatus::DealProposalSent).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), sweep)
            .await
            .expect("sweep did not stop")
            .unwrap();
        assert_eq!(app.deals(id).await.len(), 2);
    }
}
