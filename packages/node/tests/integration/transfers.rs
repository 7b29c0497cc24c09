use std::time::{Duration, Instant};

use common::{ContentStatus, TransferEvent, TransferStatus};
use node::market::MarketError;
use node::reactor::ReactorOutcome;
use serde_json::json;

use crate::support::{TestApp, event, routes};

/// Upload an online content and wait for its transfer channel.
async fn transferring(app: &TestApp, len: usize) -> i32 {
    let id = app.create_content("connection_mode=e2e", len).await;
    app.settle().await;
    assert_eq!(app.status(id).await, ContentStatus::TransferStarted);
    id
}

mod reactor {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn webhook_failure_schedules_one_restart() {
        let app = TestApp::spawn().await;
        let id = transferring(&app, 4096).await;
        let deal = app.active_deal(id).await;
        let channel = deal.dt_chan.clone().unwrap();

        let res = app
            .post(
                routes::TRANSFER_EVENTS,
                &json!({
                    "transfer_id": channel,
                    "deal_id": deal.id,
                    "status": "failed",
                    "message": "peer went away",
                }),
            )
            .await;
        assert_eq!(res.status, 202, "{}", res.text);

        app.wait_for_status(id, ContentStatus::TransferFailed).await;
        app.settle().await;

        let content = app.content(id).await;
        assert_eq!(content.last_message.as_deref(), Some("peer went away"));
        let deal = app.active_deal(id).await;
        assert!(deal.failed_at.is_some());
        assert!(!deal.failed);

        assert_eq!(app.ctx.dispatcher.submitted_count("transfer-restart"), 1);
        assert_eq!(app.market.restarts(), vec![channel.clone()]);

        // A repeated failure for the same channel changes nothing.
        let outcome = app
            .reactor()
            .on_transfer_event(&event(&deal, TransferStatus::Failed))
            .await
            .unwrap();
        assert!(matches!(outcome, ReactorOutcome::Ignored(_)));
        app.settle().await;
        assert_eq!(app.ctx.dispatcher.submitted_count("transfer-restart"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn offline_failure_is_noted_without_a_restart() {
        let app = TestApp::spawn().await;
        let id = app.create_content("connection_mode=import", 4096).await;
        app.settle().await;
        let deal = app.active_deal(id).await;

        let outcome = app
            .reactor()
            .on_transfer_event(&event(&deal, TransferStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(outcome, ReactorOutcome::Applied(ContentStatus::TransferFailed));
        app.settle().await;

        assert_eq!(app.ctx.dispatcher.submitted_count("transfer-restart"), 1);
        assert!(app.market.restarts().is_empty());
        let content = app.content(id).await;
        assert_eq!(content.status, ContentStatus::TransferFailed);
        assert_eq!(
            content.last_message.as_deref(),
            Some("transfer failed before a channel was opened")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn channel_progress_walks_the_lifecycle() {
        let app = TestApp::spawn().await;
        let id = transferring(&app, 4096).await;
        let deal = app.active_deal(id).await;
        let cid = app.content(id).await.cid;
        let reactor = app.reactor();

        let steps = [
            (TransferStatus::Requested, ContentStatus::TransferStarted),
            (TransferStatus::Ongoing, ContentStatus::TransferOngoing),
            (TransferStatus::Ongoing, ContentStatus::TransferOngoing),
            (TransferStatus::Completed, ContentStatus::TransferFinished),
        ];
        for (status, expected) in steps {
            let outcome = reactor.on_transfer_event(&event(&deal, status)).await.unwrap();
            assert_eq!(outcome, ReactorOutcome::Applied(expected), "after {status}");
            assert_eq!(app.status(id).await, expected);
        }

        let deal = app.active_deal(id).await;
        assert!(deal.transfer_finished.is_some());
        assert!(deal.sealed_at.is_some());
        assert!(deal.on_chain_at.is_some());
        app.wait_for_local_copy(&cid, false).await;

        let outcome = reactor
            .on_transfer_event(&event(&deal, TransferStatus::Failed))
            .await
            .unwrap();
        assert_eq!(outcome, ReactorOutcome::Ignored("transfer already finished"));
        assert_eq!(app.status(id).await, ContentStatus::TransferFinished);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn kept_copies_survive_completion() {
        let app = TestApp::spawn_with(|config| config.transfer.keep_copies = true).await;
        let id = transferring(&app, 4096).await;
        let deal = app.active_deal(id).await;
        let cid = app.content(id).await.cid;

        let outcome = app
            .reactor()
            .on_transfer_event(&event(&deal, TransferStatus::TransferFinished))
            .await
            .unwrap();
        assert_eq!(outcome, ReactorOutcome::Applied(ContentStatus::TransferFinished));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(app.has_local_copy(&cid).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shared_copy_is_released_by_the_last_finisher() {
        let app = TestApp::spawn().await;
        let first = transferring(&app, 4096).await;
        let second = transferring(&app, 4096).await;
        let cid = app.content(first).await.cid;
        assert_eq!(app.content(second).await.cid, cid);
        let reactor = app.reactor();

        let deal = app.active_deal(first).await;
        reactor
            .on_transfer_event(&event(&deal, TransferStatus::Completed))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(app.has_local_copy(&cid).await);

        let deal = app.active_deal(second).await;
        reactor
            .on_transfer_event(&event(&deal, TransferStatus::Completed))
            .await
            .unwrap();
        app.wait_for_local_copy(&cid, false).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn events_for_retired_deals_are_ignored() {
        let app = TestApp::spawn().await;
        app.market
            .fail_next_transfer(MarketError::Transport("i/o timeout".into()));
        let id = transferring(&app, 4096).await;
        let deals = app.deals(id).await;
        assert_eq!(deals.len(), 2);

        let outcome = app
            .reactor()
            .on_transfer_event(&event(&deals[0], TransferStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, ReactorOutcome::Ignored("deal is no longer active"));
        assert_eq!(app.status(id).await, ContentStatus::TransferStarted);
    }

    #[tokio::test]
    async fn unknown_deals_and_idle_statuses_are_ignored() {
        let app = TestApp::spawn().await;
        let reactor = app.reactor();

        let outcome = reactor
            .on_transfer_event(&TransferEvent {
                transfer_id: "chan-x".into(),
                deal_id: 404,
                status: TransferStatus::Completed,
                message: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome, ReactorOutcome::Ignored("unknown deal"));

        let outcome = reactor
            .on_transfer_event(&TransferEvent {
                transfer_id: "chan-x".into(),
                deal_id: 404,
                status: TransferStatus::Other,
                message: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome, ReactorOutcome::Ignored("uninteresting status"));
    }

    #[tokio::test]
    async fn malformed_events_are_rejected() {
        let app = TestApp::spawn().await;

        let res = app
            .post(routes::TRANSFER_EVENTS, &json!({ "deal_id": "seven" }))
            .await;
        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }
}

mod restart {
    use super::*;

    async fn fail_transfer(app: &TestApp, id: i32) {
        let deal = app.active_deal(id).await;
        let outcome = app
            .reactor()
            .on_transfer_event(&event(&deal, TransferStatus::Disconnected))
            .await
            .unwrap();
        assert_eq!(outcome, ReactorOutcome::Applied(ContentStatus::TransferFailed));
        app.settle().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn forgotten_channel_is_reported() {
        let app = TestApp::spawn().await;
        let id = transferring(&app, 4096).await;
        let channel = app.active_deal(id).await.dt_chan.unwrap();
        app.market.forget_channel(&channel);

        fail_transfer(&app, id).await;

        assert!(app.market.restarts().is_empty());
        let expected = MarketError::NoTransferState(channel).to_string();
        assert_eq!(
            app.active_deal(id).await.last_message.as_deref(),
            Some(expected.as_str())
        );
        assert_eq!(
            app.content(id).await.last_message.as_deref(),
            Some(expected.as_str())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_restart_is_noted() {
        let app = TestApp::spawn().await;
        let id = transferring(&app, 4096).await;
        app.market
            .fail_next_restart(MarketError::Transport("connection refused".into()));

        fail_transfer(&app, id).await;

        assert_eq!(app.market.restarts().len(), 1);
        assert_eq!(
            app.content(id).await.last_message.as_deref(),
            Some("transfer restart failed: transport error: connection refused")
        );
        assert_eq!(app.status(id).await, ContentStatus::TransferFailed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn restarts_are_bounded_per_deal() {
        let app = TestApp::spawn_with(|config| config.transfer.max_restarts = 1).await;
        let id = transferring(&app, 4096).await;

        fail_transfer(&app, id).await;
        assert_eq!(app.market.restarts().len(), 1);

        // The resumed channel reports in, then drops again.
        let deal = app.active_deal(id).await;
        let outcome = app
            .reactor()
            .on_transfer_event(&event(&deal, TransferStatus::Requested))
            .await
            .unwrap();
        assert_eq!(outcome, ReactorOutcome::Applied(ContentStatus::TransferStarted));
        fail_transfer(&app, id).await;

        assert_eq!(app.market.restarts().len(), 1);
        assert_eq!(app.ctx.dispatcher.submitted_count("transfer-restart"), 2);
        assert_eq!(
            app.content(id).await.last_message.as_deref(),
            Some("transfer restart attempts exhausted")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn backoff_does_not_hold_the_only_worker() {
        let app = TestApp::spawn_with(|config| {
            config.dispatcher.workers = 1;
            config.transfer.restart_base_delay_ms = 3_000;
            config.transfer.restart_max_delay_ms = 3_000;
        })
        .await;
        let id = transferring(&app, 4096).await;
        let deal = app.active_deal(id).await;
        app.reactor()
            .on_transfer_event(&event(&deal, TransferStatus::Disconnected))
            .await
            .unwrap();

        let started = Instant::now();
        let other = app.create_content("connection_mode=import", 2048).await;
        app.wait_for_status(other, ContentStatus::DealProposalSent).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(app.market.restarts().is_empty());
        assert_eq!(app.ctx.dispatcher.stats().delayed, 1);

        app.settle().await;
        assert_eq!(app.market.restarts().len(), 1);
        assert_eq!(app.ctx.dispatcher.submitted_count("transfer-resume"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn recovered_channel_is_not_restarted() {
        let app = TestApp::spawn_with(|config| {
            config.transfer.restart_base_delay_ms = 300;
            config.transfer.restart_max_delay_ms = 300;
        })
        .await;
        let id = transferring(&app, 4096).await;
        let deal = app.active_deal(id).await;
        let reactor = app.reactor();
        reactor
            .on_transfer_event(&event(&deal, TransferStatus::Failed))
            .await
            .unwrap();
        let outcome = reactor
            .on_transfer_event(&event(&deal, TransferStatus::Ongoing))
            .await
            .unwrap();
        assert_eq!(outcome, ReactorOutcome::Applied(ContentStatus::TransferOngoing));

        app.settle().await;
        assert!(app.market.restarts().is_empty());
        assert_eq!(app.status(id).await, ContentStatus::TransferOngoing);
    }
}
