use common::{CommitmentStatus, ContentStatus};
use node::entity::piece_commitment;
use node::market::MarketError;
use sea_orm::EntityTrait;

use crate::support::TestApp;

async fn piece_status(app: &TestApp, content_id: i32) -> CommitmentStatus {
    let piece_id = app
        .content(content_id)
        .await
        .piece_commitment_id
        .expect("content should have a piece");
    piece_commitment::Entity::find_by_id(piece_id)
        .one(&app.ctx.db)
        .await
        .unwrap()
        .unwrap()
        .status
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transport_failure_is_retried_with_a_fresh_deal() {
    let app = TestApp::spawn().await;
    app.market
        .fail_next_proposal(MarketError::Transport("connection refused".into()));

    let id = app.create_content("connection_mode=import", 2048).await;
    app.settle().await;

    assert_eq!(app.status(id).await, ContentStatus::DealProposalSent);
    assert_eq!(app.market.proposals().len(), 2);
    assert_eq!(app.ctx.dispatcher.submitted_count("deal-making"), 2);

    let deals = app.deals(id).await;
    assert_eq!(deals.len(), 2);
    assert!(deals[0].failed);
    assert_eq!(
        deals[0].last_message.as_deref(),
        Some("transport error: connection refused")
    );
    assert!(!deals[1].failed);
    assert_ne!(deals[0].deal_uuid, deals[1].deal_uuid);
    assert_eq!(piece_status(&app, id).await, CommitmentStatus::Committed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn persistent_transport_failure_gives_up() {
    let app = TestApp::spawn().await;
    for _ in 0..3 {
        app.market
            .fail_next_proposal(MarketError::Transport("stream reset".into()));
    }

    let id = app.create_content("connection_mode=import", 2048).await;
    app.settle().await;

    let content = app.content(id).await;
    assert_eq!(content.status, ContentStatus::DealProposalFailed);
    assert_eq!(
        content.last_message.as_deref(),
        Some("giving up after 3 attempts: transport error: stream reset")
    );
    assert_eq!(app.market.proposals().len(), 3);

    let deals = app.deals(id).await;
    assert_eq!(deals.len(), 3);
    assert!(deals.iter().all(|d| d.failed));
    assert_eq!(piece_status(&app, id).await, CommitmentStatus::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rejection_is_final() {
    let app = TestApp::spawn().await;
    app.market
        .fail_next_proposal(MarketError::Rejected("price too low".into()));

    let id = app.create_content("connection_mode=import", 2048).await;
    app.settle().await;

    let content = app.content(id).await;
    assert_eq!(content.status, ContentStatus::DealProposalFailed);
    assert_eq!(
        content.last_message.as_deref(),
        Some("proposal rejected: price too low")
    );
    assert_eq!(app.market.proposals().len(), 1);
    assert!(app.deals(id).await[0].failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identical_proposal_counts_as_sent() {
    let app = TestApp::spawn().await;
    app.market.fail_next_proposal(MarketError::classify(
        "deal proposal is identical to deal 7b3c",
    ));

    let id = app.create_content("connection_mode=import", 2048).await;
    app.settle().await;

    assert_eq!(app.status(id).await, ContentStatus::DealProposalSent);
    let deal = app.active_deal(id).await;
    assert_eq!(deal.proposal_cid, None);
    assert!(!deal.failed);
    assert_eq!(piece_status(&app, id).await, CommitmentStatus::Committed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_provider_fails_the_proposal() {
    let app = TestApp::spawn_with(|config| config.deal.default_miners.clear()).await;

    let id = app.create_content("connection_mode=import", 2048).await;
    app.settle().await;

    let content = app.content(id).await;
    assert_eq!(content.status, ContentStatus::DealProposalFailed);
    assert!(
        content
            .last_message
            .as_deref()
            .unwrap()
            .contains("no storage provider available")
    );
    assert!(app.market.proposals().is_empty());
    assert!(app.deals(id).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn default_providers_rotate_by_content() {
    let app = TestApp::spawn_with(|config| {
        config.deal.default_miners = vec!["f0a".into(), "f0b".into()];
    })
    .await;

    let first = app.create_content("connection_mode=import", 1024).await;
    let second = app.create_content("connection_mode=import", 2048).await;
    app.settle().await;

    let expected = |id: i32| if id % 2 == 0 { "f0a" } else { "f0b" };
    assert_eq!(app.active_deal(first).await.miner, expected(first));
    assert_eq!(app.active_deal(second).await.miner, expected(second));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rejected_transfer_fails_after_the_proposal() {
    let app = TestApp::spawn().await;
    app.market
        .fail_next_transfer(MarketError::Rejected("no capacity".into()));

    let id = app.create_content("connection_mode=e2e", 2048).await;
    app.settle().await;

    let content = app.content(id).await;
    assert_eq!(content.status, ContentStatus::TransferFailed);
    assert_eq!(
        content.last_message.as_deref(),
        Some("proposal rejected: no capacity")
    );
    let deal = &app.deals(id).await[0];
    assert!(deal.failed);
    assert!(deal.proposal_cid.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transfer_transport_failure_reproposes() {
    let app = TestApp::spawn().await;
    app.market
        .fail_next_transfer(MarketError::Transport("failed to dial".into()));

    let id = app.create_content("connection_mode=e2e", 2048).await;
    app.settle().await;

    assert_eq!(app.status(id).await, ContentStatus::TransferStarted);
    assert_eq!(app.market.proposals().len(), 2);
    assert_eq!(app.market.transfers().len(), 2);
    let deals = app.deals(id).await;
    assert!(deals[0].failed);
    assert!(deals[1].dt_chan.is_some());
}
