use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::storage::{Blockstore, ContentHash, FilesystemBlockstore};
use common::{ContentStatus, TransferEvent, TransferStatus};
use dispatcher::Dispatcher;
use reqwest::Client;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;

use node::config::{DatabaseConfig, NodeAppConfig};
use node::entity::{content, content_deal};
use node::market::FakeDealClient;
use node::reactor::TransferReactor;
use node::state::{AppState, ProcessorContext};

/// Generous upper bound for background work in tests.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

pub mod routes {
    pub const CONTENTS: &str = "/api/v1/contents";
    pub const COMMITMENT: &str = "/api/v1/contents/commitment";
    pub const TRANSFER_EVENTS: &str = "/api/v1/transfers/events";
    pub const DISPATCHER_STATS: &str = "/api/v1/dispatcher/stats";

    pub fn contents_with(query: &str) -> String {
        format!("/api/v1/contents?{query}")
    }

    pub fn content(id: i32) -> String {
        format!("/api/v1/contents/{id}")
    }

    pub fn status_check(id: i32) -> String {
        format!("/api/v1/contents/{id}/status-check")
    }

    pub fn repair(id: i32) -> String {
        format!("/api/v1/contents/{id}/repair")
    }

    pub fn retry(id: i32) -> String {
        format!("/api/v1/contents/{id}/retry")
    }

    pub fn auto_retry(id: i32) -> String {
        format!("/api/v1/contents/{id}/auto-retry")
    }

    pub fn piece_repair(id: i32) -> String {
        format!("/api/v1/piece-commitments/{id}/repair")
    }
}

/// A running node with a scripted storage provider.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub ctx: Arc<ProcessorContext>,
    pub market: Arc<FakeDealClient>,
    /// Same queue the webhook feeds.
    pub events: mpsc::Sender<TransferEvent>,
    _blocks: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    /// Raw response body as text.
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

/// Small delays, one default provider, no background sweep.
pub fn test_config() -> NodeAppConfig {
    let mut config = NodeAppConfig {
        database: DatabaseConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            min_connections: 1,
        },
        ..Default::default()
    };
    config.dispatcher.workers = 4;
    config.commp.parallelism = 2;
    config.deal.default_miners = vec!["f01000".into()];
    config.deal.max_attempts = 3;
    config.deal.retry_base_delay_ms = 10;
    config.deal.retry_max_delay_ms = 50;
    config.retry.enabled = false;
    config.transfer.restart_base_delay_ms = 10;
    config.transfer.restart_max_delay_ms = 50;
    config
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(configure: impl FnOnce(&mut NodeAppConfig)) -> Self {
        let mut config = test_config();
        configure(&mut config);

        let blocks = TempDir::new().expect("Failed to create blockstore dir");
        let blockstore = FilesystemBlockstore::new(blocks.path().to_path_buf(), 64 << 20)
            .await
            .expect("Failed to open blockstore");

        let db = node::database::init_db(&config.database)
            .await
            .expect("Failed to initialize database");

        let market = Arc::new(FakeDealClient::new());
        let dispatcher = Dispatcher::new(&config.dispatcher);
        let workers = config.dispatcher.workers;
        let ctx = Arc::new(ProcessorContext::new(
            db,
            dispatcher.clone(),
            market.clone(),
            Arc::new(blockstore),
            config,
        ));
        dispatcher.start(workers);

        let (events, events_rx) = mpsc::channel(64);
        tokio::spawn(TransferReactor::new(ctx.clone()).run(events_rx));

        let app = node::build_router(AppState {
            ctx: ctx.clone(),
            events: events.clone(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            ctx,
            market,
            events,
            _blocks: blocks,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    pub async fn post_empty(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .put(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send PUT request");

        TestResponse::from_response(res).await
    }

    /// Stream `bytes` as a raw upload body.
    pub async fn upload(&self, query: &str, bytes: Vec<u8>, api_key: Option<&str>) -> TestResponse {
        let mut req = self
            .client
            .post(self.url(&routes::contents_with(query)))
            .header("Content-Type", "application/octet-stream")
            .body(bytes);
        if let Some(key) = api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        let res = req.send().await.expect("Failed to send upload request");

        TestResponse::from_response(res).await
    }

    /// Upload a payload and return the new content id.
    pub async fn create_content(&self, query: &str, len: usize) -> i32 {
        let res = self.upload(query, payload(len), None).await;
        assert_eq!(res.status, 202, "upload failed: {}", res.text);
        res.body["content_id"]
            .as_i64()
            .expect("upload response should contain 'content_id'") as i32
    }

    /// Wait until every queued, running and delayed job has finished.
    pub async fn settle(&self) {
        tokio::time::timeout(SETTLE_TIMEOUT, self.ctx.dispatcher.wait_idle())
            .await
            .expect("dispatcher did not drain in time");
    }

    pub async fn content(&self, id: i32) -> content::Model {
        content::Entity::find_by_id(id)
            .one(&self.ctx.db)
            .await
            .expect("DB query failed")
            .expect("content not found")
    }

    pub async fn status(&self, id: i32) -> ContentStatus {
        self.content(id).await.status
    }

    /// Deals of a content, oldest first.
    pub async fn deals(&self, content_id: i32) -> Vec<content_deal::Model> {
        content_deal::Entity::find()
            .filter(content_deal::Column::ContentId.eq(content_id))
            .order_by_asc(content_deal::Column::Id)
            .all(&self.ctx.db)
            .await
            .expect("DB query failed")
    }

    pub async fn active_deal(&self, content_id: i32) -> content_deal::Model {
        self.deals(content_id)
            .await
            .into_iter()
            .rev()
            .find(|d| !d.failed)
            .expect("content should have an active deal")
    }

    /// Poll until the content reaches `status`.
    pub async fn wait_for_status(&self, id: i32, status: ContentStatus) {
        let reached = tokio::time::timeout(SETTLE_TIMEOUT, async {
            while self.status(id).await != status {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(
            reached.is_ok(),
            "content {id} never reached {status}, stuck at {}",
            self.status(id).await
        );
    }

    pub async fn has_local_copy(&self, cid: &str) -> bool {
        let hash = ContentHash::from_hex(cid).expect("content cid should be a hex digest");
        self.ctx
            .blockstore
            .contains(&hash)
            .await
            .expect("blockstore query failed")
    }

    /// Poll until the local copy of `cid` is present or absent.
    pub async fn wait_for_local_copy(&self, cid: &str, present: bool) {
        let reached = tokio::time::timeout(SETTLE_TIMEOUT, async {
            while self.has_local_copy(cid).await != present {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "local copy presence never became {present}");
    }

    pub fn reactor(&self) -> TransferReactor {
        TransferReactor::new(self.ctx.clone())
    }
}

pub fn event(deal: &content_deal::Model, status: TransferStatus) -> TransferEvent {
    TransferEvent {
        transfer_id: deal
            .dt_chan
            .clone()
            .unwrap_or_else(|| format!("chan-{}", deal.id)),
        deal_id: deal.id,
        status,
        message: None,
    }
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let text = res.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self { status, text, body }
    }

    pub fn content_id(&self) -> i32 {
        self.body["content_id"]
            .as_i64()
            .expect("response body should contain 'content_id'") as i32
    }
}
