use std::sync::Arc;

use common::TransferEvent;
use common::retry::RetryTracker;
use common::storage::Blockstore;
use dispatcher::Dispatcher;
use sea_orm::DatabaseConnection;
use tokio::sync::{Mutex, mpsc};

use crate::config::NodeAppConfig;
use crate::market::DealClient;

/// Everything a job needs. Built once at startup and shared by every job, the reactor and the
/// auto-retry sweep.
pub struct ProcessorContext {
    pub db: DatabaseConnection,
    pub dispatcher: Dispatcher,
    pub market: Arc<dyn DealClient>,
    pub blockstore: Arc<dyn Blockstore>,
    pub config: NodeAppConfig,
    /// Transfer restart attempts per deal.
    pub restarts: Arc<Mutex<RetryTracker>>,
}

impl ProcessorContext {
    pub fn new(
        db: DatabaseConnection,
        dispatcher: Dispatcher,
        market: Arc<dyn DealClient>,
        blockstore: Arc<dyn Blockstore>,
        config: NodeAppConfig,
    ) -> Self {
        let restarts = Arc::new(Mutex::new(RetryTracker::new(config.transfer.max_restarts)));
        Self {
            db,
            dispatcher,
            market,
            blockstore,
            config,
            restarts,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ProcessorContext>,
    /// Feeds the transfer reactor.
    pub events: mpsc::Sender<TransferEvent>,
}
