use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{CommpConfig, DispatcherConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    1414
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://delta.db?mode=rwc".into()
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    1
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

/// Deal-making settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DealConfig {
    /// Providers used when content has no explicit assignment, picked by `content_id % len`.
    #[serde(default)]
    pub default_miners: Vec<String>,
    /// Signing identity used when content has no wallet assignment.
    #[serde(default = "default_wallet")]
    pub default_wallet: String,
    /// Attempts per deal-making run before the proposal is marked failed. Default: 10.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Deal duration in epochs when none was requested.
    #[serde(default = "default_duration_epochs")]
    pub default_duration_epochs: i64,
    /// Label prefix; the content address is used when empty.
    #[serde(default)]
    pub label: String,
}

fn default_wallet() -> String {
    "f1delta".into()
}
fn default_max_attempts() -> u32 {
    10
}
fn default_retry_base_delay_ms() -> u64 {
    1_000
}
fn default_retry_max_delay_ms() -> u64 {
    60_000
}
fn default_duration_epochs() -> i64 {
    common::epoch::DEFAULT_DURATION
}

impl Default for DealConfig {
    fn default() -> Self {
        Self {
            default_miners: Vec::new(),
            default_wallet: default_wallet(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            default_duration_epochs: default_duration_epochs(),
            label: String::new(),
        }
    }
}

/// Auto-retry sweep settings.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Automatic retries allowed per content on top of the first deal. Default: 3.
    #[serde(default = "default_max_auto_retry")]
    pub max_auto_retry: u64,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Minimum time a failed row must sit before it is retried. Default: 600.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_max_auto_retry() -> u64 {
    3
}
fn default_scan_interval_secs() -> u64 {
    300
}
fn default_cooldown_secs() -> u64 {
    600
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_auto_retry: default_max_auto_retry(),
            scan_interval_secs: default_scan_interval_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Transfer restart settings.
#[derive(Debug, Deserialize, Clone)]
pub struct TransferConfig {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_base_delay_ms")]
    pub restart_base_delay_ms: u64,
    #[serde(default = "default_restart_max_delay_ms")]
    pub restart_max_delay_ms: u64,
    /// Keep the local copy after the provider has the bytes.
    #[serde(default)]
    pub keep_copies: bool,
}

fn default_max_restarts() -> u32 {
    5
}
fn default_restart_base_delay_ms() -> u64 {
    5_000
}
fn default_restart_max_delay_ms() -> u64 {
    300_000
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            restart_base_delay_ms: default_restart_base_delay_ms(),
            restart_max_delay_ms: default_restart_max_delay_ms(),
            keep_copies: false,
        }
    }
}

/// Deal-protocol gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    #[serde(default = "default_market_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_market_url() -> String {
    "http://127.0.0.1:1234".into()
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            url: default_market_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlockstoreConfig {
    #[serde(default = "default_blockstore_path")]
    pub path: String,
    /// Largest accepted payload in bytes. Default: 32 GiB.
    #[serde(default = "default_blockstore_max_size")]
    pub max_size: u64,
}

fn default_blockstore_path() -> String {
    "./data/blocks".into()
}
fn default_blockstore_max_size() -> u64 {
    32 << 30
}

impl Default for BlockstoreConfig {
    fn default() -> Self {
        Self {
            path: default_blockstore_path(),
            max_size: default_blockstore_max_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NodeAppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub commp: CommpConfig,
    #[serde(default)]
    pub deal: DealConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub blockstore: BlockstoreConfig,
}

impl NodeAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("DELTA_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 1414_i64)?
            .set_default("dispatcher.workers", 8_i64)?
            .set_default("retry.enabled", true)?
            .add_source(File::with_name(&config_path).required(false))
            // e.g. DELTA__DATABASE__URL, DELTA__DEAL__DEFAULT_MINERS=f01000,f01001
            .add_source(
                Environment::with_prefix("DELTA")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("deal.default_miners")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}
