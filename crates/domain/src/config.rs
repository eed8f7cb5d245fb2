//! Environment-driven configuration structures shared by all binaries.

use std::{env, str::FromStr, time::Duration};

use serde::Deserialize;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::model::EventQuery;

/// Maximum entries accepted by a single batch submission or receive call.
pub const QUEUE_MAX_BATCH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Network {
    Testnet,
    Mainnet,
    Emulator,
}

impl Network {
    /// Prefix used for the per-network environment variables, e.g.
    /// `TESTNET_ACCESS_NODES`.
    pub fn env_prefix(&self) -> String {
        self.as_ref().to_ascii_uppercase()
    }
}

/// One deployed contract whose events are scanned.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractConfig {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub created_block_height: u64,
    pub include_events: Vec<String>,
}

impl ContractConfig {
    pub fn event_queries(&self) -> Vec<EventQuery> {
        self.include_events
            .iter()
            .map(|event| EventQuery::new(&self.address, &self.name, event))
            .collect()
    }
}

/// Queue coordinates shared by the producer and the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    queue_url: String,
    endpoint: String,
}

impl QueueConfig {
    pub fn new(queue_url: impl Into<String>, endpoint: Option<String>) -> Self {
        let queue_url = queue_url.into();
        let endpoint = endpoint.unwrap_or_else(|| queue_url.clone());
        Self {
            queue_url,
            endpoint,
        }
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(
            get_required_var("QUEUE_URL")?,
            get_optional_var("QUEUE_ENDPOINT"),
        ))
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Timing and sizing knobs of the scan/publish pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTunables {
    pub scan_step: u64,
    pub error_sleep: Duration,
    pub idle_sleep: Duration,
    pub batch_max_entries: usize,
    pub retry_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for ScanTunables {
    fn default() -> Self {
        Self {
            scan_step: 249,
            error_sleep: Duration::from_millis(5_000),
            idle_sleep: Duration::from_millis(30_000),
            batch_max_entries: 5,
            retry_interval: Duration::from_millis(5_000),
            request_timeout: Duration::from_millis(40_000),
        }
    }
}

impl ScanTunables {
    fn load_from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let batch_max_entries =
            get_number_or("BATCH_MAX_ENTRIES", defaults.batch_max_entries)?;
        ensure_range("BATCH_MAX_ENTRIES", batch_max_entries, 1, QUEUE_MAX_BATCH)?;
        let scan_step = get_number_or("SCAN_STEP", defaults.scan_step)?;
        if scan_step == 0 {
            return Err(ConfigError::OutOfRange {
                key: "SCAN_STEP",
                min: 1,
                max: u64::MAX,
            });
        }

        Ok(Self {
            scan_step,
            error_sleep: get_millis_or("ERROR_SLEEP_MS", defaults.error_sleep)?,
            idle_sleep: get_millis_or("IDLE_SLEEP_MS", defaults.idle_sleep)?,
            batch_max_entries,
            retry_interval: get_millis_or("RETRY_INTERVAL_MS", defaults.retry_interval)?,
            request_timeout: get_millis_or("REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
        })
    }
}

/// Scanner configuration: which network, which access nodes and which
/// contract events to follow, plus where checkpoints and events go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    network: Network,
    access_nodes: Vec<String>,
    contracts: Vec<ContractConfig>,
    database_url: String,
    database_max_connections: Option<u32>,
    queue: QueueConfig,
    tunables: ScanTunables,
}

impl ScannerConfig {
    /// Loads configuration by hydrating `.env` (if present) and reading the
    /// required process variables. Missing, malformed or empty entries
    /// surface as `ConfigError` so the binary refuses to start.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let raw_network = get_required_var("NETWORK")?;
        let network = Network::from_str(&raw_network)
            .map_err(|_| ConfigError::InvalidNetwork { value: raw_network })?;
        let prefix = network.env_prefix();

        let access_nodes = get_optional_var(&format!("{prefix}_ACCESS_NODES"))
            .map(|value| split_list(&value))
            .unwrap_or_default();
        if access_nodes.is_empty() {
            return Err(ConfigError::EmptyAccessNodes { network });
        }

        let contracts_key = format!("{prefix}_CONTRACTS");
        let contracts = match get_optional_var(&contracts_key) {
            Some(raw) => parse_contracts(&contracts_key, &raw)?,
            None => Vec::new(),
        };
        if contracts.is_empty() {
            return Err(ConfigError::EmptyContracts { network });
        }
        if let Some(contract) = contracts.iter().find(|c| c.include_events.is_empty()) {
            return Err(ConfigError::NoEvents {
                contract: contract.name.clone(),
            });
        }

        Ok(Self {
            network,
            access_nodes,
            contracts,
            database_url: get_required_var("DATABASE_URL")?,
            database_max_connections: get_optional_number("DATABASE_MAX_CONNECTIONS")?,
            queue: QueueConfig::load_from_env()?,
            tunables: ScanTunables::load_from_env()?,
        })
    }

    /// Builds a configuration without reading the environment, for embedding.
    pub fn new(
        network: Network,
        access_nodes: Vec<String>,
        contracts: Vec<ContractConfig>,
        database_url: impl Into<String>,
        queue: QueueConfig,
        tunables: ScanTunables,
    ) -> Self {
        Self {
            network,
            access_nodes,
            contracts,
            database_url: database_url.into(),
            database_max_connections: None,
            queue,
            tunables,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn access_nodes(&self) -> &[String] {
        &self.access_nodes
    }

    pub fn contracts(&self) -> &[ContractConfig] {
        &self.contracts
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Connection pool cap from `DATABASE_MAX_CONNECTIONS`; `None` keeps the
    /// driver default.
    pub fn database_max_connections(&self) -> Option<u32> {
        self.database_max_connections
    }

    pub fn queue(&self) -> &QueueConfig {
        &self.queue
    }

    pub fn tunables(&self) -> &ScanTunables {
        &self.tunables
    }
}

/// Consumer configuration so the handler process does not depend on
/// scanner-only variables such as the access node list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    database_url: String,
    database_max_connections: Option<u32>,
    queue: QueueConfig,
    receive_max_messages: usize,
    receive_wait: Duration,
    error_sleep: Duration,
    gc_interval: Duration,
    request_timeout: Duration,
}

impl ConsumerConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let receive_max_messages = get_number_or("RECEIVE_MAX_MESSAGES", QUEUE_MAX_BATCH)?;
        ensure_range("RECEIVE_MAX_MESSAGES", receive_max_messages, 1, QUEUE_MAX_BATCH)?;
        let defaults = ScanTunables::default();

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            database_max_connections: get_optional_number("DATABASE_MAX_CONNECTIONS")?,
            queue: QueueConfig::load_from_env()?,
            receive_max_messages,
            receive_wait: Duration::from_secs(get_number_or("RECEIVE_WAIT_SECONDS", 15u64)?),
            error_sleep: get_millis_or("ERROR_SLEEP_MS", defaults.error_sleep)?,
            gc_interval: get_millis_or("RETRY_INTERVAL_MS", defaults.retry_interval)?,
            request_timeout: get_millis_or("REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn database_max_connections(&self) -> Option<u32> {
        self.database_max_connections
    }

    pub fn queue(&self) -> &QueueConfig {
        &self.queue
    }

    pub fn receive_max_messages(&self) -> usize {
        self.receive_max_messages
    }

    pub fn receive_wait(&self) -> Duration {
        self.receive_wait
    }

    pub fn error_sleep(&self) -> Duration {
        self.error_sleep
    }

    pub fn gc_interval(&self) -> Duration {
        self.gc_interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

fn parse_contracts(key: &str, raw: &str) -> Result<Vec<ContractConfig>, ConfigError> {
    serde_json::from_str(raw).map_err(|source| ConfigError::InvalidContracts {
        key: key.to_string(),
        source,
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn ensure_range(key: &'static str, value: usize, min: usize, max: usize) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            key,
            min: min as u64,
            max: max as u64,
        });
    }
    Ok(())
}

fn get_millis_or(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = get_number_or(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

fn get_number_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    match get_optional_var(key) {
        Some(value) => value
            .parse()
            .map_err(|source| ConfigError::InvalidNumber { key, source }),
        None => Ok(default),
    }
}

fn get_optional_number<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    get_optional_var(key)
        .map(|value| {
            value
                .parse()
                .map_err(|source| ConfigError::InvalidNumber { key, source })
        })
        .transpose()
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    get_optional_var(key).ok_or(ConfigError::MissingVar { key })
}

fn get_optional_var(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("FLOW_RELAY_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration, environment parsing or validation
/// fails. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("`{key}` must be within {min}..={max}")]
    OutOfRange {
        key: &'static str,
        min: u64,
        max: u64,
    },
    #[error("invalid network `{value}`, expected testnet, mainnet or emulator")]
    InvalidNetwork { value: String },
    #[error("no access nodes configured for {network}")]
    EmptyAccessNodes { network: Network },
    #[error("no contracts configured for {network}")]
    EmptyContracts { network: Network },
    #[error("contract `{contract}` includes no events")]
    NoEvents { contract: String },
    #[error("invalid contract list in `{key}`: {source}")]
    InvalidContracts {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
