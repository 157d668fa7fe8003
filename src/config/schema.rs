//! Configuration schema definitions.
//!
//! Two layers live here:
//! - [`BridgeSettings`]: the process settings file (TOML), read at startup and
//!   on hot reload.
//! - [`BridgeConfiguration`]: the versioned bridge configuration owned by the
//!   configuration store. Its string fields are kept opaque here and are
//!   interpreted by the transaction builder.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Passphrase of the public test network.
pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";

/// Root settings for the bridge process.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct BridgeSettings {
    /// Service wiring (authorization, queues).
    pub service: ServiceConfig,

    /// Durable record store.
    pub store: StoreConfig,

    /// External network client settings.
    pub network: NetworkConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Optional initial bridge configuration, applied by the system principal.
    pub bridge: Option<BridgeConfiguration>,
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Principals allowed to replace the bridge configuration.
    pub authorized_users: Vec<String>,

    /// Capacity of the inbound ledger event channel.
    pub event_queue_capacity: usize,

    /// Capacity of each per-account worker queue.
    pub account_queue_capacity: usize,

    /// An account worker with no events for this long exits.
    pub worker_idle_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            authorized_users: Vec::new(),
            event_queue_capacity: 1024,
            account_queue_capacity: 64,
            worker_idle_timeout_ms: 60_000,
        }
    }
}

impl ServiceConfig {
    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_idle_timeout_ms)
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding links, transactions and configuration history.
    /// In-memory only when unset.
    pub path: Option<String>,
}

/// External network client configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per-request timeout for horizon queries in seconds.
    pub request_timeout_secs: u64,

    /// Horizon endpoints tried after the configured one fails to connect.
    pub failover_urls: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            failover_urls: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Prometheus exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "stellar_bridge=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Retry policy for submissions.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of submission attempts per transaction.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// The bridge configuration singleton.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BridgeConfiguration {
    /// Public account id of the funding account. The secret never appears here.
    pub funding_account_identity: String,

    /// Horizon base URL.
    pub external_network_endpoint: String,

    /// Network passphrase, part of every transaction hash.
    #[serde(default = "default_passphrase")]
    pub network_passphrase: String,

    /// Reconciliation poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deadline for a single submission attempt in milliseconds.
    #[serde(default = "default_submission_timeout_ms")]
    pub submission_timeout_ms: u64,

    /// Fee per operation in stroops.
    #[serde(default = "default_base_fee")]
    pub base_fee: u32,

    /// Bridged assets: asset code -> issuer account id.
    #[serde(default)]
    pub assets: BTreeMap<String, String>,

    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

fn default_passphrase() -> String {
    TESTNET_PASSPHRASE.to_string()
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_submission_timeout_ms() -> u64 {
    30_000
}

fn default_base_fee() -> u32 {
    100
}

impl BridgeConfiguration {
    /// Create a configuration with default policy knobs.
    pub fn new(funding_account_identity: impl Into<String>, external_network_endpoint: impl Into<String>) -> Self {
        Self {
            funding_account_identity: funding_account_identity.into(),
            external_network_endpoint: external_network_endpoint.into(),
            network_passphrase: default_passphrase(),
            poll_interval_ms: default_poll_interval_ms(),
            submission_timeout_ms: default_submission_timeout_ms(),
            base_fee: default_base_fee(),
            assets: BTreeMap::new(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Add a bridged asset.
    pub fn with_asset(mut self, code: impl Into<String>, issuer: impl Into<String>) -> Self {
        self.assets.insert(code.into(), issuer.into());
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }
}

/// One accepted version of the bridge configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct VersionedConfiguration {
    /// Monotonic version, starting at 1.
    pub version: u64,

    pub configuration: BridgeConfiguration,

    /// Principal that set this version.
    pub updated_by: String,

    /// Unix milliseconds.
    pub updated_at: u64,
}

impl std::ops::Deref for VersionedConfiguration {
    type Target = BridgeConfiguration;

    fn deref(&self) -> &BridgeConfiguration {
        &self.configuration
    }
}
