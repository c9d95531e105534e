//! Pool, watcher and poll-loop configuration.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Client pool tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Interval between health passes.
    pub check_interval_ms: u64,
    /// Consecutive failed probes before a node leaves the snapshot.
    pub failure_tolerance: u32,
    /// Timeout of a single probe request.
    pub probe_timeout_ms: u64,
    /// How often a draining node's borrower count is polled.
    pub drain_poll_interval_ms: u64,
    /// A draining client is closed after this long even if still borrowed.
    pub drain_grace_ms: u64,
    /// Upper bound on `ClientPool::close`.
    pub close_deadline_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            failure_tolerance: 3,
            probe_timeout_ms: 1_000,
            drain_poll_interval_ms: 100,
            drain_grace_ms: 10_000,
            close_deadline_ms: 10_000,
        }
    }
}

impl PoolConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms.max(1))
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn close_deadline(&self) -> Duration {
        Duration::from_millis(self.close_deadline_ms)
    }
}

/// Display metadata of the watched contract. Does not affect scanning.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContractMeta {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Per-watcher settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Expected chain id; zero means "take it from the pool".
    pub chain_id: u64,
    /// Human-readable chain name (e.g. "sepolia").
    pub chain: String,
    pub meta: ContractMeta,
    /// Metadata per contract address or program id, for watches spanning
    /// several of them. Keys are compared as written.
    pub contracts: HashMap<String, ContractMeta>,
    /// Block the contract was deployed in.
    pub deployed_block: u64,
    /// Last block already processed. Defaults to `deployed_block - 1`.
    pub processed_block: Option<u64>,
    /// Max blocks (or signatures) per scan; non-positive selects the family default.
    pub window_limit: i64,
    /// Timeout of each RPC call made by a scan.
    pub rpc_timeout_ms: u64,
    /// Extra attempts at borrowing a client before giving up.
    pub client_retries: u32,
    pub client_retry_delay_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            chain_id: 0,
            chain: String::new(),
            meta: ContractMeta::default(),
            contracts: HashMap::new(),
            deployed_block: 0,
            processed_block: None,
            window_limit: 0,
            rpc_timeout_ms: 5_000,
            client_retries: 3,
            client_retry_delay_ms: 100,
        }
    }
}

impl WatchConfig {
    /// Window size, falling back to `default` when unset or non-positive.
    pub fn window_limit_or(&self, default: u64) -> u64 {
        if self.window_limit <= 0 {
            default
        } else {
            self.window_limit as u64
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Metadata registered for `contract`, falling back to `meta`.
    pub fn contract_meta(&self, contract: &str) -> &ContractMeta {
        self.contracts.get(contract).unwrap_or(&self.meta)
    }

    pub fn client_retry_delay(&self) -> Duration {
        Duration::from_millis(self.client_retry_delay_ms)
    }
}

/// Poll-loop pacing and error backoff for `Watch::run`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub poll_interval_ms: u64,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
        }
    }
}

impl BackoffConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Delay before the next attempt after `failures` consecutive failed scans.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        let secs = self
            .initial_backoff_secs
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }
}
