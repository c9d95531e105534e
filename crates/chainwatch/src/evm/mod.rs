//! EVM chains: block-height cursor, `eth_getLogs` windows, topic filters.

pub mod http;
pub mod standards;
pub mod types;

pub use http::HttpEvmClient;
pub use types::{Address, Log, LogQuery, H256};

use crate::client::RpcClient;
use crate::config::WatchConfig;
use crate::cursor::BlockCursor;
use crate::engine::{ChainFamily, Engine, ScanScope};
use crate::error::WatchError;
use async_trait::async_trait;
use std::marker::PhantomData;

/// Queries the EVM scanner needs from a client.
#[async_trait]
pub trait EvmRpc: RpcClient {
    /// Latest block height.
    async fn block_number(&self) -> anyhow::Result<u64>;

    /// Logs matching `query`, in chain order.
    async fn get_logs(&self, query: &LogQuery) -> anyhow::Result<Vec<Log>>;
}

/// Log scanning over a set of contract addresses.
pub struct EvmLogs<C> {
    addresses: Vec<Address>,
    _client: PhantomData<fn() -> C>,
}

/// Engine over EVM logs.
pub type EvmEngine<C> = Engine<EvmLogs<C>>;

impl<C: EvmRpc> EvmLogs<C> {
    /// Watch logs emitted by `addresses` (empty: any address).
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
            _client: PhantomData,
        }
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Engine positioned per `deployed_block` / `processed_block`.
    pub fn engine(self, config: WatchConfig) -> EvmEngine<C> {
        let cursor = BlockCursor::from_config(&config);
        Engine::new(self, config, cursor)
    }

    fn is_watched_address(&self, address: &Address) -> bool {
        self.addresses.is_empty() || self.addresses.contains(address)
    }
}

#[async_trait]
impl<C: EvmRpc> ChainFamily for EvmLogs<C> {
    type Client = C;
    type Cursor = BlockCursor;
    type EventId = H256;
    type Event = Log;

    const DEFAULT_WINDOW_LIMIT: u64 = 20;

    fn initial_cursor(&self, config: &WatchConfig) -> Result<BlockCursor, WatchError> {
        Ok(BlockCursor::from_config(config))
    }

    async fn scan_window(
        &self,
        scope: &ScanScope<'_, Self>,
        cursor: &BlockCursor,
    ) -> Result<Option<BlockCursor>, WatchError> {
        let client = scope.client();
        let head = scope.call("eth_blockNumber", client.block_number()).await?;
        let Some(window) = cursor.next_window(head, scope.window_limit()) else {
            tracing::trace!(head, last = cursor.last_processed_block, "caught up");
            return Ok(None);
        };

        let filter = scope.filter().await;
        if !filter.is_watching() {
            tracing::debug!(from = window.from, to = window.to, "no watched events, skipping window");
            return Ok(Some(BlockCursor::new(window.to)));
        }

        let query = LogQuery {
            addresses: self.addresses.clone(),
            from_block: window.from,
            to_block: window.to,
            topics: filter,
        };
        let logs = scope.call("eth_getLogs", client.get_logs(&query)).await?;

        let mut dispatched = 0usize;
        for log in logs {
            if log.removed {
                continue;
            }
            let Some(id) = log.event_id() else {
                continue;
            };
            // Nodes are not trusted to have applied the filter.
            if !self.is_watched_address(&log.address) || !query.topics.matches(&log.topics) {
                tracing::trace!(tx = %log.transaction_hash, "log outside filter");
                continue;
            }
            scope.dispatch(&id, log).await?;
            dispatched += 1;
        }
        tracing::debug!(
            from = window.from,
            to = window.to,
            head,
            dispatched,
            "window processed"
        );
        Ok(Some(BlockCursor::new(window.to)))
    }
}
