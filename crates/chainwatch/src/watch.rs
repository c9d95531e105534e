//! One watched contract or program: a shared [ClientPool] plus an [Engine].

use crate::client::Dialer;
use crate::config::{BackoffConfig, PoolConfig, WatchConfig};
use crate::engine::{ChainFamily, Engine};
use crate::error::WatchError;
use crate::pool::ClientPool;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

pub struct Watch<F: ChainFamily> {
    pool: Arc<ClientPool<F::Client>>,
    engine: Engine<F>,
}

impl<F: ChainFamily> Watch<F> {
    /// Build a dedicated pool over `endpoints`, then an engine for `family`.
    pub async fn connect(
        endpoints: impl IntoIterator<Item = impl Into<String>>,
        dialer: impl Dialer<F::Client> + 'static,
        family: F,
        config: WatchConfig,
    ) -> Result<Self, WatchError> {
        Self::connect_with(endpoints, dialer, PoolConfig::default(), family, config).await
    }

    pub async fn connect_with(
        endpoints: impl IntoIterator<Item = impl Into<String>>,
        dialer: impl Dialer<F::Client> + 'static,
        pool_config: PoolConfig,
        family: F,
        config: WatchConfig,
    ) -> Result<Self, WatchError> {
        let pool = ClientPool::builder()
            .endpoints(endpoints)
            .dialer(dialer)
            .config(pool_config)
            .build()
            .await?;
        if config.chain_id != 0 && config.chain_id != pool.chain_id() {
            let url = pool
                .status()
                .first()
                .map(|s| s.url.clone())
                .unwrap_or_default();
            pool.close().await;
            return Err(WatchError::ChainIdMismatch {
                expected: config.chain_id,
                actual: pool.chain_id(),
                url,
            });
        }
        Self::with_pool(Arc::new(pool), family, config)
    }

    /// Share an existing pool; several watches may scan through one pool.
    pub fn with_pool(
        pool: Arc<ClientPool<F::Client>>,
        family: F,
        config: WatchConfig,
    ) -> Result<Self, WatchError> {
        let engine = Engine::from_config(family, config)?;
        Ok(Self { pool, engine })
    }

    pub fn engine(&self) -> &Engine<F> {
        &self.engine
    }

    pub fn pool(&self) -> &Arc<ClientPool<F::Client>> {
        &self.pool
    }

    /// Process the next window.
    pub async fn scan(&self) -> Result<(), WatchError> {
        self.engine.scan(&self.pool).await
    }

    /// Close the engine, then the pool. A shared pool is closed for every
    /// watch using it.
    pub async fn close(&self) -> Result<(), WatchError> {
        self.engine.close()?;
        self.pool.close().await;
        Ok(())
    }

    /// Scan until the engine is closed. Rescans at once while behind, waits
    /// `poll_interval` once caught up, and backs off with jitter after a failure.
    pub async fn run(&self, backoff: BackoffConfig) -> Result<(), WatchError> {
        let mut failures = 0u32;
        loop {
            let before = self.engine.current_cursor().await;
            let delay = match self.scan().await {
                Ok(()) => {
                    failures = 0;
                    if self.engine.current_cursor().await != before {
                        Duration::ZERO
                    } else {
                        backoff.poll_interval()
                    }
                }
                Err(WatchError::AlreadyClosed) => break,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
                    let delay = backoff.backoff(failures) + jitter;
                    tracing::warn!(reason = %e, failures, retry_in = ?delay, "scan failed, retrying");
                    delay
                }
            };
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.engine.done() => break,
            }
        }
        tracing::info!(chain = %self.engine.config().chain, "watch loop stopped");
        Ok(())
    }
}
