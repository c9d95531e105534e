//! Incremental scanning engine.
//!
//! An [Engine] owns a cursor, a [TopicFilter] and a hook registry behind one
//! `RwLock`. [Engine::scan] borrows a client from a [ClientPool], lets the
//! [ChainFamily] fetch and dispatch one bounded window, and advances the cursor
//! only when every hook in that window succeeded. A failed scan leaves the
//! cursor untouched, so the next call replays the whole window: hooks see each
//! event at least once and must tolerate replays.
//!
//! Dispatch holds the registry's read lock while a hook runs. Hooks must not
//! register hooks or filters on the engine that is calling them.

use crate::client::RpcClient;
use crate::config::{ContractMeta, WatchConfig};
use crate::error::WatchError;
use crate::filter::TopicFilter;
use crate::pool::{ClientPool, PooledClient};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// Handler invoked for a matched event.
pub type EventHook<C, E> =
    Arc<dyn Fn(Arc<C>, E) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A chain family: how to fetch one window of activity and what its cursor,
/// event ids and event payloads look like.
#[async_trait]
pub trait ChainFamily: Send + Sync + Sized + 'static {
    type Client: RpcClient;
    type Cursor: Clone + PartialEq + fmt::Debug + Send + Sync;
    type EventId: Clone + Eq + Hash + fmt::Debug + Send + Sync;
    type Event: Send + 'static;

    /// Window size used when the config leaves it unset.
    const DEFAULT_WINDOW_LIMIT: u64;

    /// Starting cursor for a fresh engine.
    fn initial_cursor(&self, config: &WatchConfig) -> Result<Self::Cursor, WatchError>;

    /// Fetch the activity after `cursor` (at most one window), dispatch every
    /// match through `scope`, and return the cursor to commit. `Ok(None)` means
    /// there was nothing new. Must return on the first dispatch error.
    async fn scan_window(
        &self,
        scope: &ScanScope<'_, Self>,
        cursor: &Self::Cursor,
    ) -> Result<Option<Self::Cursor>, WatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    NotStarted = 0,
    Running = 1,
    Closed = 2,
}

impl EngineState {
    fn from_u8(n: u8) -> Self {
        match n {
            0 => EngineState::NotStarted,
            1 => EngineState::Running,
            _ => EngineState::Closed,
        }
    }
}

struct Registry<F: ChainFamily> {
    cursor: F::Cursor,
    filter: TopicFilter<F::EventId>,
    hooks: HashMap<F::EventId, EventHook<F::Client, F::Event>>,
}

/// What a [ChainFamily] may do during one scan.
pub struct ScanScope<'a, F: ChainFamily> {
    engine: &'a Engine<F>,
    client: &'a PooledClient<F::Client>,
}

impl<'a, F: ChainFamily> ScanScope<'a, F> {
    /// Client borrowed for this scan.
    pub fn client(&self) -> &F::Client {
        self.client
    }

    /// Max blocks or signatures per window.
    pub fn window_limit(&self) -> u64 {
        self.engine.window_limit
    }

    /// Filter as of the last completed registration.
    pub async fn filter(&self) -> TopicFilter<F::EventId> {
        self.engine.state.read().await.filter.clone()
    }

    /// Run an RPC call with the configured timeout; fails fast once the engine closes.
    pub async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = anyhow::Result<T>> + Send,
    ) -> Result<T, WatchError> {
        let after = self.engine.config.rpc_timeout();
        tokio::select! {
            res = tokio::time::timeout(after, fut) => match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(WatchError::upstream(op, e)),
                Err(_) => Err(WatchError::Timeout { op, after }),
            },
            _ = self.engine.done() => Err(WatchError::AlreadyClosed),
        }
    }

    /// Dispatch one event through the engine's hook registry.
    pub async fn dispatch(&self, id: &F::EventId, event: F::Event) -> Result<(), WatchError> {
        self.engine
            .handle_event(Arc::clone(self.client.client()), id, event)
            .await
    }
}

/// Scanning engine generic over a [ChainFamily].
pub struct Engine<F: ChainFamily> {
    family: F,
    config: WatchConfig,
    window_limit: u64,
    state: RwLock<Registry<F>>,
    lifecycle: AtomicU8,
    shutdown: watch::Sender<bool>,
}

impl<F: ChainFamily> Engine<F> {
    pub fn new(family: F, config: WatchConfig, cursor: F::Cursor) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            window_limit: config.window_limit_or(F::DEFAULT_WINDOW_LIMIT),
            family,
            config,
            state: RwLock::new(Registry {
                cursor,
                filter: TopicFilter::default(),
                hooks: HashMap::new(),
            }),
            lifecycle: AtomicU8::new(EngineState::NotStarted as u8),
            shutdown,
        }
    }

    /// Engine positioned at the family's initial cursor for `config`.
    pub fn from_config(family: F, config: WatchConfig) -> Result<Self, WatchError> {
        let cursor = family.initial_cursor(&config)?;
        Ok(Self::new(family, config, cursor))
    }

    pub fn family(&self) -> &F {
        &self.family
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn meta(&self) -> &ContractMeta {
        &self.config.meta
    }

    pub fn window_limit(&self) -> u64 {
        self.window_limit
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.lifecycle.load(Ordering::SeqCst))
    }

    /// Move `NotStarted` to `Running`. `scan` does this on first use.
    pub fn start(&self) -> Result<(), WatchError> {
        match self.lifecycle.compare_exchange(
            EngineState::NotStarted as u8,
            EngineState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                tracing::info!(chain = %self.config.chain, name = %self.config.meta.name, "engine started");
                Ok(())
            }
            Err(s) if EngineState::from_u8(s) == EngineState::Running => Ok(()),
            Err(_) => Err(WatchError::AlreadyClosed),
        }
    }

    /// Enter the terminal `Closed` state and wake every waiter. Idempotent.
    pub fn close(&self) -> Result<(), WatchError> {
        let prev = self
            .lifecycle
            .swap(EngineState::Closed as u8, Ordering::SeqCst);
        if EngineState::from_u8(prev) != EngineState::Closed {
            self.shutdown.send_replace(true);
            tracing::info!(chain = %self.config.chain, name = %self.config.meta.name, "engine closed");
        }
        Ok(())
    }

    /// Resolves once the engine is closed.
    pub async fn done(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn ensure_open(&self) -> Result<(), WatchError> {
        if self.state() == EngineState::Closed {
            return Err(WatchError::AlreadyClosed);
        }
        Ok(())
    }

    /// Add event ids to slot 0 of the filter. Refused while running with a
    /// non-empty slot 0, so an in-flight query never races a filter edit.
    pub async fn register_watched_events(
        &self,
        ids: impl IntoIterator<Item = F::EventId>,
    ) -> Result<(), WatchError> {
        let mut reg = self.state.write().await;
        self.ensure_open()?;
        if self.state() == EngineState::Running && reg.filter.is_watching() {
            return Err(WatchError::AlreadyRunning);
        }
        reg.filter.add(0, ids)
    }

    /// Add values to a filter slot (`0..=3`). Slot 0 follows the rules of
    /// [Engine::register_watched_events].
    pub async fn register_filter_values(
        &self,
        slot: usize,
        values: impl IntoIterator<Item = F::EventId>,
    ) -> Result<(), WatchError> {
        if slot == 0 {
            return self.register_watched_events(values).await;
        }
        let mut reg = self.state.write().await;
        self.ensure_open()?;
        reg.filter.add(slot, values)
    }

    /// Register the handler for one event id, replacing any previous one.
    pub async fn register_hook<H, Fut>(&self, id: F::EventId, hook: H) -> Result<(), WatchError>
    where
        H: Fn(Arc<F::Client>, F::Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: EventHook<F::Client, F::Event> =
            Arc::new(move |client, event| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(hook(client, event))
            });
        let mut reg = self.state.write().await;
        self.ensure_open()?;
        reg.hooks.insert(id, boxed);
        Ok(())
    }

    /// Run the hook registered for `id`. Unknown ids are dropped silently.
    pub async fn handle_event(
        &self,
        client: Arc<F::Client>,
        id: &F::EventId,
        event: F::Event,
    ) -> Result<(), WatchError> {
        if self.state() != EngineState::Running {
            return Err(WatchError::NotRunning);
        }
        let reg = self.state.read().await;
        let Some(hook) = reg.hooks.get(id) else {
            return Ok(());
        };
        hook(client, event).await.map_err(|e| WatchError::HookFailed {
            event: format!("{:?}", id),
            source: e.into(),
        })
    }

    /// Overwrite the cursor, e.g. to restore a persisted position. Only
    /// before the first scan: once running, the cursor only moves by commits.
    pub async fn update_cursor(&self, cursor: F::Cursor) -> Result<(), WatchError> {
        let mut reg = self.state.write().await;
        match self.state() {
            EngineState::NotStarted => {
                tracing::debug!(from = ?reg.cursor, to = ?cursor, "cursor reset");
                reg.cursor = cursor;
                Ok(())
            }
            EngineState::Running => Err(WatchError::AlreadyRunning),
            EngineState::Closed => Err(WatchError::AlreadyClosed),
        }
    }

    pub async fn current_cursor(&self) -> F::Cursor {
        self.state.read().await.cursor.clone()
    }

    /// Process the next window of activity using a client from `pool`.
    pub async fn scan(&self, pool: &ClientPool<F::Client>) -> Result<(), WatchError> {
        self.start()?;
        let client = self.borrow_client(pool).await?;
        let from = self.current_cursor().await;
        let scope = ScanScope {
            engine: self,
            client: &client,
        };
        let next = self.family.scan_window(&scope, &from).await?;
        drop(client);
        match next {
            Some(cursor) => self.commit(&from, cursor).await,
            None => Ok(()),
        }
    }

    async fn borrow_client(
        &self,
        pool: &ClientPool<F::Client>,
    ) -> Result<PooledClient<F::Client>, WatchError> {
        let retries = self.config.client_retries;
        for attempt in 0..=retries {
            if let Some(client) = pool.next_client() {
                return Ok(client);
            }
            if attempt < retries {
                self.pause(self.config.client_retry_delay()).await?;
            }
        }
        Err(WatchError::NoClientAvailable)
    }

    async fn pause(&self, d: Duration) -> Result<(), WatchError> {
        tokio::select! {
            _ = tokio::time::sleep(d) => Ok(()),
            _ = self.done() => Err(WatchError::AlreadyClosed),
        }
    }

    /// Advance from `from` to `to` unless a concurrent scan already moved it.
    async fn commit(&self, from: &F::Cursor, to: F::Cursor) -> Result<(), WatchError> {
        let mut reg = self.state.write().await;
        if reg.cursor != *from {
            tracing::warn!(expected = ?from, current = ?reg.cursor, "cursor moved by a concurrent scan, dropping advance");
            return Ok(());
        }
        tracing::debug!(from = ?from, to = ?to, "cursor advanced");
        reg.cursor = to;
        Ok(())
    }
}
