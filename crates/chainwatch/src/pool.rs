//! Health-aware RPC client pool.
//!
//! The pool owns one [Node] per endpoint. A background loop probes every endpoint
//! in parallel on a fixed interval, redials disconnected ones, detaches clients
//! that keep failing and hands them to a drain task. After each pass it publishes
//! an immutable snapshot of usable nodes through `ArcSwap`; [ClientPool::next_client]
//! only ever reads that snapshot, so borrowers never wait on health bookkeeping.
//!
//! Borrowed clients are reference counted per node. A detached client is closed
//! once its node's count drops to zero, or unconditionally after the drain grace.

use crate::client::{Dialer, RpcClient};
use crate::config::PoolConfig;
use crate::error::WatchError;
use crate::probe::{HealthProbe, HttpProbe};
use arc_swap::{ArcSwap, ArcSwapOption};
use futures_util::future::join_all;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant, MissedTickBehavior};

/// Bookkeeping for one endpoint.
struct Node<C> {
    id: usize,
    url: String,
    client: ArcSwapOption<C>,
    failures: AtomicU32,
    last_probe: Mutex<Option<Instant>>,
    refs: AtomicUsize,
    /// Detached client waiting for its borrowers; blocks redial. Whoever takes
    /// it out of the slot closes it.
    draining: ArcSwapOption<C>,
}

impl<C> Node<C> {
    fn new(id: usize, url: String, client: Option<C>) -> Self {
        let connected = client.is_some();
        Self {
            id,
            url,
            client: ArcSwapOption::new(client.map(Arc::new)),
            failures: AtomicU32::new(0),
            last_probe: Mutex::new(connected.then(Instant::now)),
            refs: AtomicUsize::new(0),
            draining: ArcSwapOption::empty(),
        }
    }

    fn touch(&self) {
        if let Ok(mut g) = self.last_probe.lock() {
            *g = Some(Instant::now());
        }
    }

    fn probed_within(&self, window: Duration) -> bool {
        self.last_probe
            .lock()
            .ok()
            .and_then(|g| *g)
            .is_some_and(|t| t.elapsed() < window)
    }

    fn is_usable(&self, tolerance: u32) -> bool {
        self.client.load().is_some() && self.failures.load(Ordering::SeqCst) < tolerance
    }
}

/// Point-in-time view of one endpoint, for logging and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    pub id: usize,
    pub url: String,
    pub connected: bool,
    pub failures: u32,
    pub borrowed: usize,
}

/// A borrowed client. Dropping it releases the borrow.
pub struct PooledClient<C> {
    node: Arc<Node<C>>,
    client: Arc<C>,
}

impl<C> PooledClient<C> {
    /// Shared handle to the client, e.g. to pass into event hooks.
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Id of the endpoint this client belongs to (its index in the endpoint list).
    pub fn endpoint_id(&self) -> usize {
        self.node.id
    }

    pub fn endpoint_url(&self) -> &str {
        &self.node.url
    }
}

impl<C> Deref for PooledClient<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.client
    }
}

impl<C> Drop for PooledClient<C> {
    fn drop(&mut self) {
        self.node.refs.fetch_sub(1, Ordering::SeqCst);
    }
}

struct PoolInner<C> {
    chain_id: u64,
    nodes: Vec<Arc<Node<C>>>,
    snapshot: ArcSwap<Vec<Arc<Node<C>>>>,
    next: AtomicUsize,
    dialer: Box<dyn Dialer<C>>,
    probe: Arc<dyn HealthProbe>,
    config: PoolConfig,
    /// Serializes health passes with each other and with `close`.
    pass_lock: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl<C: RpcClient> PoolInner<C> {
    fn tolerance(&self) -> u32 {
        self.config.failure_tolerance.max(1)
    }

    fn publish(&self) {
        let tolerance = self.tolerance();
        let healthy: Vec<Arc<Node<C>>> = self
            .nodes
            .iter()
            .filter(|n| n.is_usable(tolerance))
            .cloned()
            .collect();
        tracing::debug!(healthy = healthy.len(), total = self.nodes.len(), "snapshot published");
        self.snapshot.store(Arc::new(healthy));
    }

    /// One pass over every node. Scheduled passes skip live nodes probed
    /// within the last half interval; forced passes probe everything.
    async fn check_health(&self, force: bool) {
        let _pass = self.pass_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        join_all(self.nodes.iter().map(|node| self.check_node(node, force))).await;
        self.publish();
    }

    async fn check_node(&self, node: &Arc<Node<C>>, force: bool) {
        if node.client.load().is_none() {
            self.reconnect(node).await;
        } else {
            self.probe_live(node, force).await;
        }
    }

    async fn reconnect(&self, node: &Arc<Node<C>>) {
        if node.draining.load().is_some() {
            tracing::debug!(url = %node.url, "previous client still draining, skipping redial");
            return;
        }
        if !self.probe.probe(&node.url).await {
            return;
        }
        let client = match self.dialer.dial(&node.url).await {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(url = %node.url, reason = %e, "redial failed");
                return;
            }
        };
        if client.chain_id() != self.chain_id {
            let err = WatchError::ChainIdMismatch {
                expected: self.chain_id,
                actual: client.chain_id(),
                url: node.url.clone(),
            };
            tracing::warn!(reason = %err, "rejecting reconnect");
            client.close();
            return;
        }
        if self.closed.load(Ordering::SeqCst) {
            client.close();
            return;
        }
        node.failures.store(0, Ordering::SeqCst);
        node.touch();
        node.client.store(Some(Arc::new(client)));
        tracing::info!(url = %node.url, "endpoint reconnected");
    }

    async fn probe_live(&self, node: &Arc<Node<C>>, force: bool) {
        if !force && node.probed_within(self.config.check_interval() / 2) {
            return;
        }
        if self.probe.probe(&node.url).await {
            node.failures.store(0, Ordering::SeqCst);
            node.touch();
            return;
        }
        let failures = node.failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(url = %node.url, failures, "probe failed");
        if failures < self.tolerance() {
            return;
        }
        if let Some(client) = node.client.swap(None) {
            tracing::warn!(url = %node.url, failures, "endpoint unhealthy, draining client");
            node.draining.store(Some(client));
            tokio::spawn(drain(
                Arc::clone(node),
                self.config.drain_poll_interval(),
                self.config.drain_grace(),
            ));
        }
    }
}

/// Close the node's draining client once nobody borrows it, or after `grace`.
/// Stops early if `close` took the client over.
async fn drain<C: RpcClient>(node: Arc<Node<C>>, poll: Duration, grace: Duration) {
    let deadline = Instant::now() + grace;
    loop {
        if node.draining.load().is_none() {
            return;
        }
        let refs = node.refs.load(Ordering::SeqCst);
        if refs == 0 {
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!(url = %node.url, refs, "drain grace elapsed, closing borrowed client");
            break;
        }
        sleep(poll).await;
    }
    if let Some(client) = node.draining.swap(None) {
        client.close();
        tracing::debug!(url = %node.url, "client drained");
    }
}

async fn health_loop<C: RpcClient>(inner: Arc<PoolInner<C>>, mut shutdown: watch::Receiver<bool>) {
    let period = inner.config.check_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => inner.check_health(false).await,
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
    }
    tracing::debug!("health loop stopped");
}

/// Round-robin pool of RPC clients over a fixed endpoint set.
pub struct ClientPool<C: RpcClient> {
    inner: Arc<PoolInner<C>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: RpcClient> ClientPool<C> {
    pub fn builder() -> ClientPoolBuilder<C> {
        ClientPoolBuilder::new()
    }

    /// Connect with the default probe and config.
    pub async fn connect(
        endpoints: impl IntoIterator<Item = impl Into<String>>,
        dialer: impl Dialer<C> + 'static,
    ) -> Result<Self, WatchError> {
        Self::builder().endpoints(endpoints).dialer(dialer).build().await
    }

    /// Borrow the next healthy client, or `None` if no endpoint is usable.
    pub fn next_client(&self) -> Option<PooledClient<C>> {
        let snapshot = self.inner.snapshot.load();
        let len = snapshot.len();
        if len == 0 {
            return None;
        }
        for _ in 0..len {
            let idx = self.inner.next.fetch_add(1, Ordering::Relaxed) % len;
            let node = &snapshot[idx];
            // Count the borrow before reading the client so a concurrent drain
            // either sees the count or we see the detached slot.
            node.refs.fetch_add(1, Ordering::SeqCst);
            if let Some(client) = node.client.load_full() {
                return Some(PooledClient {
                    node: Arc::clone(node),
                    client,
                });
            }
            node.refs.fetch_sub(1, Ordering::SeqCst);
        }
        None
    }

    /// Give a borrowed client back. Equivalent to dropping it.
    pub fn release_client(&self, client: PooledClient<C>) {
        drop(client);
    }

    /// Chain id fixed by the primary endpoint at construction.
    pub fn chain_id(&self) -> u64 {
        self.inner.chain_id
    }

    /// Number of nodes in the currently published snapshot.
    pub fn healthy_count(&self) -> usize {
        self.inner.snapshot.load().len()
    }

    pub fn endpoint_count(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn status(&self) -> Vec<EndpointStatus> {
        self.inner
            .nodes
            .iter()
            .map(|n| EndpointStatus {
                id: n.id,
                url: n.url.clone(),
                connected: n.client.load().is_some(),
                failures: n.failures.load(Ordering::SeqCst),
                borrowed: n.refs.load(Ordering::SeqCst),
            })
            .collect()
    }

    /// Probe every endpoint now (the background loop keeps its own schedule).
    pub async fn check_health(&self) {
        self.inner.check_health(true).await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop health checks and close every client, waiting for borrowers up to
    /// `close_deadline`. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let deadline = Instant::now() + inner.config.close_deadline();
        inner.shutdown.send_replace(true);
        let task = self.health_task.lock().ok().and_then(|mut g| g.take());
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        let _pass = match timeout(inner.config.close_deadline(), inner.pass_lock.lock()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!("health pass still running at close");
                None
            }
        };
        inner.snapshot.store(Arc::new(Vec::new()));

        // Live clients and those already draining share the same deadline.
        let detached: Vec<(Arc<Node<C>>, Arc<C>)> = inner
            .nodes
            .iter()
            .flat_map(|n| {
                [n.client.swap(None), n.draining.swap(None)]
                    .into_iter()
                    .flatten()
                    .map(move |c| (Arc::clone(n), c))
            })
            .collect();
        let poll = inner.config.drain_poll_interval();
        while detached.iter().any(|(n, _)| n.refs.load(Ordering::SeqCst) > 0) {
            if Instant::now() >= deadline {
                let borrowed = detached
                    .iter()
                    .filter(|(n, _)| n.refs.load(Ordering::SeqCst) > 0)
                    .count();
                tracing::warn!(borrowed, "close deadline elapsed, force closing clients");
                break;
            }
            sleep(poll).await;
        }
        for (_, client) in &detached {
            client.close();
        }
        tracing::info!(closed = detached.len(), "client pool closed");
    }
}

impl<C: RpcClient> Drop for ClientPool<C> {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
        if let Some(task) = self.health_task.get_mut().ok().and_then(Option::take) {
            task.abort();
        }
    }
}

/// Builder for [ClientPool].
pub struct ClientPoolBuilder<C> {
    endpoints: Vec<String>,
    dialer: Option<Box<dyn Dialer<C>>>,
    probe: Option<Arc<dyn HealthProbe>>,
    config: PoolConfig,
}

impl<C: RpcClient> ClientPoolBuilder<C> {
    pub fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            dialer: None,
            probe: None,
            config: PoolConfig::default(),
        }
    }

    /// Endpoint URLs; the first one must dial successfully.
    pub fn endpoints(mut self, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.endpoints = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn dialer(mut self, dialer: impl Dialer<C> + 'static) -> Self {
        self.dialer = Some(Box::new(dialer));
        self
    }

    /// Override the probe (defaults to [HttpProbe] with `probe_timeout`).
    pub fn probe(mut self, probe: impl HealthProbe + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Dial every endpoint, publish the first snapshot and start the health loop.
    pub async fn build(self) -> Result<ClientPool<C>, WatchError> {
        let dialer = self
            .dialer
            .ok_or_else(|| WatchError::InvalidConfig("dialer required".into()))?;
        let mut urls = self.endpoints.into_iter();
        let primary_url = urls
            .next()
            .ok_or_else(|| WatchError::InvalidConfig("at least one endpoint required".into()))?;
        let primary = dialer
            .dial(&primary_url)
            .await
            .map_err(|e| WatchError::upstream("dial primary endpoint", e))?;
        let chain_id = primary.chain_id();

        let mut nodes = vec![Arc::new(Node::new(0, primary_url, Some(primary)))];
        for (i, url) in urls.enumerate() {
            let client = match dialer.dial(&url).await {
                Ok(c) if c.chain_id() == chain_id => Some(c),
                Ok(c) => {
                    tracing::warn!(url = %url, expected = chain_id, actual = c.chain_id(), "chain id mismatch, endpoint starts disconnected");
                    c.close();
                    None
                }
                Err(e) => {
                    tracing::warn!(url = %url, reason = %e, "dial failed, endpoint starts disconnected");
                    None
                }
            };
            nodes.push(Arc::new(Node::new(i + 1, url, client)));
        }

        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(HttpProbe::new(self.config.probe_timeout())));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(PoolInner {
            chain_id,
            snapshot: ArcSwap::from_pointee(Vec::new()),
            nodes,
            next: AtomicUsize::new(0),
            dialer,
            probe,
            config: self.config,
            pass_lock: tokio::sync::Mutex::new(()),
            shutdown,
            closed: AtomicBool::new(false),
        });
        inner.publish();
        tracing::info!(
            chain_id,
            endpoints = inner.nodes.len(),
            healthy = inner.snapshot.load().len(),
            "client pool ready"
        );
        let task = tokio::spawn(health_loop(Arc::clone(&inner), shutdown_rx));
        Ok(ClientPool {
            inner,
            health_task: Mutex::new(Some(task)),
        })
    }
}

impl<C: RpcClient> Default for ClientPoolBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}
