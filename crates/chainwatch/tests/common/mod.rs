//! Common helpers for integration tests: scripted in-memory chains, clients,
//! dialers and probes.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chainwatch::evm::{Address, EvmRpc, Log, LogQuery, H256};
use chainwatch::solana::{Pubkey, Signature, SolanaRpc, TransactionDetail};
use chainwatch::{Dialer, HealthProbe, PoolConfig, RpcClient};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Pool config for tests: the background loop never fires, passes are driven
/// with `check_health()`.
pub fn manual_pool_config(failure_tolerance: u32) -> PoolConfig {
    PoolConfig {
        check_interval_ms: 3_600_000,
        failure_tolerance,
        probe_timeout_ms: 100,
        drain_poll_interval_ms: 5,
        drain_grace_ms: 2_000,
        close_deadline_ms: 500,
    }
}

pub fn endpoint(n: usize) -> String {
    format!("mem://node-{n}")
}

// ---------------------------------------------------------------------------
// EVM

/// Scripted EVM chain shared by every client dialed against it.
#[derive(Default)]
pub struct EvmChain {
    head: AtomicU64,
    logs: Mutex<Vec<Log>>,
    /// Number of upcoming `eth_getLogs` calls that fail.
    fail_get_logs: AtomicU32,
    queries: Mutex<Vec<(u64, u64)>>,
}

impl EvmChain {
    pub fn new(head: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.head.store(head, Ordering::SeqCst);
        Arc::new(chain)
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn fail_next_get_logs(&self, n: u32) {
        self.fail_get_logs.store(n, Ordering::SeqCst);
    }

    /// `(from, to)` of every `eth_getLogs` call so far.
    pub fn queries(&self) -> Vec<(u64, u64)> {
        self.queries.lock().unwrap().clone()
    }
}

pub struct MockEvmClient {
    url: String,
    chain_id: u64,
    chain: Arc<EvmChain>,
    closed: AtomicBool,
}

impl MockEvmClient {
    pub fn new(url: &str, chain_id: u64, chain: Arc<EvmChain>) -> Self {
        Self {
            url: url.to_string(),
            chain_id,
            chain,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            anyhow::bail!("client {} is closed", self.url);
        }
        Ok(())
    }
}

impl RpcClient for MockEvmClient {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn raw_url(&self) -> &str {
        &self.url
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl EvmRpc for MockEvmClient {
    async fn block_number(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.chain.head.load(Ordering::SeqCst))
    }

    /// Applies the block range and addresses only; topic filtering is left to the scanner.
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>> {
        self.ensure_open()?;
        self.chain
            .queries
            .lock()
            .unwrap()
            .push((query.from_block, query.to_block));
        let pending = self.chain.fail_get_logs.load(Ordering::SeqCst);
        if pending > 0 {
            self.chain.fail_get_logs.store(pending - 1, Ordering::SeqCst);
            anyhow::bail!("scripted getLogs failure");
        }
        Ok(self
            .chain
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.block_number >= query.from_block && l.block_number <= query.to_block)
            .filter(|l| query.addresses.is_empty() || query.addresses.contains(&l.address))
            .cloned()
            .collect())
    }
}

pub fn contract() -> Address {
    Address([0xc0; 20])
}

pub fn topic(n: u8) -> H256 {
    H256([n; 32])
}

pub fn log_at(block: u64, log_index: u64, topics: Vec<H256>) -> Log {
    Log {
        address: contract(),
        topics,
        data: vec![],
        block_number: block,
        transaction_hash: H256([block as u8; 32]),
        log_index,
        removed: false,
    }
}

// ---------------------------------------------------------------------------
// Dialing and probing

/// Dials [MockEvmClient]s. Per-URL chain ids and reachability are scriptable.
pub struct MockDialer {
    chain: Arc<EvmChain>,
    default_chain_id: u64,
    chain_ids: Mutex<HashMap<String, u64>>,
    unreachable: Mutex<HashSet<String>>,
    dials: AtomicUsize,
    /// Every client ever dialed, to check they get closed.
    dialed: Mutex<Vec<Arc<MockEvmClient>>>,
}

impl MockDialer {
    pub fn new(chain: Arc<EvmChain>, chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            chain,
            default_chain_id: chain_id,
            chain_ids: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            dials: AtomicUsize::new(0),
            dialed: Mutex::new(Vec::new()),
        })
    }

    pub fn set_chain_id(&self, url: &str, chain_id: u64) {
        self.chain_ids.lock().unwrap().insert(url.to_string(), chain_id);
    }

    pub fn set_reachable(&self, url: &str, reachable: bool) {
        let mut set = self.unreachable.lock().unwrap();
        if reachable {
            set.remove(url);
        } else {
            set.insert(url.to_string());
        }
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn dialed(&self) -> Vec<Arc<MockEvmClient>> {
        self.dialed.lock().unwrap().clone()
    }
}

/// Shares one [MockDialer] between the pool and the test.
pub struct SharedDialer(pub Arc<MockDialer>);

/// The pool owns its clients, so the dialer hands out thin views over a shared one.
pub struct DialedClient(pub Arc<MockEvmClient>);

impl RpcClient for DialedClient {
    fn close(&self) {
        self.0.close();
    }

    fn raw_url(&self) -> &str {
        self.0.raw_url()
    }

    fn chain_id(&self) -> u64 {
        self.0.chain_id()
    }
}

#[async_trait]
impl EvmRpc for DialedClient {
    async fn block_number(&self) -> Result<u64> {
        self.0.block_number().await
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>> {
        self.0.get_logs(query).await
    }
}

#[async_trait]
impl Dialer<DialedClient> for SharedDialer {
    async fn dial(&self, url: &str) -> Result<DialedClient> {
        let d = &self.0;
        d.dials.fetch_add(1, Ordering::SeqCst);
        if d.unreachable.lock().unwrap().contains(url) {
            anyhow::bail!("connection refused: {url}");
        }
        let chain_id = d
            .chain_ids
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(d.default_chain_id);
        let client = Arc::new(MockEvmClient::new(url, chain_id, Arc::clone(&d.chain)));
        d.dialed.lock().unwrap().push(Arc::clone(&client));
        Ok(DialedClient(client))
    }
}

/// Probe answering from a per-URL health map (healthy unless marked otherwise).
#[derive(Clone, Default)]
pub struct ScriptedProbe {
    down: Arc<Mutex<HashSet<String>>>,
    probes: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_healthy(&self, url: &str, healthy: bool) {
        let mut down = self.down.lock().unwrap();
        if healthy {
            down.remove(url);
        } else {
            down.insert(url.to_string());
        }
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, url: &str) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        !self.down.lock().unwrap().contains(url)
    }
}

// ---------------------------------------------------------------------------
// Solana

/// Scripted program history, oldest signature first.
#[derive(Default)]
pub struct SolanaChain {
    signatures: Mutex<Vec<Signature>>,
    transactions: Mutex<HashMap<Signature, TransactionDetail>>,
    failing: Mutex<HashSet<Signature>>,
    fetched: Mutex<Vec<Signature>>,
    pages: AtomicUsize,
    /// Zero-based `getSignaturesForAddress` call that fails.
    failing_page: Mutex<Option<usize>>,
}

impl SolanaChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_tx(&self, signature: Signature, slot: u64, logs: Vec<String>) {
        self.signatures.lock().unwrap().push(signature);
        self.transactions.lock().unwrap().insert(
            signature,
            TransactionDetail {
                signature,
                slot,
                log_messages: logs,
            },
        );
    }

    pub fn fail_tx(&self, signature: Signature, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(signature);
        } else {
            set.remove(&signature);
        }
    }

    /// Signatures passed to `getTransaction`, in call order.
    pub fn fetched(&self) -> Vec<Signature> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn page_count(&self) -> usize {
        self.pages.load(Ordering::SeqCst)
    }

    /// Make the `n`th `getSignaturesForAddress` call (zero-based) fail.
    pub fn fail_page(&self, n: usize) {
        *self.failing_page.lock().unwrap() = Some(n);
    }
}

pub struct MockSolanaClient {
    chain: Arc<SolanaChain>,
    chain_id: u64,
}

impl MockSolanaClient {
    pub fn new(chain: Arc<SolanaChain>, chain_id: u64) -> Self {
        Self { chain, chain_id }
    }
}

impl RpcClient for MockSolanaClient {
    fn close(&self) {}

    fn raw_url(&self) -> &str {
        "mem://solana"
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl SolanaRpc for MockSolanaClient {
    async fn signatures_for_address(
        &self,
        _address: &Pubkey,
        until: Option<&Signature>,
        before: Option<&Signature>,
        limit: usize,
    ) -> Result<Vec<Signature>> {
        let page = self.chain.pages.fetch_add(1, Ordering::SeqCst);
        if *self.chain.failing_page.lock().unwrap() == Some(page) {
            anyhow::bail!("scripted getSignaturesForAddress failure");
        }
        let all = self.chain.signatures.lock().unwrap().clone();
        let start = match until {
            Some(u) => all.iter().position(|s| s == u).map_or(0, |i| i + 1),
            None => 0,
        };
        let end = match before {
            Some(b) => all.iter().position(|s| s == b).unwrap_or(all.len()),
            None => all.len(),
        };
        let window = if start < end { &all[start..end] } else { &[][..] };
        Ok(window.iter().rev().take(limit).copied().collect())
    }

    async fn transaction(&self, signature: &Signature) -> Result<TransactionDetail> {
        self.chain.fetched.lock().unwrap().push(*signature);
        if self.chain.failing.lock().unwrap().contains(signature) {
            anyhow::bail!("scripted getTransaction failure");
        }
        self.chain
            .transactions
            .lock()
            .unwrap()
            .get(signature)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("transaction {signature} not found"))
    }
}

pub fn sig(n: u16) -> Signature {
    let mut bytes = [1u8; 64];
    bytes[..2].copy_from_slice(&n.to_be_bytes());
    Signature(bytes)
}
