//! Solana programs: transaction-signature cursor, `Program data:` log events.
//!
//! The program's finalized signatures newer than the cursor are listed newest
//! first, a bounded number of pages per scan, and kept across scans until the
//! listing reaches the cursor. Scans then walk that backlog oldest-first, one
//! window at a time, and dispatch every base64 `Program data:` payload keyed by
//! its first 8 bytes (the Anchor event discriminator).

pub mod http;

pub use http::HttpSolanaClient;

use crate::client::RpcClient;
use crate::config::{ContractMeta, WatchConfig};
use crate::engine::{ChainFamily, Engine, ScanScope};
use crate::error::WatchError;
use anyhow::Context;
use async_trait::async_trait;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

const PROGRAM_DATA_PREFIX: &str = "Program data: ";

/// Max signatures per `getSignaturesForAddress` page.
pub const SIGNATURE_PAGE_LIMIT: usize = 1000;

macro_rules! base58_bytes {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name([0u8; $len])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&bs58::encode(self.0).into_string())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> anyhow::Result<Self> {
                let bytes = bs58::decode(s)
                    .into_vec()
                    .with_context(|| format!("invalid base58 {}", stringify!($name)))?;
                let arr: [u8; $len] = bytes.try_into().map_err(|v: Vec<u8>| {
                    anyhow::anyhow!("{} must be {} bytes, got {}", stringify!($name), $len, v.len())
                })?;
                Ok($name(arr))
            }
        }
    };
}

base58_bytes!(Pubkey, 32);
base58_bytes!(Signature, 64);

/// First 8 bytes of an event payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Discriminator(pub [u8; 8]);

impl Discriminator {
    /// Anchor discriminator: `sha256("event:" + name)[..8]`.
    pub fn of_event(name: &str) -> Self {
        let digest = Sha256::digest(format!("event:{name}").as_bytes());
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest[..8]);
        Discriminator(out)
    }
}

impl fmt::Debug for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Transaction fields the scanner reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDetail {
    pub signature: Signature,
    pub slot: u64,
    pub log_messages: Vec<String>,
}

/// One decoded `Program data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramEvent {
    pub program_id: Pubkey,
    pub signature: Signature,
    pub slot: u64,
    pub discriminator: Discriminator,
    /// Payload after the discriminator.
    pub data: Vec<u8>,
    /// Position among the transaction's `Program data:` lines.
    pub event_index: usize,
}

/// Queries the Solana scanner needs from a client.
#[async_trait]
pub trait SolanaRpc: RpcClient {
    /// Finalized signatures touching `address`, newest first, strictly newer
    /// than `until` and strictly older than `before` when given.
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        until: Option<&Signature>,
        before: Option<&Signature>,
        limit: usize,
    ) -> anyhow::Result<Vec<Signature>>;

    async fn transaction(&self, signature: &Signature) -> anyhow::Result<TransactionDetail>;
}

/// Decode the `Program data:` payloads of a transaction's logs, in order.
pub fn program_data(logs: &[String]) -> anyhow::Result<Vec<Vec<u8>>> {
    logs.iter()
        .filter_map(|line| line.strip_prefix(PROGRAM_DATA_PREFIX))
        .map(|encoded| {
            base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .context("decode program data")
        })
        .collect()
}

/// Signatures listed after `after`, newest first. `complete` once the
/// listing reached `after`; until then the oldest entry is the `before`
/// boundary the next page resumes from.
#[derive(Debug, Clone)]
struct Backlog {
    after: Signature,
    listed: Vec<Signature>,
    complete: bool,
}

impl Backlog {
    fn new(after: Signature) -> Self {
        Self {
            after,
            listed: Vec::new(),
            complete: false,
        }
    }

    /// Drop what was committed up to `cursor`. A cursor outside the listing,
    /// or a fully consumed listing, starts a fresh one.
    fn rebase(mut self, cursor: &Signature) -> Self {
        if self.after != *cursor {
            let at = self
                .complete
                .then(|| self.listed.iter().rposition(|s| s == cursor))
                .flatten();
            match at {
                Some(i) => {
                    self.listed.truncate(i);
                    self.after = *cursor;
                }
                None => return Backlog::new(*cursor),
            }
        }
        if self.complete && self.listed.is_empty() {
            return Backlog::new(*cursor);
        }
        self
    }

    /// Oldest `limit` listed signatures, once the listing is complete.
    fn window(&self, limit: usize) -> Vec<Signature> {
        if !self.complete {
            return Vec::new();
        }
        self.listed.iter().rev().take(limit).copied().collect()
    }
}

/// Event scanning over one program.
pub struct SolanaProgram<C> {
    program_id: Pubkey,
    start: Signature,
    backlog: Mutex<Backlog>,
    _client: PhantomData<fn() -> C>,
}

/// Engine over Solana program events.
pub type SolanaEngine<C> = Engine<SolanaProgram<C>>;

impl<C: SolanaRpc> SolanaProgram<C> {
    /// `processed` is the last signature already handled; scanning starts
    /// after it. There is no slot-based fallback, so it must be set.
    pub fn new(program_id: Pubkey, processed: Signature) -> Result<Self, WatchError> {
        if processed.is_zero() {
            return Err(WatchError::InvalidConfig(
                "processed signature required: set the earliest transaction signature to start from".into(),
            ));
        }
        Ok(Self {
            program_id,
            start: processed,
            backlog: Mutex::new(Backlog::new(processed)),
            _client: PhantomData,
        })
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Metadata `config` registers for this program (keyed by base58 id).
    pub fn meta<'a>(&self, config: &'a WatchConfig) -> &'a ContractMeta {
        config.contract_meta(&self.program_id.to_string())
    }

    pub fn engine(self, config: WatchConfig) -> SolanaEngine<C> {
        let cursor = self.start;
        Engine::new(self, config, cursor)
    }

    /// Take the stored backlog, rebased onto `cursor`. A concurrent scan
    /// meanwhile sees an empty one and lists on its own.
    fn take_backlog(&self, cursor: &Signature) -> Backlog {
        let mut stored = self.backlog.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *stored, Backlog::new(*cursor)).rebase(cursor)
    }

    fn store_backlog(&self, backlog: Backlog) {
        *self.backlog.lock().unwrap_or_else(PoisonError::into_inner) = backlog;
    }

    /// Extend the listing by at most `ceil(window_limit / page) + 1` pages.
    async fn list_pending(
        &self,
        scope: &ScanScope<'_, Self>,
        backlog: &mut Backlog,
    ) -> Result<(), WatchError> {
        let budget = scope
            .window_limit()
            .div_ceil(SIGNATURE_PAGE_LIMIT as u64)
            .saturating_add(1);
        let mut pages = 0;
        while !backlog.complete && pages < budget {
            let before = backlog.listed.last().copied();
            let page = scope
                .call(
                    "getSignaturesForAddress",
                    scope.client().signatures_for_address(
                        &self.program_id,
                        Some(&backlog.after),
                        before.as_ref(),
                        SIGNATURE_PAGE_LIMIT,
                    ),
                )
                .await?;
            pages += 1;
            backlog.complete = page.len() < SIGNATURE_PAGE_LIMIT;
            backlog.listed.extend(page);
        }
        Ok(())
    }

    async fn handle_transaction(
        &self,
        scope: &ScanScope<'_, Self>,
        signature: &Signature,
    ) -> Result<usize, WatchError> {
        let tx = scope
            .call("getTransaction", scope.client().transaction(signature))
            .await?;
        let payloads = program_data(&tx.log_messages)
            .map_err(|e| WatchError::upstream("getTransaction", e))?;
        let mut dispatched = 0;
        for (event_index, payload) in payloads.into_iter().enumerate() {
            if payload.len() < 8 {
                continue;
            }
            let mut id = [0u8; 8];
            id.copy_from_slice(&payload[..8]);
            let discriminator = Discriminator(id);
            let event = ProgramEvent {
                program_id: self.program_id,
                signature: *signature,
                slot: tx.slot,
                discriminator,
                data: payload[8..].to_vec(),
                event_index,
            };
            scope.dispatch(&discriminator, event).await?;
            dispatched += 1;
        }
        Ok(dispatched)
    }
}

impl<C: SolanaRpc> SolanaEngine<C> {
    /// Metadata of the watched program.
    pub fn program_meta(&self) -> &ContractMeta {
        self.family().meta(self.config())
    }
}

#[async_trait]
impl<C: SolanaRpc> ChainFamily for SolanaProgram<C> {
    type Client = C;
    type Cursor = Signature;
    type EventId = Discriminator;
    type Event = ProgramEvent;

    const DEFAULT_WINDOW_LIMIT: u64 = 1000;

    fn initial_cursor(&self, _config: &WatchConfig) -> Result<Signature, WatchError> {
        Ok(self.start)
    }

    async fn scan_window(
        &self,
        scope: &ScanScope<'_, Self>,
        cursor: &Signature,
    ) -> Result<Option<Signature>, WatchError> {
        let mut backlog = self.take_backlog(cursor);
        let listed = self.list_pending(scope, &mut backlog).await;
        let limit = usize::try_from(scope.window_limit()).unwrap_or(usize::MAX);
        let pending = backlog.window(limit);
        let complete = backlog.complete;
        let backlog_len = backlog.listed.len();
        // Kept on failure too: the next scan resumes from the same boundary.
        self.store_backlog(backlog);
        listed?;
        if !complete {
            tracing::debug!(program = %self.program_id, listed = backlog_len, "listing signature backlog");
            return Ok(None);
        }
        if pending.is_empty() {
            return Ok(None);
        }

        let mut dispatched = 0;
        for signature in &pending {
            dispatched += self.handle_transaction(scope, signature).await?;
        }
        tracing::debug!(
            program = %self.program_id,
            processed = pending.len(),
            backlog = backlog_len,
            dispatched,
            "signatures processed"
        );
        Ok(pending.last().copied())
    }
}
