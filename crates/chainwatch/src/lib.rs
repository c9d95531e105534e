//! Incremental on-chain event watching.
//!
//! - **ClientPool**: round-robin over RPC endpoints with background health
//!   checks. Unhealthy clients are drained (closed once no borrower holds them)
//!   and redialed when their endpoint recovers, guarded by the chain id.
//! - **Engine**: advances a cursor (block height or transaction signature)
//!   one bounded window at a time, dispatching matching events to hooks. The
//!   cursor only moves after every hook in the window succeeded, so events are
//!   delivered at least once and never skipped.
//! - **Watch**: pool + engine, with a poll loop.
//!
//! Chain families: [evm] (`eth_getLogs` with topic filters) and [solana]
//! (program `Program data:` events).

pub mod client;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod evm;
pub mod filter;
mod jsonrpc;
pub mod pool;
pub mod probe;
pub mod solana;
pub mod watch;

pub use client::{Dialer, RpcClient};
pub use config::{BackoffConfig, ContractMeta, PoolConfig, WatchConfig};
pub use cursor::{BlockCursor, BlockWindow};
pub use engine::{ChainFamily, Engine, EngineState, EventHook, ScanScope};
pub use error::WatchError;
pub use evm::{EvmEngine, EvmLogs, EvmRpc, HttpEvmClient};
pub use filter::{TopicFilter, TOPIC_SLOTS};
pub use pool::{ClientPool, ClientPoolBuilder, EndpointStatus, PooledClient};
pub use probe::{HealthProbe, HttpProbe, JsonRpcProbe};
pub use solana::{HttpSolanaClient, SolanaEngine, SolanaProgram, SolanaRpc};
pub use watch::Watch;
