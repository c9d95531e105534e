//! Capability every pooled RPC client exposes, and the factory that dials one.
//!
//! Chain-specific query methods live on the family traits ([crate::evm::EvmRpc],
//! [crate::solana::SolanaRpc]); the pool only needs what is declared here.

use async_trait::async_trait;
use std::future::Future;

/// Minimal contract of a live RPC connection.
pub trait RpcClient: Send + Sync + 'static {
    /// Release the underlying connection. Calls made afterwards should fail.
    fn close(&self);

    /// Endpoint URL this client was dialed with.
    fn raw_url(&self) -> &str;

    /// Chain id reported by the endpoint at dial time.
    fn chain_id(&self) -> u64;
}

/// Dials a client for one endpoint URL.
///
/// Implemented for any `Fn(String) -> impl Future<Output = anyhow::Result<C>>`, so
/// `HttpEvmClient::dial` can be passed as-is.
#[async_trait]
pub trait Dialer<C>: Send + Sync {
    async fn dial(&self, url: &str) -> anyhow::Result<C>;
}

#[async_trait]
impl<C, F, Fut> Dialer<C> for F
where
    C: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<C>> + Send,
{
    async fn dial(&self, url: &str) -> anyhow::Result<C> {
        (self)(url.to_string()).await
    }
}
