//! Endpoint health probes.
//!
//! [HttpProbe] is a generic reachability check (plain GET, success status within
//! the timeout). It approximates liveness: an RPC server that rejects bare GETs
//! looks unhealthy and a web server that is up but not serving RPC looks
//! healthy. [JsonRpcProbe] issues a real JSON-RPC call instead.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Judges one endpoint reachable or not.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str) -> bool;
}

fn probe_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .pool_max_idle_per_host(1)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(reason = %e, "probe client builder failed, using defaults");
            reqwest::Client::new()
        })
}

/// Generic reachability probe. Owns its connection pool.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: probe_client(timeout),
            timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str) -> bool {
        match tokio::time::timeout(self.timeout, self.client.get(url).send()).await {
            Ok(Ok(resp)) => resp.status().is_success(),
            Ok(Err(e)) => {
                tracing::debug!(url, reason = %e, "probe request failed");
                false
            }
            Err(_) => {
                tracing::debug!(url, "probe timed out");
                false
            }
        }
    }
}

/// Protocol-aware probe: POSTs a parameterless JSON-RPC method and requires a `result`.
#[derive(Debug, Clone)]
pub struct JsonRpcProbe {
    client: reqwest::Client,
    timeout: Duration,
    method: String,
}

impl JsonRpcProbe {
    pub fn new(method: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: probe_client(timeout),
            timeout,
            method: method.into(),
        }
    }

    /// `eth_blockNumber` liveness check.
    pub fn evm(timeout: Duration) -> Self {
        Self::new("eth_blockNumber", timeout)
    }

    /// `getHealth` liveness check.
    pub fn solana(timeout: Duration) -> Self {
        Self::new("getHealth", timeout)
    }

    async fn call(&self, url: &str) -> anyhow::Result<bool> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": self.method,
            "params": []
        });
        let resp = self.client.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        let v: Value = resp.json().await?;
        Ok(v.get("error").is_none() && v.get("result").is_some())
    }
}

#[async_trait]
impl HealthProbe for JsonRpcProbe {
    async fn probe(&self, url: &str) -> bool {
        match tokio::time::timeout(self.timeout, self.call(url)).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => {
                tracing::debug!(url, method = %self.method, reason = %e, "probe call failed");
                false
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn http_probe_requires_success_status() {
        let mut server = Server::new_async().await;
        let ok = server.mock("GET", "/").with_status(200).create_async().await;
        let probe = HttpProbe::new(Duration::from_secs(1));
        assert!(probe.probe(&server.url()).await);
        ok.assert_async().await;

        let mut down = Server::new_async().await;
        down.mock("GET", "/").with_status(503).create_async().await;
        assert!(!probe.probe(&down.url()).await);
    }

    #[tokio::test]
    async fn http_probe_unreachable_is_unhealthy() {
        let probe = HttpProbe::new(Duration::from_millis(300));
        assert!(!probe.probe("http://127.0.0.1:1").await);
    }

    #[tokio::test]
    async fn json_rpc_probe_checks_result() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJson(json!({"method": "eth_blockNumber"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#)
            .create_async()
            .await;
        assert!(JsonRpcProbe::evm(Duration::from_secs(1)).probe(&server.url()).await);

        let mut failing = Server::new_async().await;
        failing
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#)
            .create_async()
            .await;
        assert!(!JsonRpcProbe::evm(Duration::from_secs(1)).probe(&failing.url()).await);
    }
}
