//! JSON-RPC HTTP client for Solana nodes.

use super::{Pubkey, Signature, SolanaRpc, TransactionDetail};
use crate::client::RpcClient;
use crate::jsonrpc::JsonRpcHttp;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Solana JSON-RPC client. Solana has no chain-id call, so the caller assigns one.
pub struct HttpSolanaClient {
    rpc: JsonRpcHttp,
    chain_id: u64,
}

impl HttpSolanaClient {
    pub fn new(url: impl Into<String>, chain_id: u64) -> Result<Self> {
        Ok(Self {
            rpc: JsonRpcHttp::new(url, CALL_TIMEOUT)?,
            chain_id,
        })
    }

    /// Dialer for a pool whose endpoints all serve `chain_id`.
    pub fn dialer(
        chain_id: u64,
    ) -> impl Fn(String) -> std::future::Ready<Result<Self>> + Send + Sync + 'static {
        move |url| std::future::ready(Self::new(url, chain_id))
    }
}

impl RpcClient for HttpSolanaClient {
    fn close(&self) {
        self.rpc.close();
    }

    fn raw_url(&self) -> &str {
        self.rpc.url()
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl SolanaRpc for HttpSolanaClient {
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        until: Option<&Signature>,
        before: Option<&Signature>,
        limit: usize,
    ) -> Result<Vec<Signature>> {
        let mut opts = Map::new();
        opts.insert("commitment".into(), json!("finalized"));
        opts.insert("limit".into(), json!(limit));
        if let Some(until) = until {
            opts.insert("until".into(), json!(until.to_string()));
        }
        if let Some(before) = before {
            opts.insert("before".into(), json!(before.to_string()));
        }
        let result = self
            .rpc
            .call(
                "getSignaturesForAddress",
                json!([address.to_string(), Value::Object(opts)]),
            )
            .await?;
        result
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("signatures not array"))?
            .iter()
            .map(|entry| {
                entry
                    .get("signature")
                    .and_then(|s| s.as_str())
                    .ok_or_else(|| anyhow::anyhow!("Missing signature"))?
                    .parse()
            })
            .collect()
    }

    async fn transaction(&self, signature: &Signature) -> Result<TransactionDetail> {
        let result = self
            .rpc
            .call(
                "getTransaction",
                json!([
                    signature.to_string(),
                    {
                        "encoding": "json",
                        "commitment": "finalized",
                        "maxSupportedTransactionVersion": 0
                    }
                ]),
            )
            .await?;
        if result.is_null() {
            anyhow::bail!("transaction {} not found", signature);
        }
        let slot = result
            .get("slot")
            .and_then(|s| s.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Missing slot"))?;
        let meta = result
            .get("meta")
            .filter(|m| !m.is_null())
            .with_context(|| format!("transaction {} has no meta", signature))?;
        let log_messages = meta
            .get("logMessages")
            .and_then(|l| l.as_array())
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(|l| l.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(TransactionDetail {
            signature: *signature,
            slot,
            log_messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn sig(n: u8) -> Signature {
        Signature([n; 64])
    }

    #[tokio::test]
    async fn signatures_request_carries_bounds() {
        let mut server = Server::new_async().await;
        let program = Pubkey([3; 32]);
        let m = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "getSignaturesForAddress",
                "params": [program.to_string(), {
                    "commitment": "finalized",
                    "limit": 10,
                    "until": sig(1).to_string()
                }]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "result": [
                    {"signature": sig(9).to_string(), "slot": 9, "err": null},
                    {"signature": sig(8).to_string(), "slot": 8, "err": null}
                ]})
                .to_string(),
            )
            .create_async()
            .await;
        let client = HttpSolanaClient::new(server.url(), 900).unwrap();
        let got = client
            .signatures_for_address(&program, Some(&sig(1)), None, 10)
            .await
            .unwrap();
        assert_eq!(got, vec![sig(9), sig(8)]);
        assert_eq!(client.chain_id(), 900);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn transaction_reads_slot_and_logs() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "getTransaction"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "result": {
                    "slot": 321,
                    "meta": {"err": null, "logMessages": ["Program data: AQID"]}
                }})
                .to_string(),
            )
            .create_async()
            .await;
        let client = HttpSolanaClient::new(server.url(), 900).unwrap();
        let tx = client.transaction(&sig(4)).await.unwrap();
        assert_eq!(tx.slot, 321);
        assert_eq!(tx.log_messages, vec!["Program data: AQID".to_string()]);
    }

    #[tokio::test]
    async fn missing_transaction_is_an_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .create_async()
            .await;
        let client = HttpSolanaClient::new(server.url(), 900).unwrap();
        assert!(client.transaction(&sig(4)).await.is_err());
    }

    #[tokio::test]
    async fn dialer_assigns_chain_id() {
        let dial = HttpSolanaClient::dialer(77);
        let client = dial("http://127.0.0.1:1".to_string()).await.unwrap();
        assert_eq!(client.chain_id(), 77);
        client.close();
        assert!(client.transaction(&sig(1)).await.is_err());
    }
}
