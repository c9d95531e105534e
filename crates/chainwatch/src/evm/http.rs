//! JSON-RPC HTTP client for EVM nodes (`eth_chainId`, `eth_blockNumber`, `eth_getLogs`).

use super::types::{parse_hex_u64, Log, LogQuery};
use super::EvmRpc;
use crate::client::RpcClient;
use crate::jsonrpc::JsonRpcHttp;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// EVM JSON-RPC client. The chain id is read once when dialing.
pub struct HttpEvmClient {
    rpc: JsonRpcHttp,
    chain_id: u64,
}

impl HttpEvmClient {
    /// Connect to `url` and read its chain id. Usable directly as a pool dialer.
    pub async fn dial(url: String) -> Result<Self> {
        let rpc = JsonRpcHttp::new(url, CALL_TIMEOUT)?;
        let result = tokio::time::timeout(DIAL_TIMEOUT, rpc.call("eth_chainId", json!([])))
            .await
            .map_err(|_| anyhow::anyhow!("eth_chainId timed out dialing {}", rpc.url()))??;
        let chain_id = hex_quantity(&result).context("parse chain id")?;
        tracing::debug!(url = %rpc.url(), chain_id, "dialed evm endpoint");
        Ok(Self { rpc, chain_id })
    }
}

fn hex_quantity(v: &Value) -> Result<u64> {
    let s = v.as_str().ok_or_else(|| anyhow::anyhow!("quantity not string"))?;
    parse_hex_u64(s)
}

impl RpcClient for HttpEvmClient {
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
impl EvmRpc for HttpEvmClient {
    async fn block_number(&self) -> Result<u64> {
        let result = self.rpc.call("eth_blockNumber", json!([])).await?;
        hex_quantity(&result).context("parse block number")
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>> {
        let result = self.rpc.call("eth_getLogs", json!([query.to_json()])).await?;
        let arr = result
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("getLogs not array"))?;
        arr.iter().filter_map(|v| Log::from_json(v).transpose()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::TopicFilter;
    use mockito::{Matcher, Server};

    async fn mock_result(server: &mut Server, method: &str, result: Value) -> mockito::Mock {
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": method })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string())
            .create_async()
            .await
    }

    #[tokio::test]
    async fn dial_reads_chain_id() {
        let mut server = Server::new_async().await;
        let m = mock_result(&mut server, "eth_chainId", json!("0xaa36a7")).await;
        let client = HttpEvmClient::dial(server.url()).await.unwrap();
        assert_eq!(client.chain_id(), 11155111);
        assert_eq!(client.raw_url(), server.url());
        m.assert_async().await;
    }

    #[tokio::test]
    async fn dial_fails_on_rpc_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"down"}}"#)
            .create_async()
            .await;
        assert!(HttpEvmClient::dial(server.url()).await.is_err());
    }

    #[tokio::test]
    async fn block_number_and_logs() {
        let mut server = Server::new_async().await;
        mock_result(&mut server, "eth_chainId", json!("0x1")).await;
        mock_result(&mut server, "eth_blockNumber", json!("0x64")).await;
        let logs = mock_result(
            &mut server,
            "eth_getLogs",
            json!([{
                "address": "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238",
                "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
                "data": "0x",
                "blockNumber": "0x60",
                "transactionHash": "0x0101010101010101010101010101010101010101010101010101010101010101",
                "logIndex": "0x0",
                "removed": false
            }, {
                "address": "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238",
                "topics": [],
                "data": "0x",
                "blockNumber": "0x61",
                "transactionHash": null,
                "logIndex": null,
                "removed": true
            }]),
        )
        .await;
        let client = HttpEvmClient::dial(server.url()).await.unwrap();
        assert_eq!(client.block_number().await.unwrap(), 100);
        let q = LogQuery {
            addresses: vec![],
            from_block: 0x5f,
            to_block: 0x64,
            topics: TopicFilter::new(),
        };
        let got = client.get_logs(&q).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].block_number, 0x60);
        logs.assert_async().await;
    }

    #[tokio::test]
    async fn calls_fail_after_close() {
        let mut server = Server::new_async().await;
        mock_result(&mut server, "eth_chainId", json!("0x1")).await;
        let client = HttpEvmClient::dial(server.url()).await.unwrap();
        client.close();
        assert!(client.block_number().await.is_err());
    }
}
