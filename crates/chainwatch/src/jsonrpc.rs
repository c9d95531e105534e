//! Minimal JSON-RPC 2.0 over HTTP, shared by the reference clients.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

pub(crate) struct JsonRpcHttp {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl JsonRpcHttp {
    pub(crate) fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("client for {} is closed", self.url);
        }
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("HTTP request failed")?;
        let resp = resp.error_for_status().context("HTTP status")?;
        let json: Value = resp.json().await.context("parse response")?;
        if let Some(err) = json.get("error") {
            anyhow::bail!("RPC error: {}", err);
        }
        json.get("result")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Missing result"))
    }
}
