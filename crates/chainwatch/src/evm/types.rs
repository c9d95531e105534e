//! EVM value types and their JSON-RPC shapes (`eth_getLogs` filter and log entries).

use crate::filter::TopicFilter;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// 32-byte word: event topic, indexed argument, transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct H256(pub [u8; 32]);

/// 20-byte account / contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl H256 {
    /// Left-pad an address into an indexed topic word.
    pub fn from_address(addr: &Address) -> Self {
        let mut out = [0u8; 32];
        out[12..].copy_from_slice(&addr.0);
        H256(out)
    }
}

impl Address {
    /// Indexed address arguments are 32-byte words; the address is the last 20 bytes.
    pub fn from_topic(topic: &H256) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&topic.0[12..]);
        Address(out)
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for H256 {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_hex_bytes_32(s).map(H256)
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_hex_bytes_20(s).map(Address)
    }
}

/// One raw log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub log_index: u64,
    /// Dropped by a reorg. The JSON decoder already discards such entries;
    /// clients that pass them through set this and the scanner skips them.
    pub removed: bool,
}

impl Log {
    /// Decode a JSON-RPC log object. Reorged entries and pending ones (no
    /// block yet) decode to `None`; nodes may leave their position fields null.
    pub fn from_json(log_value: &Value) -> Result<Option<Self>> {
        let removed = log_value
            .get("removed")
            .and_then(|r| r.as_bool())
            .unwrap_or(false);
        let pending = log_value.get("blockNumber").map_or(true, Value::is_null);
        if removed || pending {
            return Ok(None);
        }
        let str_field = |name: &'static str| {
            log_value
                .get(name)
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("Missing {}", name))
        };
        let address = parse_hex_bytes_20(str_field("address")?).map(Address)?;
        let block_number = parse_hex_u64(str_field("blockNumber")?)?;
        let log_index = parse_hex_u64(str_field("logIndex")?)?;
        let transaction_hash = parse_hex_bytes_32(str_field("transactionHash")?).map(H256)?;
        let data = parse_hex_bytes(str_field("data")?)?;
        let topics = log_value
            .get("topics")
            .and_then(|t| t.as_array())
            .ok_or_else(|| anyhow::anyhow!("Missing topics"))?
            .iter()
            .map(|t| {
                let s = t.as_str().ok_or_else(|| anyhow::anyhow!("topic not str"))?;
                parse_hex_bytes_32(s).map(H256)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Self {
            address,
            topics,
            data,
            block_number,
            transaction_hash,
            log_index,
            removed: false,
        }))
    }

    /// First topic: the event signature hash for non-anonymous events.
    pub fn event_id(&self) -> Option<H256> {
        self.topics.first().copied()
    }
}

/// Parameters of one `eth_getLogs` call.
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub addresses: Vec<Address>,
    pub from_block: u64,
    pub to_block: u64,
    pub topics: TopicFilter<H256>,
}

impl LogQuery {
    /// JSON filter object. Empty slots become `null`; trailing empty slots are
    /// dropped since some nodes reject `[topic0, null, null, null]`.
    pub fn to_json(&self) -> Value {
        let mut filter = json!({
            "fromBlock": format!("0x{:x}", self.from_block),
            "toBlock": format!("0x{:x}", self.to_block),
        });
        match self.addresses.as_slice() {
            [] => {}
            [single] => filter["address"] = Value::String(single.to_string()),
            many => {
                filter["address"] = Value::Array(
                    many.iter().map(|a| Value::String(a.to_string())).collect(),
                )
            }
        }
        let slots = self.topics.slots();
        let used = slots.iter().rposition(|s| !s.is_empty()).map_or(0, |i| i + 1);
        if used > 0 {
            let topics = slots[..used]
                .iter()
                .map(|slot| {
                    if slot.is_empty() {
                        Value::Null
                    } else {
                        Value::Array(slot.iter().map(|t| Value::String(t.to_string())).collect())
                    }
                })
                .collect();
            filter["topics"] = Value::Array(topics);
        }
        filter
    }
}

pub(crate) fn parse_hex_u64(s: &str) -> Result<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).context("parse hex u64")
}

pub(crate) fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).context("parse hex bytes")
}

fn parse_hex_bytes_32(s: &str) -> Result<[u8; 32]> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("Expected 32 bytes, got {}", bytes.len());
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn parse_hex_bytes_20(s: &str) -> Result<[u8; 20]> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() == 20 {
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(out)
    } else if bytes.len() == 32 {
        // Indexed address in EVM is 32 bytes (left-padded); take last 20.
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes[12..32]);
        Ok(out)
    } else {
        anyhow::bail!("Expected 20 or 32 bytes for address, got {}", bytes.len());
    }
}
