//! Event ids of the token standards, plus helpers for custom events.
//!
//! An event id is `keccak256` of the canonical signature, e.g.
//! `Transfer(address,address,uint256)`.

use super::types::H256;
use sha3::{Digest, Keccak256};

const TRANSFER: &str = "Transfer(address,address,uint256)";
const APPROVAL: &str = "Approval(address,address,uint256)";
const APPROVAL_FOR_ALL: &str = "ApprovalForAll(address,address,bool)";

/// Event id of an arbitrary signature.
pub fn custom_event(signature: &str) -> H256 {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(signature.as_bytes()));
    H256(out)
}

/// ERC-20 events.
pub mod erc20 {
    use super::*;

    pub fn transfer() -> H256 {
        custom_event(TRANSFER)
    }

    pub fn approval() -> H256 {
        custom_event(APPROVAL)
    }

    pub fn events() -> [H256; 2] {
        [transfer(), approval()]
    }
}

/// ERC-721 events. `Transfer` and `Approval` share their ids with ERC-20; the
/// token id is indexed, so the topic count differs.
pub mod erc721 {
    use super::*;

    pub fn transfer() -> H256 {
        custom_event(TRANSFER)
    }

    pub fn approval() -> H256 {
        custom_event(APPROVAL)
    }

    pub fn approval_for_all() -> H256 {
        custom_event(APPROVAL_FOR_ALL)
    }

    pub fn events() -> [H256; 3] {
        [transfer(), approval(), approval_for_all()]
    }
}

/// Name of a known standard event.
pub fn event_name(id: &H256) -> Option<&'static str> {
    [
        ("Transfer", TRANSFER),
        ("Approval", APPROVAL),
        ("ApprovalForAll", APPROVAL_FOR_ALL),
    ]
    .into_iter()
    .find(|(_, sig)| custom_event(sig) == *id)
    .map(|(name, _)| name)
}
