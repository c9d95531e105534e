//! Block-height cursor (in-memory only; persisting it is up to the caller).
//!
//! The signature cursor of the Solana family is a plain [crate::solana::Signature].

use crate::config::WatchConfig;

/// Cursor: last processed block. In-memory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockCursor {
    pub last_processed_block: u64,
}

/// Inclusive block range handled by one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub from: u64,
    pub to: u64,
}

impl BlockCursor {
    pub fn new(last_processed_block: u64) -> Self {
        Self {
            last_processed_block,
        }
    }

    /// Starting position for a watcher: `processed_block`, but never before the
    /// block preceding the deployment.
    pub fn from_config(config: &WatchConfig) -> Self {
        let before_deploy = config.deployed_block.saturating_sub(1);
        let last = match config.processed_block {
            Some(p) => p.max(before_deploy),
            None => before_deploy,
        };
        Self::new(last)
    }

    /// Next window given the chain head, or `None` when already caught up.
    /// Never wider than `limit` blocks and never past `head`.
    pub fn next_window(&self, head: u64, limit: u64) -> Option<BlockWindow> {
        let from = self.last_processed_block.checked_add(1)?;
        if from > head {
            return None;
        }
        let to = self
            .last_processed_block
            .saturating_add(limit.max(1))
            .min(head);
        Some(BlockWindow { from, to })
    }
}

impl From<u64> for BlockCursor {
    fn from(n: u64) -> Self {
        Self::new(n)
    }
}
