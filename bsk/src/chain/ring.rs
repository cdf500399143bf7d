//! A bounded, in-order chain of light block descriptors.
//!
//! The ring exclusively owns its nodes; callers hold the ring and query it,
//! never raw node handles. Neighbour links are implicit in the backing
//! `VecDeque` ordering, which keeps ownership acyclic.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A block descriptor stripped to the fields chain tracking needs. `tx` is
/// the ordered list of transaction ids in big-endian hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightBlock {
    #[serde(with = "bsk_messages::ser::u64_string")]
    pub height: u64,
    pub hash: String,
    pub previous_block_hash: String,
    #[serde(default)]
    pub tx: Vec<String>,
}

/// Bounded ordered chain of [`LightBlock`]s. Appending past `max_size`
/// evicts the head (oldest) block.
#[derive(Debug)]
pub struct BlockchainRing {
    blocks: VecDeque<LightBlock>,
    max_size: usize,
}

impl BlockchainRing {
    pub fn new(max_size: usize) -> Self {
        BlockchainRing {
            blocks: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The oldest retained block.
    pub fn head(&self) -> Option<&LightBlock> {
        self.blocks.front()
    }

    /// The newest block.
    pub fn tail(&self) -> Option<&LightBlock> {
        self.blocks.back()
    }

    /// Height of the newest block, `-1` when the ring is empty.
    pub fn last_height(&self) -> i64 {
        self.tail().map(|block| block.height as i64).unwrap_or(-1)
    }

    fn extends_tail(&self, block: &LightBlock) -> bool {
        match self.tail() {
            None => true,
            Some(tail) => {
                block.height == tail.height + 1 && block.previous_block_hash == tail.hash
            }
        }
    }

    /// Appends `block` iff it extends the tail (any block starts an empty
    /// ring). Returns `false` on an adjacency violation with no state
    /// change; evicts the head when the ring is full.
    pub fn add_block(&mut self, block: LightBlock) -> bool {
        if self.max_size == 0 || !self.extends_tail(&block) {
            return false;
        }
        if self.blocks.len() == self.max_size {
            self.blocks.pop_front();
        }
        self.blocks.push_back(block);
        true
    }

    /// All-or-nothing append: on the first violation no block from the call
    /// is kept.
    pub fn add_blocks(&mut self, blocks: Vec<LightBlock>) -> bool {
        if !self.validate_next_blocks(&blocks) {
            return false;
        }
        for block in blocks {
            self.add_block(block);
        }
        true
    }

    /// True iff appending all of `blocks` would succeed without violation.
    pub fn validate_next_blocks(&self, blocks: &[LightBlock]) -> bool {
        if self.max_size == 0 && !blocks.is_empty() {
            return false;
        }
        let mut previous = self.tail();
        for block in blocks {
            if let Some(prev) = previous {
                if block.height != prev.height + 1 || block.previous_block_hash != prev.hash {
                    return false;
                }
            }
            previous = Some(block);
        }
        true
    }

    /// Removes every block with `height > target`. `-1` clears the ring; a
    /// target above the tail is a no-op returning `false`.
    pub fn truncate_to(&mut self, target: i64) -> bool {
        if target == -1 {
            self.blocks.clear();
            return true;
        }
        if target < -1 {
            return false;
        }
        let Some(tail) = self.tail() else {
            return false;
        };
        if target > tail.height as i64 {
            return false;
        }
        while let Some(tail) = self.blocks.back() {
            if tail.height as i64 > target {
                self.blocks.pop_back();
            } else {
                break;
            }
        }
        true
    }

    /// Tail-first walk; callers are expected to query near the tip.
    pub fn find_by_height(&self, height: u64) -> Option<&LightBlock> {
        self.blocks.iter().rev().find(|block| block.height == height)
    }

    /// Re-checks the adjacency invariant end-to-end.
    pub fn validate_chain(&self) -> bool {
        self.blocks
            .iter()
            .zip(self.blocks.iter().skip(1))
            .all(|(a, b)| b.height == a.height + 1 && b.previous_block_hash == a.hash)
    }

    /// Oldest-first view of up to `n` newest blocks.
    pub fn last_n(&self, n: usize) -> Vec<&LightBlock> {
        let skip = self.blocks.len().saturating_sub(n);
        self.blocks.iter().skip(skip).collect()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Lossless snapshot, oldest-first.
    pub fn to_vec(&self) -> Vec<LightBlock> {
        self.blocks.iter().cloned().collect()
    }

    /// Restores a snapshot, keeping the newest `max_size` suffix when the
    /// snapshot is larger than the ring.
    pub fn from_vec(&mut self, blocks: Vec<LightBlock>) {
        self.blocks.clear();
        let skip = blocks.len().saturating_sub(self.max_size);
        self.blocks.extend(blocks.into_iter().skip(skip));
    }
}
