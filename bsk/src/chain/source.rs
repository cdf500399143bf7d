//! Verification gate between the raw network provider and the chain ring.
//!
//! Candidate blocks are checked against their declared merkle root (and
//! witness commitment, when the provider hands over verbose transactions)
//! before anything downstream sees them. A block that fails verification is
//! reported as absent, never as an error: the append path only ever sees
//! `None`.

use crate::chain::merkle::{verify_merkle_root, verify_witness_commitment, BlockTransaction};
use crate::chain::reorg::BlockSource;
use crate::chain::ring::LightBlock;
use crate::error::ChainError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A block as the network provider hands it over, before verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateBlock {
    #[serde(with = "bsk_messages::ser::u64_string")]
    pub height: u64,
    pub hash: String,
    pub previous_block_hash: String,
    pub merkleroot: String,
    #[serde(default)]
    pub tx: Vec<String>,
    /// Verbose transactions, when the provider supports them; enables the
    /// witness commitment check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<BlockTransaction>>,
}

impl CandidateBlock {
    /// Verifies the candidate and strips it down to a [`LightBlock`].
    /// Returns `None` on any mismatch.
    pub fn into_light(self) -> Option<LightBlock> {
        if !verify_merkle_root(self.height, &self.merkleroot, &self.tx) {
            debug!(height = self.height, hash = %self.hash, "merkle root mismatch, treating block as absent");
            return None;
        }
        if let Some(transactions) = &self.transactions {
            if !verify_witness_commitment(transactions) {
                debug!(height = self.height, hash = %self.hash, "witness commitment mismatch, treating block as absent");
                return None;
            }
        }
        Some(LightBlock {
            height: self.height,
            hash: self.hash,
            previous_block_hash: self.previous_block_hash,
            tx: self.tx,
        })
    }
}

/// The raw provider surface, pre-verification.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidate_by_height(&self, height: u64)
        -> Result<Option<CandidateBlock>, ChainError>;
    async fn candidate_by_hash(&self, hash: &str) -> Result<Option<CandidateBlock>, ChainError>;
}

/// Wraps a raw provider into a [`BlockSource`] that only surfaces verified
/// blocks.
pub struct VerifyingSource<S> {
    inner: S,
}

impl<S> VerifyingSource<S> {
    pub fn new(inner: S) -> Self {
        VerifyingSource { inner }
    }
}

#[async_trait]
impl<S: CandidateSource> BlockSource for VerifyingSource<S> {
    async fn block_by_height(&self, height: u64) -> Result<Option<LightBlock>, ChainError> {
        Ok(self
            .inner
            .candidate_by_height(height)
            .await?
            .and_then(CandidateBlock::into_light))
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<LightBlock>, ChainError> {
        Ok(self
            .inner
            .candidate_by_hash(hash)
            .await?
            .and_then(CandidateBlock::into_light))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const GENESIS_COINBASE: &str =
        "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
    const GENESIS_HASH: &str = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";

    fn genesis_candidate(merkleroot: &str) -> CandidateBlock {
        CandidateBlock {
            height: 0,
            hash: GENESIS_HASH.to_string(),
            previous_block_hash: String::new(),
            merkleroot: merkleroot.to_string(),
            tx: vec![GENESIS_COINBASE.to_string()],
            transactions: None,
        }
    }

    struct MapProvider {
        blocks: HashMap<u64, CandidateBlock>,
    }

    #[async_trait]
    impl CandidateSource for MapProvider {
        async fn candidate_by_height(
            &self,
            height: u64,
        ) -> Result<Option<CandidateBlock>, ChainError> {
            Ok(self.blocks.get(&height).cloned())
        }

        async fn candidate_by_hash(
            &self,
            hash: &str,
        ) -> Result<Option<CandidateBlock>, ChainError> {
            Ok(self
                .blocks
                .values()
                .find(|candidate| candidate.hash == hash)
                .cloned())
        }
    }

    #[tokio::test]
    async fn verified_candidate_becomes_a_light_block() {
        let mut blocks = HashMap::new();
        blocks.insert(0, genesis_candidate(GENESIS_COINBASE));
        let source = VerifyingSource::new(MapProvider { blocks });

        let block = source.block_by_height(0).await.unwrap().unwrap();
        assert_eq!(block.hash, GENESIS_HASH);
        assert_eq!(block.tx, vec![GENESIS_COINBASE.to_string()]);
    }

    #[tokio::test]
    async fn merkle_mismatch_is_reported_as_absent_not_as_an_error() {
        let mut blocks = HashMap::new();
        blocks.insert(0, genesis_candidate(&"00".repeat(32)));
        let source = VerifyingSource::new(MapProvider { blocks });

        assert!(source.block_by_height(0).await.unwrap().is_none());
        assert!(source
            .block_by_hash(GENESIS_HASH)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn missing_candidate_stays_absent() {
        let source = VerifyingSource::new(MapProvider {
            blocks: HashMap::new(),
        });
        assert!(source.block_by_height(7).await.unwrap().is_none());
    }

    #[test]
    fn candidate_decodes_from_provider_json() {
        let raw = format!(
            "{{\"height\":\"0\",\"hash\":\"{}\",\"previousBlockHash\":\"\",\"merkleroot\":\"{}\",\"tx\":[\"{}\"]}}",
            GENESIS_HASH, GENESIS_COINBASE, GENESIS_COINBASE
        );
        let candidate: CandidateBlock = serde_json::from_str(&raw).unwrap();
        assert_eq!(candidate.height, 0);
        assert!(candidate.into_light().is_some());
    }
}
