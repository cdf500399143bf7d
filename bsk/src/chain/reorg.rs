//! Reorganisation resolution against an authoritative block source.
//!
//! The ring itself never talks to the network; this walk drives it from the
//! tip downwards and truncates exactly once, at the highest height where the
//! local and authoritative chains agree.

use crate::chain::ring::{BlockchainRing, LightBlock};
use crate::error::ChainError;
use async_trait::async_trait;
use tracing::{debug, info};

/// The minimal network-provider surface the core consumes. A block the
/// provider could not verify (e.g. a merkle mismatch) is reported as `None`,
/// never as an error.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn block_by_height(&self, height: u64) -> Result<Option<LightBlock>, ChainError>;
    async fn block_by_hash(&self, hash: &str) -> Result<Option<LightBlock>, ChainError>;
}

/// Walks from the ring's tip towards its head comparing against the
/// authoritative chain. Truncates the ring to the highest matching height
/// and returns the rolled-back blocks, oldest-first. When the divergence
/// covers everything the ring retains, the ring is cleared.
pub async fn resolve_reorg(
    ring: &mut BlockchainRing,
    source: &dyn BlockSource,
) -> Result<Vec<LightBlock>, ChainError> {
    let mut stale: Vec<LightBlock> = Vec::new();
    let (Some(head), Some(tail)) = (ring.head(), ring.tail()) else {
        return Ok(stale);
    };
    let head_height = head.height;
    let mut height = tail.height;

    loop {
        let Some(local) = ring.find_by_height(height).cloned() else {
            break;
        };
        let authoritative = source.block_by_height(height).await?;
        let matches = authoritative.as_ref().is_some_and(|network| {
            network.hash == local.hash
                && network.previous_block_hash == local.previous_block_hash
        });
        if matches {
            ring.truncate_to(height as i64);
            info!(
                height,
                rolled_back = stale.len(),
                "reorganisation resolved"
            );
            return Ok(stale);
        }
        debug!(height, hash = %local.hash, "local block diverges from the network");
        stale.insert(0, local);
        if height == head_height || height == 0 {
            break;
        }
        height -= 1;
    }

    ring.clear();
    Ok(stale)
}
