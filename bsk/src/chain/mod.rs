//! Chain-tracking primitives: the bounded in-order block ring, merkle root
//! verification for candidate blocks, and reorganisation resolution against
//! an authoritative block source.

pub mod merkle;
pub mod reorg;
pub mod ring;
pub mod source;

pub use merkle::{compute_merkle_root, verify_merkle_root, verify_witness_commitment};
pub use reorg::{resolve_reorg, BlockSource};
pub use ring::{BlockchainRing, LightBlock};
pub use source::{CandidateBlock, CandidateSource, VerifyingSource};
