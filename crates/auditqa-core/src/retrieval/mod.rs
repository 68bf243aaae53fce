//! Two-stage hybrid retrieval
//!
//! Stage 1 ranks findings, stage 2 ranks chunks restricted to stage-1
//! findings, and the block promoter folds chunks back into finding-level
//! blocks. Both stages share the RRF fusion primitive in [`hybrid`].

pub mod blocks;
pub mod chunks;
pub mod findings;
pub mod hybrid;

pub use blocks::promote_blocks;
pub use chunks::ChunkRetriever;
pub use findings::FindingRetriever;
pub use hybrid::{hybrid_search, rrf_fuse, FusedHit, HybridOutcome, HybridParams};
