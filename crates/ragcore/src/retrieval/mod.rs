//! Retrieval layer: hybrid lexical+vector search, MMR diversification, and
//! the two-stage cross-document merger.

pub mod hybrid;
pub mod mmr;
pub mod two_stage;

pub use hybrid::HybridRetriever;
pub use mmr::mmr;
pub use two_stage::two_stage_retrieve;
