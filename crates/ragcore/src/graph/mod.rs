//! Agentic reasoning graph: plan → retrieve → compress →
//! critique → refine ↺ → synthesize, bounded by `MAX_ITERS`.

pub mod compressor;
pub mod executor;
pub mod nodes;

pub use executor::{GraphExecutor, GraphObserver};
pub use nodes::GraphContext;
