//! Fusion stages: cluster, fuse, rank.
//!
//! Everything here is synchronous and deterministic: the same set of
//! candidates yields bit-identical output regardless of arrival order.

pub mod cluster;
pub mod fusion;
pub mod pipeline;
pub mod rank;
pub mod types;

pub use cluster::SpatialClusterer;
pub use fusion::FusionEngine;
pub use pipeline::FusionPipeline;
pub use rank::ResultRanker;
pub use types::*;
