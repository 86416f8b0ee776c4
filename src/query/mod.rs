pub mod embedding;
pub mod traversal;

pub use embedding::{Embedder, FastEmbedder, HashingEmbedder};
pub use traversal::{GraphEdge, GraphNode, NeighborEngine, NeighborQuery, Subgraph};
