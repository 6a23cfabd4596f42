//! hivegrid node selection.
//!
//! A pure function over a snapshot of the node registry: it never
//! mutates nodes and holds no locks. The registry calls it while holding
//! its own write lock so that selection and reservation are atomic.
//!
//! # Components
//!
//! - **`selector`**: per-node scoring, ranking, and best-node selection

pub mod selector;

pub use selector::{NodeScore, ScoreBreakdown, ScoringWeights, rank_nodes, score_node, select_node};
