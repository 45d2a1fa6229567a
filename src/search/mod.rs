//! Nearest-neighbour lookup over the artwork catalog

pub mod index;

pub use index::{MatchResult, Metric, ScoredMatch, SimilarityIndex};
