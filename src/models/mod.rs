//! # Model Wrappers
//!
//! Vision embedding extractor, the optional subject detector and the
//! on-device language model session.

pub mod detector;
pub mod llm;
pub mod vision;

pub use detector::Detector;
pub use vision::{EmbeddingModel, FeatureExtractor, OnnxExtractor};
