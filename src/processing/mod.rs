//! # Image Processing
//!
//! Letterboxing, per-channel normalization and tensor layout for the
//! embedding model, plus the optional subject crop that runs before it.

pub mod crop;
pub mod preprocess;

pub use crop::{best_detection, crop_to, Detection};
pub use preprocess::{letterbox, ContentRect, ImagePreprocessor, Layout, Letterbox, Normalization, Tensor};
