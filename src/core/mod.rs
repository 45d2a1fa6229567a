//! Core domain types

pub mod artwork;
pub mod embedding;
pub mod image;

pub use artwork::{ArtworkMetadata, ArtworkRecord};
pub use embedding::{cosine_similarity, dot, l2_norm, Embedding};
pub use image::RawImage;
