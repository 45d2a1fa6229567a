//! Catalog storage: reference vectors and artwork metadata on disk

pub mod catalog;

pub use catalog::{Catalog, CatalogFormat, ConsistencyReport};
