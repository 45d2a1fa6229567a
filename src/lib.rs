//! # Docent Library
//!
//! On-device artwork recognition: letterboxed preprocessing, an ONNX
//! embedding model and a similarity index over a reference catalog, plus a
//! streaming language-model session for questions about the recognized work.

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod runtime;
pub mod search;
pub mod storage;
pub mod ui;

pub use context::Docent;
pub use error::{Error, ErrorKind, Result};
pub use pipeline::{Recognition, RecognitionPipeline, Stage};
