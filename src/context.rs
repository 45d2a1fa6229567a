//! Explicitly constructed application context
//!
//! Holds the catalog index and the recognition pipeline between
//! `initialize` and `shutdown`. Nothing here is global.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::core::ArtworkMetadata;
use crate::error::{Error, Result};
use crate::models::{Detector, EmbeddingModel};
use crate::pipeline::RecognitionPipeline;
use crate::processing::ImagePreprocessor;
use crate::runtime::SessionOptions;
use crate::search::SimilarityIndex;
use crate::storage::Catalog;
use crate::ui;

pub struct Docent {
	config: Config,
	index: Option<Arc<SimilarityIndex>>,
	pipeline: Option<RecognitionPipeline>,
}

impl Docent {
	pub fn new(config: Config) -> Self {
		Self { config, index: None, pipeline: None }
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Load the catalog and the vision model. A missing or broken catalog
	/// leaves an empty index; a missing model is an error.
	pub fn initialize(&mut self, options: SessionOptions) -> Result<()> {
		if self.is_ready() {
			return Ok(());
		}
		let start = Instant::now();

		let index = Arc::new(self.load_index());
		if index.is_empty() {
			ui::warn("Catalog is empty, nothing can be recognized");
		}

		let model_path = self
			.config
			.vision_model_path()
			.ok_or_else(|| Error::model_load(&self.config.vision.model_file, "models directory not found"))?;
		let model = EmbeddingModel::load(&model_path, &self.config.vision, options)?;

		let mut pipeline = RecognitionPipeline::new(
			ImagePreprocessor::from_profile(&self.config.vision),
			model,
			index.clone(),
			self.config.threshold,
		)?;

		if self.config.crop_subject {
			pipeline = self.attach_detector(pipeline, options);
		}

		ui::debug(&format!(
			"Ready: {} artworks, {}-d {:?} index in {:.2}s",
			index.len(),
			self.config.vision.embedding_dim,
			index.metric(),
			start.elapsed().as_secs_f32()
		));

		self.index = Some(index);
		self.pipeline = Some(pipeline);
		Ok(())
	}

	/// Release the model and catalog. Safe to call more than once.
	pub fn shutdown(&mut self) {
		if self.pipeline.take().is_some() {
			ui::debug("Vision model released");
		}
		self.index = None;
	}

	pub fn is_ready(&self) -> bool {
		self.pipeline.is_some()
	}

	pub fn pipeline(&mut self) -> Result<&mut RecognitionPipeline> {
		self.pipeline
			.as_mut()
			.ok_or_else(|| Error::SessionState("context not initialized".to_string()))
	}

	pub fn index(&self) -> Option<&SimilarityIndex> {
		self.index.as_deref()
	}

	pub fn artwork(&self, id: &str) -> Option<ArtworkMetadata> {
		self.index()?.get(id).and_then(|r| r.metadata.clone())
	}

	/// Catalog as stored on disk, without building an index.
	pub fn load_catalog(&self) -> Catalog {
		match self.config.catalog_dir() {
			Some(dir) => Catalog::load_dir(&dir),
			None => {
				ui::warn("No catalog directory found");
				Catalog::default()
			}
		}
	}

	fn load_index(&self) -> SimilarityIndex {
		SimilarityIndex::from_catalog(self.load_catalog(), self.config.metric)
	}

	fn attach_detector(&self, pipeline: RecognitionPipeline, options: SessionOptions) -> RecognitionPipeline {
		let Some(path) = self.config.detector_model_path() else {
			return pipeline;
		};
		match Detector::load(&path, options) {
			Ok(detector) => pipeline.with_detector(detector),
			Err(e) => {
				ui::warn(&format!("Subject crop disabled: {}", e));
				pipeline
			}
		}
	}
}

impl Drop for Docent {
	fn drop(&mut self) {
		self.shutdown();
	}
}

