//! Photo → preprocess → embed → search, with an explicit stage for each step

use std::sync::Arc;

use crate::core::{Embedding, RawImage};
use crate::error::{Error, ErrorKind, Result};
use crate::models::{Detector, EmbeddingModel, FeatureExtractor, OnnxExtractor};
use crate::processing::{ImagePreprocessor, Letterbox};
use crate::search::{MatchResult, ScoredMatch, SimilarityIndex};
use crate::ui;

/// Where the last `recognize` call got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	Idle,
	Preprocessing,
	Embedding,
	Searching,
	Matched,
	NoMatch,
	Failed(ErrorKind),
}

impl Stage {
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Matched | Self::NoMatch | Self::Failed(_))
	}
}

/// Terminal outcome of one recognition request.
#[derive(Debug)]
pub enum Recognition {
	Matched(MatchResult),
	/// Nothing cleared the threshold; `best` is the closest candidate, if any.
	NoMatch { best: Option<ScoredMatch> },
	Failed(Error),
}

impl Recognition {
	pub fn into_match(self) -> Option<MatchResult> {
		match self {
			Self::Matched(found) => Some(found),
			_ => None,
		}
	}

	pub fn error_kind(&self) -> Option<ErrorKind> {
		match self {
			Self::Failed(e) => Some(e.kind()),
			_ => None,
		}
	}
}

/// Owns one embedding model handle, so at most one request runs at a time
/// (`recognize` takes `&mut self`). The index is shared read-only.
pub struct RecognitionPipeline<E: FeatureExtractor = OnnxExtractor> {
	preprocessor: ImagePreprocessor,
	model: EmbeddingModel<E>,
	index: Arc<SimilarityIndex>,
	detector: Option<Detector>,
	threshold: f32,
	stage: Stage,
}

impl<E: FeatureExtractor> RecognitionPipeline<E> {
	/// Fails with [`Error::DimensionMismatch`] when the model can never
	/// produce vectors of the catalog's length.
	pub fn new(
		preprocessor: ImagePreprocessor,
		model: EmbeddingModel<E>,
		index: Arc<SimilarityIndex>,
		threshold: f32,
	) -> Result<Self> {
		index.check_dim(model.dim())?;
		Ok(Self { preprocessor, model, index, detector: None, threshold, stage: Stage::Idle })
	}

	/// Crop to the detected subject before letterboxing.
	pub fn with_detector(mut self, detector: Detector) -> Self {
		self.detector = Some(detector);
		self
	}

	pub fn stage(&self) -> Stage {
		self.stage
	}

	pub fn threshold(&self) -> f32 {
		self.threshold
	}

	pub fn set_threshold(&mut self, threshold: f32) {
		self.threshold = threshold;
	}

	pub fn index(&self) -> &SimilarityIndex {
		&self.index
	}

	/// Run the whole pipeline. Never panics; failures are reported as
	/// [`Recognition::Failed`] with the stage left at [`Stage::Failed`].
	pub fn recognize(&mut self, image: &RawImage) -> Recognition {
		self.recognize_ranked(image, 0).0
	}

	/// [`recognize`](Self::recognize) plus the closest `k` catalog entries
	/// regardless of threshold, from the same single inference.
	pub fn recognize_ranked(&mut self, image: &RawImage, k: usize) -> (Recognition, Vec<ScoredMatch>) {
		match self.run(image, k) {
			Ok((Recognition::Matched(found), ranked)) => {
				self.stage = Stage::Matched;
				ui::debug(&format!("Matched '{}' ({:.4})", found.id, found.score));
				(Recognition::Matched(found), ranked)
			}
			Ok((outcome, ranked)) => {
				self.stage = Stage::NoMatch;
				(outcome, ranked)
			}
			Err(e) => {
				ui::debug(&format!("Recognition failed during {:?}: {}", self.stage, e));
				self.stage = Stage::Failed(e.kind());
				(Recognition::Failed(e), Vec::new())
			}
		}
	}

	/// [`recognize`](Self::recognize) as a `Result`.
	pub fn try_recognize(&mut self, image: &RawImage) -> Result<Option<MatchResult>> {
		match self.recognize(image) {
			Recognition::Matched(found) => Ok(Some(found)),
			Recognition::NoMatch { .. } => Ok(None),
			Recognition::Failed(e) => Err(e),
		}
	}

	/// Preprocess and infer only.
	pub fn embed(&mut self, image: &RawImage) -> Result<Embedding> {
		self.stage = Stage::Preprocessing;
		let subject = self.subject(image);
		let tensor = self.preprocessor.preprocess(&subject)?;

		self.stage = Stage::Embedding;
		self.model.infer(tensor)
	}

	/// What the model sees for `image`: the letterboxed canvas.
	pub fn preview(&mut self, image: &RawImage) -> Letterbox {
		let subject = self.subject(image);
		self.preprocessor.letterbox(&subject)
	}

	fn run(&mut self, image: &RawImage, k: usize) -> Result<(Recognition, Vec<ScoredMatch>)> {
		if image.width() == 0 || image.height() == 0 {
			self.stage = Stage::Preprocessing;
			return Err(Error::InvalidImage("image has no pixels".to_string()));
		}
		let embedding = self.embed(image)?;

		self.stage = Stage::Searching;
		if let Some(expected) = self.index.dim() {
			if expected != embedding.dim() {
				return Err(Error::DimensionMismatch { expected, actual: embedding.dim() });
			}
		}

		let mut ranked = self.index.query(embedding.as_slice(), k.max(1));
		let outcome = match self.index.best_match(embedding.as_slice(), self.threshold) {
			Some(found) => Recognition::Matched(found),
			None => Recognition::NoMatch { best: ranked.first().cloned() },
		};
		ranked.truncate(k);
		Ok((outcome, ranked))
	}

	fn subject(&mut self, image: &RawImage) -> RawImage {
		match self.detector.as_mut() {
			Some(detector) => detector.crop_subject(image),
			None => image.clone(),
		}
	}
}
