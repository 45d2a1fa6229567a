//! Vision model for artwork embeddings

use ort::session::Session;
use std::path::Path;

use crate::config::VisionProfile;
use crate::core::Embedding;
use crate::error::{Error, Result};
use crate::processing::Tensor;
use crate::runtime::{create_session, SessionOptions};

/// Runs a forward pass over a preprocessed tensor and returns the raw feature vector.
///
/// Takes `&mut self`: a handle serves one inference at a time.
pub trait FeatureExtractor: Send {
	fn extract(&mut self, tensor: Tensor) -> Result<Vec<f32>>;
}

pub struct OnnxExtractor {
	session: Session,
	input_name: String,
	output_name: Option<String>,
}

impl OnnxExtractor {
	pub fn load(model_path: &Path, profile: &VisionProfile, options: SessionOptions) -> Result<Self> {
		let session = create_session(model_path, options)?;
		Ok(Self {
			session,
			input_name: profile.input_name.clone(),
			output_name: profile.output_name.clone(),
		})
	}
}

impl FeatureExtractor for OnnxExtractor {
	fn extract(&mut self, tensor: Tensor) -> Result<Vec<f32>> {
		let input = ort::value::Tensor::from_array(tensor.into_parts())?;
		let outputs = self.session.run(ort::inputs![self.input_name.as_str() => input])?;

		let (shape, data): (Vec<usize>, Vec<f32>) = match &self.output_name {
			Some(name) => {
				let value = outputs
					.get(name.as_str())
					.ok_or_else(|| Error::Inference(format!("model has no output named '{}'", name)))?;
				let (shape, data) = value.try_extract_tensor::<f32>()?;
				(shape.iter().map(|&x| x as usize).collect(), data.to_vec())
			}
			None => {
				let (_, value) = outputs
					.iter()
					.next()
					.ok_or_else(|| Error::Inference("model produced no outputs".to_string()))?;
				let (shape, data) = value.try_extract_tensor::<f32>()?;
				(shape.iter().map(|&x| x as usize).collect(), data.to_vec())
			}
		};

		Ok(pool(&data, &shape))
	}
}

/// Collapse `[1, n, dim]` patch outputs by mean; pass everything else through flat.
fn pool(data: &[f32], dims: &[usize]) -> Vec<f32> {
	match dims {
		[1, n, dim] if *n > 0 => {
			let mut pooled = vec![0.0; *dim];
			for i in 0..*n {
				let start = i * dim;
				for (j, val) in pooled.iter_mut().enumerate() {
					*val += data[start + j];
				}
			}
			pooled.iter_mut().for_each(|v| *v /= *n as f32);
			pooled
		}
		_ => data.to_vec(),
	}
}

/// Embedding extractor with a fixed output contract.
pub struct EmbeddingModel<E: FeatureExtractor = OnnxExtractor> {
	extractor: E,
	dim: usize,
	produces_normalized_output: bool,
}

impl EmbeddingModel<OnnxExtractor> {
	pub fn load(model_path: &Path, profile: &VisionProfile, options: SessionOptions) -> Result<Self> {
		let extractor = OnnxExtractor::load(model_path, profile, options)?;
		crate::ui::debug(&format!(
			"Vision model ready ({}-d, {:?}, normalized in graph: {})",
			profile.embedding_dim, profile.layout, profile.produces_normalized_output
		));
		Ok(Self::with_extractor(extractor, profile))
	}
}

impl<E: FeatureExtractor> EmbeddingModel<E> {
	pub fn with_extractor(extractor: E, profile: &VisionProfile) -> Self {
		Self {
			extractor,
			dim: profile.embedding_dim,
			produces_normalized_output: profile.produces_normalized_output,
		}
	}

	pub fn dim(&self) -> usize {
		self.dim
	}

	pub fn produces_normalized_output(&self) -> bool {
		self.produces_normalized_output
	}

	/// Forward pass; the result always has `dim()` entries and, unless the
	/// input was degenerate, unit length.
	pub fn infer(&mut self, tensor: Tensor) -> Result<Embedding> {
		let raw = self.extractor.extract(tensor)?;

		if raw.len() != self.dim {
			return Err(Error::DimensionMismatch { expected: self.dim, actual: raw.len() });
		}
		if raw.iter().any(|v| !v.is_finite()) {
			return Err(Error::Inference("model produced non-finite values".to_string()));
		}

		let embedding = Embedding::new(raw);
		if self.produces_normalized_output {
			Ok(embedding)
		} else {
			Ok(embedding.normalized())
		}
	}
}
