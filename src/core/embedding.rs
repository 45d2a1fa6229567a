//! Embedding vectors and the similarity math used against them

use crate::config::NORM_EPSILON;

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
	/// Wrap raw model output as-is.
	pub fn new(data: Vec<f32>) -> Self {
		Self(data)
	}

	pub fn as_slice(&self) -> &[f32] {
		&self.0
	}

	pub fn into_vec(self) -> Vec<f32> {
		self.0
	}

	pub fn dim(&self) -> usize {
		self.0.len()
	}

	pub fn norm(&self) -> f32 {
		l2_norm(&self.0)
	}

	pub fn is_normalized(&self, tolerance: f32) -> bool {
		(self.norm() - 1.0).abs() <= tolerance
	}

	/// Scale to unit length. A near-zero vector comes back unchanged rather than
	/// blowing up into NaN/Inf.
	pub fn normalized(&self) -> Self {
		let norm = self.norm();
		if norm < NORM_EPSILON {
			crate::ui::warn(&format!("Embedding norm is ~0 ({:e}); leaving it unnormalized", norm));
			return self.clone();
		}
		Self(self.0.iter().map(|x| x / norm).collect())
	}

	pub fn cosine(&self, other: &Self) -> f32 {
		cosine_similarity(&self.0, &other.0)
	}

	pub fn dot(&self, other: &Self) -> f32 {
		dot(&self.0, &other.0)
	}
}

impl From<Vec<f32>> for Embedding {
	fn from(data: Vec<f32>) -> Self {
		Self(data)
	}
}

pub fn l2_norm(v: &[f32]) -> f32 {
	v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt() as f32
}

/// Plain dot product. Only a similarity when both sides are unit length.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
	debug_assert_eq!(a.len(), b.len());
	a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum::<f64>() as f32
}

/// `a·b / (|a||b|)`, in [-1, 1]. Zero when either side has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
	debug_assert_eq!(a.len(), b.len());
	let mut dot = 0.0f64;
	let mut norm_a = 0.0f64;
	let mut norm_b = 0.0f64;

	for (&x, &y) in a.iter().zip(b) {
		let (x, y) = (x as f64, y as f64);
		dot += x * y;
		norm_a += x * x;
		norm_b += y * y;
	}

	let length = norm_a.sqrt() * norm_b.sqrt();
	if length == 0.0 {
		return 0.0;
	}
	(dot / length).clamp(-1.0, 1.0) as f32
}
