//! The boundary between session orchestration and the inference runtime

use std::path::Path;

use crate::config::{DEFAULT_CONTEXT_LENGTH, STOP_TOKENS};
use crate::error::Result;
use crate::runtime::SessionOptions;

#[derive(Debug, Clone)]
pub struct LmOptions {
	pub session: SessionOptions,
	/// Upper bound on prompt + generated tokens.
	pub context_length: usize,
	/// Token strings that end a turn, in addition to the model's own EOS ids.
	pub stop_tokens: Vec<String>,
}

impl Default for LmOptions {
	fn default() -> Self {
		Self {
			session: SessionOptions::default(),
			context_length: DEFAULT_CONTEXT_LENGTH,
			stop_tokens: STOP_TOKENS.iter().map(|s| s.to_string()).collect(),
		}
	}
}

/// A decoder-only language model with an explicit, cloneable attention cache.
///
/// `forward` is `&self` so one loaded model can back several sessions; the
/// mutable decode state lives entirely in `Cache`.
pub trait CausalLm: Send + Sync + Sized + 'static {
	type Cache: Clone + Send + 'static;

	fn load(path: &Path, options: &LmOptions) -> Result<Self>;

	fn new_cache(&self) -> Self::Cache;

	/// Number of positions already held by `cache`.
	fn cache_len(&self, cache: &Self::Cache) -> usize;

	fn context_length(&self) -> usize;

	fn tokenize(&self, text: &str) -> Result<Vec<u32>>;

	fn detokenize(&self, tokens: &[u32]) -> Result<String>;

	fn is_end_of_generation(&self, token: u32) -> bool;

	/// Append `tokens` to `cache` and return the logits for the last position.
	fn forward(&self, cache: &mut Self::Cache, tokens: &[u32]) -> Result<Vec<f32>>;
}
