//! Decoder-only ONNX export (`past_key_values.*` in, `present.*` out) run through ort

use ort::session::{Session, SessionInputValue};
use ort::value::Tensor;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;

use super::backend::{CausalLm, LmOptions};
use crate::config::{LANGUAGE_MODEL_CONFIG, TOKENIZER};
use crate::error::{Error, Result};
use crate::runtime::create_session;
use crate::ui;

/// The subset of a Hugging Face `config.json` needed to shape the cache.
#[derive(Debug, Deserialize)]
struct Geometry {
	num_hidden_layers: usize,
	num_attention_heads: usize,
	num_key_value_heads: Option<usize>,
	hidden_size: usize,
	head_dim: Option<usize>,
	max_position_embeddings: Option<usize>,
	eos_token_id: Option<EosIds>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EosIds {
	One(u32),
	Many(Vec<u32>),
}

#[derive(Debug, Clone, Default)]
struct KvLayer {
	key: Vec<f32>,
	value: Vec<f32>,
}

/// Per-layer key/value tensors, each `[1, kv_heads, len, head_dim]`.
#[derive(Debug, Clone)]
pub struct KvCache {
	layers: Vec<KvLayer>,
	len: usize,
}

impl KvCache {
	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}
}

pub struct OnnxCausalLm {
	session: Mutex<Session>,
	tokenizer: Tokenizer,
	layers: usize,
	kv_heads: usize,
	head_dim: usize,
	context_length: usize,
	stop_ids: HashSet<u32>,
}

impl OnnxCausalLm {
	fn kv_shape(&self, len: usize) -> Vec<usize> {
		vec![1, self.kv_heads, len, self.head_dim]
	}

	fn run(&self, cache: &mut KvCache, tokens: &[u32]) -> Result<Vec<f32>> {
		let past = cache.len;
		let n = tokens.len();
		let total = past + n;

		let ids: Vec<i64> = tokens.iter().map(|&t| t as i64).collect();
		let positions: Vec<i64> = (past as i64..total as i64).collect();

		let mut inputs: Vec<(Cow<'static, str>, SessionInputValue<'static>)> =
			Vec::with_capacity(3 + 2 * self.layers);
		inputs.push(("input_ids".into(), Tensor::from_array((vec![1, n], ids))?.into_dyn().into()));
		inputs.push(("attention_mask".into(), Tensor::from_array((vec![1, total], vec![1i64; total]))?.into_dyn().into()));
		inputs.push(("position_ids".into(), Tensor::from_array((vec![1, n], positions))?.into_dyn().into()));

		for (i, layer) in cache.layers.iter_mut().enumerate() {
			let key = std::mem::take(&mut layer.key);
			let value = std::mem::take(&mut layer.value);
			inputs.push((
				format!("past_key_values.{}.key", i).into(),
				Tensor::from_array((self.kv_shape(past), key))?.into_dyn().into(),
			));
			inputs.push((
				format!("past_key_values.{}.value", i).into(),
				Tensor::from_array((self.kv_shape(past), value))?.into_dyn().into(),
			));
		}

		let mut session = self
			.session
			.lock()
			.map_err(|_| Error::Generation("language model session poisoned".to_string()))?;
		let outputs = session.run(inputs)?;

		let logits = outputs
			.get("logits")
			.ok_or_else(|| Error::Inference("model has no 'logits' output".to_string()))?;
		let (shape, data) = logits.try_extract_tensor::<f32>()?;
		let vocab = shape.last().copied().unwrap_or(0) as usize;
		if vocab == 0 || data.len() < n * vocab {
			return Err(Error::Inference(format!("unexpected logits shape {:?}", shape)));
		}
		let last = data[(n - 1) * vocab..n * vocab].to_vec();

		let expected = self.kv_heads * total * self.head_dim;
		for (i, layer) in cache.layers.iter_mut().enumerate() {
			for (suffix, slot) in [("key", &mut layer.key), ("value", &mut layer.value)] {
				let name = format!("present.{}.{}", i, suffix);
				let present = outputs
					.get(name.as_str())
					.ok_or_else(|| Error::Inference(format!("model has no '{}' output", name)))?;
				let (_, data) = present.try_extract_tensor::<f32>()?;
				if data.len() != expected {
					return Err(Error::Inference(format!(
						"'{}' holds {} values, expected {}",
						name,
						data.len(),
						expected
					)));
				}
				*slot = data.to_vec();
			}
		}
		cache.len = total;

		Ok(last)
	}
}

impl CausalLm for OnnxCausalLm {
	type Cache = KvCache;

	/// `path` is the `.onnx` graph; `tokenizer.json` and `config.json` sit beside it.
	fn load(path: &Path, options: &LmOptions) -> Result<Self> {
		let dir = path.parent().unwrap_or_else(|| Path::new("."));

		let geometry_path = dir.join(LANGUAGE_MODEL_CONFIG);
		let geometry: Geometry = std::fs::read_to_string(&geometry_path)
			.map_err(|e| Error::model_load(&geometry_path, e))
			.and_then(|text| serde_json::from_str(&text).map_err(|e| Error::model_load(&geometry_path, e)))?;

		let tokenizer_path = dir.join(TOKENIZER);
		let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| Error::model_load(&tokenizer_path, e))?;

		let session = create_session(path, options.session)?;

		let kv_heads = geometry.num_key_value_heads.unwrap_or(geometry.num_attention_heads);
		let head_dim = geometry
			.head_dim
			.unwrap_or(geometry.hidden_size / geometry.num_attention_heads.max(1));
		let context_length = match geometry.max_position_embeddings {
			Some(max) => options.context_length.min(max),
			None => options.context_length,
		};

		let mut stop_ids: HashSet<u32> = match geometry.eos_token_id {
			Some(EosIds::One(id)) => [id].into_iter().collect(),
			Some(EosIds::Many(ids)) => ids.into_iter().collect(),
			None => HashSet::new(),
		};
		for token in &options.stop_tokens {
			if let Some(id) = tokenizer.token_to_id(token) {
				stop_ids.insert(id);
			}
		}
		if stop_ids.is_empty() {
			ui::warn("Language model has no end-of-sequence token; generation stops only at the token limit");
		}

		ui::debug(&format!(
			"Language model: {} layers, {} kv heads x {} dims, context {}",
			geometry.num_hidden_layers, kv_heads, head_dim, context_length
		));

		Ok(Self {
			session: Mutex::new(session),
			tokenizer,
			layers: geometry.num_hidden_layers,
			kv_heads,
			head_dim,
			context_length,
			stop_ids,
		})
	}

	fn new_cache(&self) -> KvCache {
		KvCache { layers: vec![KvLayer::default(); self.layers], len: 0 }
	}

	fn cache_len(&self, cache: &KvCache) -> usize {
		cache.len
	}

	fn context_length(&self) -> usize {
		self.context_length
	}

	fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
		let encoding = self
			.tokenizer
			.encode(text, false)
			.map_err(|e| Error::Generation(format!("tokenization failed: {}", e)))?;
		Ok(encoding.get_ids().to_vec())
	}

	fn detokenize(&self, tokens: &[u32]) -> Result<String> {
		self.tokenizer
			.decode(tokens, true)
			.map_err(|e| Error::Generation(format!("detokenization failed: {}", e)))
	}

	fn is_end_of_generation(&self, token: u32) -> bool {
		self.stop_ids.contains(&token)
	}

	fn forward(&self, cache: &mut KvCache, tokens: &[u32]) -> Result<Vec<f32>> {
		if tokens.is_empty() {
			return Err(Error::Generation("forward called with no tokens".to_string()));
		}
		if cache.len + tokens.len() > self.context_length {
			return Err(Error::Generation(format!(
				"{} cached + {} new tokens exceed the {}-token context",
				cache.len,
				tokens.len(),
				self.context_length
			)));
		}

		// The past tensors are moved into the run; a failed step leaves nothing reusable.
		self.run(cache, tokens).inspect_err(|_| *cache = self.new_cache())
	}
}
