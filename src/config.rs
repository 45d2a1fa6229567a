//! Application configuration, model-variant profiles and constants

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::processing::{Layout, Normalization};
use crate::search::Metric;

// === Model Files ===
pub const VISION_MODEL: &str = "art_clip_model.onnx";
pub const DETECTOR_MODEL: &str = "yolov8n.onnx";
pub const LANGUAGE_MODEL_DIR: &str = "llm";
pub const LANGUAGE_MODEL: &str = "model.onnx";
pub const TOKENIZER: &str = "tokenizer.json";
pub const LANGUAGE_MODEL_CONFIG: &str = "config.json";

// === Catalog Files ===
pub const CATALOG_INDEX: &str = "art_index.json";
pub const CATALOG_METADATA: &str = "art_metadata.json";
pub const CATALOG_COMBINED: &str = "art_catalog.msgpack";
pub const CATALOG_COMBINED_JSON: &str = "art_catalog.json";

// === Vision Parameters ===
pub const INPUT_SIZE: u32 = 224;
pub const CLIP_EMBEDDING_DIM: usize = 128;
pub const EFFICIENTNET_EMBEDDING_DIM: usize = 1280;
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Norms below this are treated as zero and left unnormalized.
pub const NORM_EPSILON: f32 = 1e-8;

// === Detector Parameters ===
pub const DETECTOR_INPUT_SIZE: u32 = 640;
pub const DETECTOR_MIN_CONFIDENCE: f32 = 0.25;

// === Search Defaults ===
pub const DEFAULT_THRESHOLD: f32 = 0.6;
pub const DEFAULT_TOP_K: usize = 5;

// === Generation Defaults ===
pub const DEFAULT_MAX_NEW_TOKENS: usize = 512;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_TOKEN_CHANNEL: usize = 64;
pub const DEFAULT_CONTEXT_LENGTH: usize = 2048;
pub const STOP_TOKENS: &[&str] = &["<|im_end|>", "<|endoftext|>"];

/// Input/output contract of one embedding model variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionProfile {
	pub model_file: String,
	pub input_size: u32,
	pub embedding_dim: usize,
	pub normalization: Normalization,
	pub layout: Layout,
	/// The graph already L2-normalizes its output.
	pub produces_normalized_output: bool,
	pub input_name: String,
	/// Output tensor name; the first output is used when unset.
	pub output_name: Option<String>,
}

impl VisionProfile {
	/// CLIP-style extractor: mean/std normalization, planar input, 128-d raw output.
	pub fn clip() -> Self {
		Self {
			model_file: VISION_MODEL.to_string(),
			input_size: INPUT_SIZE,
			embedding_dim: CLIP_EMBEDDING_DIM,
			normalization: Normalization::MeanStd { mean: CLIP_MEAN, std: CLIP_STD },
			layout: Layout::Chw,
			produces_normalized_output: false,
			input_name: "pixel_values".to_string(),
			output_name: None,
		}
	}

	/// EfficientNet-style extractor: `v/127.5 - 1`, interleaved input, normalized in-graph.
	pub fn efficientnet() -> Self {
		Self {
			model_file: "art_efficientnet.onnx".to_string(),
			input_size: INPUT_SIZE,
			embedding_dim: EFFICIENTNET_EMBEDDING_DIM,
			normalization: Normalization::symmetric(),
			layout: Layout::Hwc,
			produces_normalized_output: true,
			input_name: "input".to_string(),
			output_name: None,
		}
	}
}

impl Default for VisionProfile {
	fn default() -> Self {
		Self::clip()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
	pub max_new_tokens: usize,
	pub temperature: f32,
	pub top_k: usize,
	pub top_p: f32,
	pub seed: u64,
	pub timeout_secs: u64,
	/// Reject generation until the system prompt has been decoded and cached.
	pub require_system_prompt: bool,
	pub token_channel_capacity: usize,
}

impl GenerationConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}
}

impl Default for GenerationConfig {
	fn default() -> Self {
		Self {
			max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
			temperature: 0.7,
			top_k: 40,
			top_p: 0.9,
			seed: DEFAULT_SEED,
			timeout_secs: DEFAULT_TIMEOUT_SECS,
			require_system_prompt: true,
			token_channel_capacity: DEFAULT_TOKEN_CHANNEL,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub models_dir: Option<PathBuf>,
	pub catalog_dir: Option<PathBuf>,
	pub vision: VisionProfile,
	pub metric: Metric,
	pub threshold: f32,
	pub top_k: usize,
	pub crop_subject: bool,
	pub intra_threads: usize,
	pub generation: GenerationConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			models_dir: None,
			catalog_dir: None,
			vision: VisionProfile::default(),
			metric: Metric::Cosine,
			threshold: DEFAULT_THRESHOLD,
			top_k: DEFAULT_TOP_K,
			crop_subject: false,
			intra_threads: 4,
			generation: GenerationConfig::default(),
		}
	}
}

impl Config {
	/// Load from an explicit path, `DOCENT_CONFIG`, or fall back to defaults.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let path = match path {
			Some(p) => Some(p.to_path_buf()),
			None => std::env::var_os("DOCENT_CONFIG").map(PathBuf::from),
		};

		let Some(path) = path else {
			return Ok(Self::default());
		};

		crate::ui::debug(&format!("Reading config: {}", path.display()));
		let text = std::fs::read_to_string(&path)?;
		let config: Self =
			serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		if self.vision.input_size == 0 || self.vision.embedding_dim == 0 {
			return Err(invalid("vision profile needs a non-zero input size and embedding dimension"));
		}
		if !(-1.0..=1.0).contains(&self.threshold) && self.metric == Metric::Cosine {
			return Err(invalid(&format!("cosine threshold {} outside [-1, 1]", self.threshold)));
		}
		if self.generation.token_channel_capacity == 0 {
			return Err(invalid("token channel capacity must be at least 1"));
		}
		Ok(())
	}

	/// Models directory: config → `DOCENT_MODELS_DIR` → `models/` beside the executable.
	pub fn models_dir(&self) -> Option<PathBuf> {
		if let Some(custom) = &self.models_dir {
			crate::ui::debug(&format!("Using configured model dir: {}", custom.display()));
			return Some(custom.clone());
		}

		if let Ok(env_path) = std::env::var("DOCENT_MODELS_DIR") {
			let path = PathBuf::from(&env_path);
			if path.is_dir() {
				crate::ui::debug(&format!("Using DOCENT_MODELS_DIR: {}", env_path));
				return Some(path);
			}
		}

		if let Ok(exe) = std::env::current_exe() {
			if let Some(dir) = exe.parent() {
				let models = dir.join("models");
				if models.is_dir() {
					crate::ui::debug(&format!("Found models at: {}", models.display()));
					return Some(models);
				}
			}
		}

		None
	}

	/// Catalog directory defaults to the models directory.
	pub fn catalog_dir(&self) -> Option<PathBuf> {
		self.catalog_dir.clone().or_else(|| self.models_dir())
	}

	pub fn vision_model_path(&self) -> Option<PathBuf> {
		self.models_dir().map(|d| d.join(&self.vision.model_file))
	}

	pub fn detector_model_path(&self) -> Option<PathBuf> {
		self.models_dir().map(|d| d.join(DETECTOR_MODEL))
	}

	pub fn language_model_path(&self) -> Option<PathBuf> {
		self.models_dir().map(|d| d.join(LANGUAGE_MODEL_DIR).join(LANGUAGE_MODEL))
	}
}

fn invalid(msg: &str) -> Error {
	Error::Config(msg.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ErrorKind;

	#[test]
	fn defaults_round_trip_through_json() {
		let config = Config::default();
		let text = serde_json::to_string(&config).unwrap();
		let back: Config = serde_json::from_str(&text).unwrap();
		assert_eq!(config, back);
	}

	#[test]
	fn partial_file_keeps_defaults() {
		let config: Config = serde_json::from_str(r#"{ "threshold": 0.45, "vision": { "layout": "hwc" } }"#).unwrap();
		assert_eq!(config.threshold, 0.45);
		assert_eq!(config.vision.layout, Layout::Hwc);
		assert_eq!(config.vision.embedding_dim, CLIP_EMBEDDING_DIM);
		assert_eq!(config.generation.timeout_secs, DEFAULT_TIMEOUT_SECS);
	}

	#[test]
	fn out_of_range_threshold_is_rejected() {
		let config = Config { threshold: 1.5, ..Config::default() };
		let err = config.validate().unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Config);
		assert_ne!(err.kind().exit_code(), ErrorKind::Io.exit_code());
	}

	#[test]
	fn malformed_file_is_a_config_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("docent.json");
		std::fs::write(&path, "{ \"threshold\": ").unwrap();
		assert_eq!(Config::load(Some(&path)).unwrap_err().kind(), ErrorKind::Config);

		std::fs::write(&path, r#"{ "generation": { "token_channel_capacity": 0 } }"#).unwrap();
		assert_eq!(Config::load(Some(&path)).unwrap_err().kind(), ErrorKind::Config);

		// A file that cannot be read is still an IO failure.
		let missing = dir.path().join("absent.json");
		assert_eq!(Config::load(Some(&missing)).unwrap_err().kind(), ErrorKind::Io);
	}

	#[test]
	fn variant_presets_differ() {
		let clip = VisionProfile::clip();
		let eff = VisionProfile::efficientnet();
		assert_eq!(clip.layout, Layout::Chw);
		assert_eq!(eff.layout, Layout::Hwc);
		assert!(!clip.produces_normalized_output);
		assert!(eff.produces_normalized_output);
	}
}
