//! Execution provider selection

use clap::ValueEnum;
use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::ui;

static PROVIDER_LOGGED: AtomicBool = AtomicBool::new(false);

/// Execution provider for ONNX Runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
	/// Auto-detect best available (TensorRT → CUDA → CoreML → XNNPACK → CPU)
	#[default]
	Auto,
	/// CPU only
	Cpu,
	/// NVIDIA CUDA GPU
	Cuda,
	/// NVIDIA TensorRT (optimized inference)
	Tensorrt,
	/// Apple CoreML (macOS only)
	Coreml,
	/// XNNPACK (ARM/mobile CPUs)
	Xnnpack,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
	pub provider: Provider,
	pub intra_threads: usize,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self { provider: Provider::Auto, intra_threads: 4 }
	}
}

/// Load an ONNX graph. Missing files and runtime load failures both map to `ModelLoad`.
pub fn create_session(model_path: &Path, options: SessionOptions) -> Result<Session> {
	if !model_path.is_file() {
		return Err(Error::model_load(model_path, "file does not exist"));
	}

	let mut builder = Session::builder().map_err(|e| Error::model_load(model_path, e))?;

	match options.provider {
		Provider::Auto => register_best(&mut builder),
		Provider::Cpu => log_once(|| ui::info("Using CPU execution provider (forced)")),
		Provider::Cuda => {
			if !try_cuda(&mut builder) {
				ui::error("CUDA requested but unavailable, falling back to CPU");
			}
		}
		Provider::Tensorrt => {
			if !try_tensorrt(&mut builder) {
				ui::error("TensorRT requested but unavailable, falling back to CPU");
			}
		}
		Provider::Coreml => {
			#[cfg(target_os = "macos")]
			if !try_coreml(&mut builder) {
				ui::error("CoreML requested but unavailable, falling back to CPU");
			}
			#[cfg(not(target_os = "macos"))]
			ui::error("CoreML only available on macOS, falling back to CPU");
		}
		Provider::Xnnpack => {
			if !try_xnnpack(&mut builder) {
				ui::error("XNNPACK requested but unavailable, falling back to CPU");
			}
		}
	}

	ui::debug(&format!("Loading graph: {}", model_path.display()));

	let builder = builder
		.with_optimization_level(GraphOptimizationLevel::Level3)
		.map_err(|e| Error::model_load(model_path, e))?;
	let mut builder = builder
		.with_intra_threads(options.intra_threads.max(1))
		.map_err(|e| Error::model_load(model_path, e))?;

	builder
		.commit_from_file(model_path)
		.map_err(|e| Error::model_load(model_path, e))
}

fn log_once(log: impl FnOnce()) {
	if !PROVIDER_LOGGED.swap(true, Ordering::Relaxed) {
		log();
	}
}

fn register_best(builder: &mut ort::session::builder::SessionBuilder) {
	if try_tensorrt(builder) {
		return;
	}
	if try_cuda(builder) {
		return;
	}

	#[cfg(target_os = "macos")]
	if try_coreml(builder) {
		return;
	}

	if try_xnnpack(builder) {
		return;
	}

	log_once(|| ui::info("Using CPU execution provider"));
}

macro_rules! try_provider {
	($builder:expr, $provider_type:ty, $name:expr) => {{
		use ort::ep::ExecutionProvider;

		crate::ui::debug(&format!("Trying provider: {}", $name));

		let provider = <$provider_type>::default();
		if !provider.is_available().unwrap_or(false) {
			crate::ui::debug(&format!("{} not available", $name));
			return false;
		}

		match provider.register($builder) {
			Ok(_) => {
				log_once(|| crate::ui::success(&format!("Using {} execution provider", $name)));
				true
			}
			Err(e) => {
				crate::ui::debug(&format!("{} registration failed: {}", $name, e));
				false
			}
		}
	}};
}

fn try_cuda(builder: &mut ort::session::builder::SessionBuilder) -> bool {
	use ort::ep::CUDA;
	try_provider!(builder, CUDA, "CUDA")
}

#[cfg(target_os = "macos")]
fn try_coreml(builder: &mut ort::session::builder::SessionBuilder) -> bool {
	use ort::ep::CoreML;
	try_provider!(builder, CoreML, "CoreML")
}

fn try_tensorrt(builder: &mut ort::session::builder::SessionBuilder) -> bool {
	use ort::ep::TensorRT;
	try_provider!(builder, TensorRT, "TensorRT")
}

fn try_xnnpack(builder: &mut ort::session::builder::SessionBuilder) -> bool {
	use ort::ep::XNNPACK;
	try_provider!(builder, XNNPACK, "XNNPACK")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_model_is_a_load_error() {
		let err = create_session(Path::new("/nonexistent/model.onnx"), SessionOptions::default()).unwrap_err();
		assert_eq!(err.kind(), crate::ErrorKind::ModelLoad);
	}
}
