//! Error taxonomy shared by the recognition pipeline and the generation session

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("Invalid image: {0}")]
	InvalidImage(String),

	#[error("Failed to load model {}: {reason}", path.display())]
	ModelLoad { path: PathBuf, reason: String },

	#[error("Inference failed: {0}")]
	Inference(String),

	#[error("Dimension mismatch: expected {expected}, got {actual}")]
	DimensionMismatch { expected: usize, actual: usize },

	#[error("Catalog load failed: {0}")]
	CatalogLoad(String),

	#[error("Session state: {0}")]
	SessionState(String),

	#[error("Generation timed out after {:.0}s", .0.as_secs_f32())]
	GenerationTimeout(Duration),

	#[error("Generation failed: {0}")]
	Generation(String),

	#[error("Invalid config: {0}")]
	Config(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

/// Discriminant of [`Error`], cheap to copy into pipeline states and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	InvalidImage,
	ModelLoad,
	Inference,
	DimensionMismatch,
	CatalogLoad,
	SessionState,
	GenerationTimeout,
	Generation,
	Config,
	Io,
}

impl Error {
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::InvalidImage(_) => ErrorKind::InvalidImage,
			Self::ModelLoad { .. } => ErrorKind::ModelLoad,
			Self::Inference(_) => ErrorKind::Inference,
			Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
			Self::CatalogLoad(_) => ErrorKind::CatalogLoad,
			Self::SessionState(_) => ErrorKind::SessionState,
			Self::GenerationTimeout(_) => ErrorKind::GenerationTimeout,
			Self::Generation(_) => ErrorKind::Generation,
			Self::Config(_) => ErrorKind::Config,
			Self::Io(_) => ErrorKind::Io,
		}
	}

	pub(crate) fn model_load(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
		Self::ModelLoad { path: path.into(), reason: reason.to_string() }
	}
}

impl From<ort::Error> for Error {
	fn from(e: ort::Error) -> Self {
		Self::Inference(e.to_string())
	}
}

impl ErrorKind {
	/// Process exit code used by the command-line front end.
	pub fn exit_code(self) -> i32 {
		match self {
			Self::InvalidImage => 2,
			Self::ModelLoad => 3,
			Self::Inference => 4,
			Self::DimensionMismatch => 5,
			Self::CatalogLoad => 6,
			Self::SessionState => 7,
			Self::GenerationTimeout => 8,
			Self::Generation => 9,
			Self::Io => 10,
			Self::Config => 11,
		}
	}
}

impl std::fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::InvalidImage => "InvalidImage",
			Self::ModelLoad => "ModelLoadError",
			Self::Inference => "InferenceError",
			Self::DimensionMismatch => "DimensionMismatch",
			Self::CatalogLoad => "CatalogLoadError",
			Self::SessionState => "SessionStateError",
			Self::GenerationTimeout => "GenerationTimeout",
			Self::Generation => "GenerationError",
			Self::Config => "ConfigError",
			Self::Io => "IoError",
		};
		f.write_str(name)
	}
}
