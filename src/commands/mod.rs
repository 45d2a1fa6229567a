//! # Command Implementations
//!
//! Each submodule handles one CLI command (recognize, ask, catalog).

pub mod ask;
pub mod catalog;
pub mod recognize;

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::config::Config;
use crate::runtime::{Provider, SessionOptions};

/// Options shared by every command.
#[derive(Debug, Clone)]
pub struct Globals {
	pub provider: Provider,
	pub config: Option<PathBuf>,
	pub models: Option<PathBuf>,
}

impl Globals {
	/// Config file (or defaults) with command-line overrides applied.
	pub fn load_config(&self) -> Result<Config> {
		let mut config = Config::load(self.config.as_deref()).context("Failed to load config")?;
		if let Some(models) = &self.models {
			config.models_dir = Some(models.clone());
		}
		Ok(config)
	}

	pub fn session_options(&self, config: &Config) -> SessionOptions {
		SessionOptions { provider: self.provider, intra_threads: config.intra_threads }
	}
}
