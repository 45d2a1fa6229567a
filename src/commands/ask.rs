//! Ask command - grounded question answering about an artwork

use anyhow::{anyhow, Context, Result};
use colored::*;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::context::Docent;
use crate::core::{ArtworkMetadata, RawImage};
use crate::error::Error;
use crate::models::llm::{GenerationSession, LmOptions, OnnxCausalLm};
use crate::runtime::SessionOptions;
use crate::ui;

use super::Globals;

pub struct Options {
	pub question: String,
	pub image: Option<PathBuf>,
	pub artwork: Option<String>,
	pub timeout: Option<u64>,
	pub max_tokens: Option<usize>,
	pub seed: Option<u64>,
}

pub fn run(globals: &Globals, options: Options) -> Result<()> {
	let mut config = globals.load_config()?;
	if let Some(secs) = options.timeout {
		config.generation.timeout_secs = secs;
	}
	if let Some(n) = options.max_tokens {
		config.generation.max_new_tokens = n;
	}
	if let Some(seed) = options.seed {
		config.generation.seed = seed;
	}
	config.validate()?;

	let session_options = globals.session_options(&config);
	let artwork = resolve_artwork(&config, session_options, &options)?;
	match &artwork {
		Some(meta) => ui::info(&format!("Asking about: {}", meta.display_title("untitled"))),
		None => ui::info("No artwork context, answering generally"),
	}

	let model_path = config
		.language_model_path()
		.ok_or_else(|| anyhow!("Models directory not found. Pass --models or set DOCENT_MODELS_DIR"))?;
	let lm_options = LmOptions { session: session_options, ..LmOptions::default() };

	let mut session: GenerationSession<OnnxCausalLm> = GenerationSession::new(config.generation.clone());
	session.load_model(&model_path, &lm_options)?;
	session.init_session()?;
	session.set_artwork(artwork)?;
	session.decode_system_prompt()?;

	ui::header("Answer");
	let mut stdout = std::io::stdout();
	let result = session.generate_with_timeout(&options.question, config.generation.timeout(), |piece| {
		print!("{}", piece);
		let _ = stdout.flush();
	});
	println!();

	session.close_session()?;

	match result {
		Ok(stats) => {
			ui::success(&format!(
				"{} tokens in {:.1}s ({:.1} tok/s, {:?})",
				stats.tokens,
				stats.elapsed.as_secs_f32(),
				stats.tokens_per_second(),
				stats.finish
			));
			Ok(())
		}
		Err(Error::GenerationTimeout(limit)) => {
			ui::warn(&format!(
				"The docent took too long (over {}), try a shorter question",
				format_secs(limit).bright_yellow()
			));
			Err(Error::GenerationTimeout(limit).into())
		}
		Err(e) => Err(e).context("The docent could not answer"),
	}
}

fn resolve_artwork(config: &Config, session: SessionOptions, options: &Options) -> Result<Option<ArtworkMetadata>> {
	if let Some(id) = &options.artwork {
		let catalog = Docent::new(config.clone()).load_catalog();
		let record = catalog
			.records()
			.iter()
			.find(|r| &r.id == id)
			.ok_or_else(|| anyhow!("No artwork '{}' in the catalog", id))?;
		return Ok(Some(record.metadata.clone().unwrap_or_else(|| ArtworkMetadata {
			title: id.clone(),
			..ArtworkMetadata::default()
		})));
	}

	let Some(path) = &options.image else {
		return Ok(None);
	};

	let mut docent = Docent::new(config.clone());
	docent.initialize(session)?;
	let image = RawImage::open(path)?;
	let found = docent.pipeline()?.try_recognize(&image)?;
	docent.shutdown();

	match found {
		Some(found) => {
			ui::success(&format!("Recognized {} ({:.1}%)", found.title(), found.score * 100.0));
			Ok(Some(found.metadata.unwrap_or_else(|| ArtworkMetadata {
				title: found.id,
				..ArtworkMetadata::default()
			})))
		}
		None => {
			ui::warn("Artwork not recognized, answering without context");
			Ok(None)
		}
	}
}

fn format_secs(d: Duration) -> String {
	format!("{}s", d.as_secs())
}
