//! Recognize command - identify the artwork in a photo

use anyhow::{Context, Result};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::context::Docent;
use crate::core::RawImage;
use crate::pipeline::Recognition;
use crate::search::{MatchResult, Metric};
use crate::ui;

use super::Globals;

pub struct Options {
	pub image: PathBuf,
	pub top: Option<usize>,
	pub threshold: Option<f32>,
	pub metric: Option<Metric>,
	pub crop: bool,
	pub save_preview: Option<PathBuf>,
}

/// Returns whether a match was accepted.
pub fn run(globals: &Globals, options: Options) -> Result<bool> {
	let start = Instant::now();

	let mut config = globals.load_config()?;
	if let Some(threshold) = options.threshold {
		config.threshold = threshold;
	}
	if let Some(metric) = options.metric {
		config.metric = metric;
	}
	config.crop_subject |= options.crop;
	config.validate()?;

	let session = globals.session_options(&config);
	let mut docent = Docent::new(config);
	docent.initialize(session)?;

	ui::info(&format!("Recognizing: {}", options.image.display()));
	let image = RawImage::open(&options.image)?;
	let pipeline = docent.pipeline()?;

	if let Some(path) = &options.save_preview {
		save_preview(&pipeline.preview(&image), path)?;
	}

	let (outcome, candidates) = pipeline.recognize_ranked(&image, options.top.unwrap_or(0));
	let elapsed = start.elapsed().as_millis();

	let matched = match outcome {
		Recognition::Matched(found) => {
			print_match(&found);
			ui::success(&format!("Recognized in {}ms", elapsed));
			true
		}
		Recognition::NoMatch { best } => {
			match best {
				Some(best) => ui::warn(&format!(
					"No confident match (closest: {} at {:.1}%, threshold {:.1}%)",
					best.id,
					best.score * 100.0,
					pipeline.threshold() * 100.0
				)),
				None => ui::warn("No match: catalog is empty"),
			}
			false
		}
		Recognition::Failed(e) => return Err(e.into()),
	};

	if options.top.is_some() {
		ui::header("Closest artworks");
		for (i, m) in candidates.iter().enumerate() {
			let title = docent
				.artwork(&m.id)
				.map(|meta| meta.display_title(&m.id).to_string())
				.unwrap_or_else(|| m.id.clone());
			println!(
				"{}. {} {} {}",
				format!("{:2}", i + 1).bright_blue().bold(),
				title.bright_white(),
				format!("[{}]", m.id).dimmed(),
				format!("{:.1}%", m.score * 100.0).dimmed(),
			);
		}
	}

	docent.shutdown();
	Ok(matched)
}

fn print_match(found: &MatchResult) {
	ui::header("Match");
	println!("  {} {}", found.title().bright_white().bold(), format!("{:.1}%", found.score * 100.0).dimmed());

	let Some(meta) = &found.metadata else {
		ui::warn(&format!("No metadata for '{}'", found.id));
		return;
	};

	for (label, value) in [
		("Artist", &meta.author),
		("Date", &meta.date),
		("Technique", &meta.technique),
		("Type", &meta.kind),
		("School", &meta.school),
	] {
		if !value.is_empty() {
			println!("  {:10} {}", label.dimmed(), value);
		}
	}
	if !meta.description.is_empty() {
		println!("\n  {}", meta.description);
	}
	println!();
}

fn save_preview(preview: &crate::processing::Letterbox, path: &Path) -> Result<()> {
	preview
		.canvas
		.save(path)
		.with_context(|| format!("Failed to save preview to {}", path.display()))?;
	ui::info(&format!(
		"Saved {}x{} preview: {}",
		preview.canvas.width(),
		preview.canvas.height(),
		ui::path_link(path)
	));
	Ok(())
}
