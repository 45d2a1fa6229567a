use clap::builder::styling::{AnsiColor, Style, Styles};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use crate::runtime::Provider;
use crate::search::Metric;

fn parse_threshold(s: &str) -> Result<f32, String> {
	let val: f32 = s.parse().map_err(|_| format!("'{}' is not a valid number", s))?;
	if !(-1.0..=1.0).contains(&val) {
		Err(format!("threshold must be between -1.0 and 1.0, got {}", val))
	} else {
		Ok(val)
	}
}

fn styles() -> Styles {
	Styles::styled()
		.header(Style::new().bold().fg_color(Some(AnsiColor::Blue.into())))
		.usage(Style::new().bold().fg_color(Some(AnsiColor::Blue.into())))
		.literal(Style::new().fg_color(Some(AnsiColor::Blue.into())))
		.placeholder(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
		.valid(Style::new().fg_color(Some(AnsiColor::Blue.into())))
		.invalid(Style::new().fg_color(Some(AnsiColor::Red.into())))
}

#[derive(Parser, Debug)]
#[command(
	name = "docent",
	author,
	version,
	about = "On-device artwork recognition and art docent chat",
	styles = styles(),
	disable_help_subcommand = true,
	after_help = format!(
		"{title}
  {docent} {recognize} {recognize_args}            {recognize_desc}
  {docent} {recognize} {crop_args}   {crop_desc}
  {docent} {ask}       {ask_args}  {ask_desc}
  {docent} {catalog}   {catalog_args}    {catalog_desc}",
		title = "Examples:".bright_blue().bold(),
		docent = "docent".bright_blue(),
		recognize = "recognize".yellow(),
		recognize_args = "-i photo.jpg",
		recognize_desc = "Identify the artwork in a photo".dimmed(),
		crop_args = "-i photo.jpg --crop -n 3",
		crop_desc = "Crop to the subject, show top 3".dimmed(),
		ask = "ask".yellow(),
		ask_args = "-i photo.jpg \"Who painted this?\"",
		ask_desc = "Ask about the recognized artwork".dimmed(),
		catalog = "catalog".yellow(),
		catalog_args = "--export out.msgpack",
		catalog_desc = "Check and export the catalog".dimmed(),
	),
)]
pub struct Cli {
	/// Enable verbose debug output
	#[arg(short = 'v', long = "verbose", global = true)]
	pub verbose: bool,

	/// Execution provider: auto, cpu, cuda, tensorrt, coreml, xnnpack
	#[arg(short = 'p', long = "provider", global = true, default_value = "auto")]
	pub provider: Provider,

	/// JSON config file (default: $DOCENT_CONFIG)
	#[arg(short = 'c', long = "config", global = true, value_name = "PATH")]
	pub config: Option<PathBuf>,

	/// Directory holding the models and catalog
	#[arg(long = "models", global = true, value_name = "DIR")]
	pub models: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Identify the artwork in a photo
	#[command(visible_alias = "r")]
	Recognize {
		/// Photo to recognize
		#[arg(short = 'i', long = "image", value_name = "PATH")]
		image: PathBuf,

		/// Also list the closest N catalog entries
		#[arg(short = 'n', long = "top", value_name = "N")]
		top: Option<usize>,

		/// Minimum similarity to accept a match
		#[arg(short = 't', long = "threshold", value_parser = parse_threshold)]
		threshold: Option<f32>,

		/// Similarity metric
		#[arg(short = 'm', long = "metric")]
		metric: Option<Metric>,

		/// Crop to the detected subject before matching
		#[arg(long = "crop")]
		crop: bool,

		/// Save the letterboxed model input as PNG
		#[arg(long = "save-preview", value_name = "PATH")]
		save_preview: Option<PathBuf>,
	},

	/// Ask the on-device docent about an artwork
	#[command(visible_alias = "a")]
	Ask {
		/// Question to ask
		#[arg(value_name = "QUESTION")]
		question: String,

		/// Recognize this photo first and ask about the match
		#[arg(short = 'i', long = "image", value_name = "PATH", conflicts_with = "artwork")]
		image: Option<PathBuf>,

		/// Catalog id of the artwork to ask about
		#[arg(long = "artwork", value_name = "ID")]
		artwork: Option<String>,

		/// Give up after this many seconds
		#[arg(long = "timeout", value_name = "SECS")]
		timeout: Option<u64>,

		/// Maximum tokens to generate
		#[arg(long = "max-tokens", value_name = "N")]
		max_tokens: Option<usize>,

		/// Sampling seed
		#[arg(long = "seed")]
		seed: Option<u64>,
	},

	/// Check catalog consistency
	Catalog {
		/// Write the catalog as a combined MessagePack file
		#[arg(long = "export", value_name = "PATH")]
		export: Option<PathBuf>,
	},
}
