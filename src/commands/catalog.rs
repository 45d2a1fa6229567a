//! Catalog command - consistency report and export

use anyhow::{Context, Result};
use colored::*;
use std::path::PathBuf;

use crate::context::Docent;
use crate::ui;

use super::Globals;

/// Returns whether the catalog is consistent.
pub fn run(globals: &Globals, export: Option<PathBuf>) -> Result<bool> {
	let config = globals.load_config()?;
	let catalog = Docent::new(config).load_catalog();
	let report = catalog.report();

	ui::header("Catalog");
	println!("  {:18} {}", "Entries".dimmed(), report.entries.to_string().bright_white());
	for (dim, count) in &report.dimensions {
		println!("  {:18} {}", format!("{}-d vectors", dim).dimmed(), count);
	}
	if report.skipped > 0 {
		println!("  {:18} {}", "Skipped".dimmed(), report.skipped.to_string().bright_yellow());
	}

	if !report.missing_metadata.is_empty() {
		ui::warn(&format!(
			"{} entries without metadata: {}",
			report.missing_metadata.len(),
			report.missing_metadata.join(", ")
		));
	}
	if !report.orphaned_metadata.is_empty() {
		ui::warn(&format!(
			"{} metadata entries without a vector: {}",
			report.orphaned_metadata.len(),
			report.orphaned_metadata.join(", ")
		));
	}
	if report.dimensions.len() > 1 {
		ui::warn("Catalog mixes vector dimensions; only the first entry's dimension is searchable");
	}

	if let Some(path) = export {
		catalog
			.save_msgpack(&path)
			.with_context(|| format!("Failed to export catalog to {}", path.display()))?;
		ui::success(&format!("Exported {} entries to {}", catalog.len(), ui::path_link(&path)));
	}

	if report.is_consistent() {
		ui::success("Catalog is consistent");
	}
	Ok(report.is_consistent())
}
