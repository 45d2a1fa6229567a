//! Catalog records

use serde::{Deserialize, Serialize};

use super::Embedding;

/// Descriptive fields shown to visitors and fed to the docent prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtworkMetadata {
	pub title: String,
	pub author: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub technique: String,
	pub school: String,
	pub date: String,
	pub description: String,
}

impl ArtworkMetadata {
	/// Title for display, falling back to the catalog id.
	pub fn display_title<'a>(&'a self, id: &'a str) -> &'a str {
		if self.title.is_empty() {
			id
		} else {
			&self.title
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtworkRecord {
	pub id: String,
	pub vector: Embedding,
	pub metadata: Option<ArtworkMetadata>,
}

impl ArtworkRecord {
	pub fn new(id: impl Into<String>, vector: impl Into<Embedding>) -> Self {
		Self { id: id.into(), vector: vector.into(), metadata: None }
	}

	pub fn with_metadata(mut self, metadata: ArtworkMetadata) -> Self {
		self.metadata = Some(metadata);
		self
	}
}
