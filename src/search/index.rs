//! Brute-force similarity index
//!
//! Catalogs are a few hundred to a few thousand entries, so a linear scan is
//! fast enough and keeps tie-breaking exact: the first entry in catalog order
//! wins.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::{cosine_similarity, dot, ArtworkMetadata, ArtworkRecord, Embedding};
use crate::error::{Error, Result};
use crate::storage::Catalog;
use crate::ui;

/// How query and catalog vectors are compared.
///
/// `Dot` normalizes catalog vectors when the index is built and the query
/// vector on every lookup, so both sides are unit length and the ranking
/// equals cosine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
	#[default]
	Cosine,
	Dot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
	pub id: String,
	pub score: f32,
}

/// Accepted best match, with its metadata when the catalog has any.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
	pub id: String,
	pub score: f32,
	pub metadata: Option<ArtworkMetadata>,
}

impl MatchResult {
	pub fn title(&self) -> &str {
		match &self.metadata {
			Some(meta) => meta.display_title(&self.id),
			None => &self.id,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct SimilarityIndex {
	entries: Vec<ArtworkRecord>,
	dim: Option<usize>,
	metric: Metric,
}

impl SimilarityIndex {
	/// Build from records in catalog order. The first record fixes the
	/// dimension; records of any other length are dropped with a warning.
	pub fn from_records(records: Vec<ArtworkRecord>, metric: Metric) -> Self {
		let mut entries = Vec::with_capacity(records.len());
		let mut dim = None;

		for mut record in records {
			let expected = *dim.get_or_insert(record.vector.dim());
			if record.vector.dim() != expected {
				ui::warn(&format!(
					"Dropping '{}' from the index: {}-d vector in a {}-d catalog",
					record.id,
					record.vector.dim(),
					expected
				));
				continue;
			}
			if metric == Metric::Dot {
				record.vector = record.vector.normalized();
			}
			entries.push(record);
		}

		Self { entries, dim, metric }
	}

	pub fn from_catalog(catalog: Catalog, metric: Metric) -> Self {
		Self::from_records(catalog.into_records(), metric)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Vector length every entry shares; `None` for an empty index.
	pub fn dim(&self) -> Option<usize> {
		self.dim
	}

	pub fn metric(&self) -> Metric {
		self.metric
	}

	pub fn records(&self) -> &[ArtworkRecord] {
		&self.entries
	}

	pub fn get(&self, id: &str) -> Option<&ArtworkRecord> {
		self.entries.iter().find(|r| r.id == id)
	}

	/// Fail fast when a model's output length can never match this catalog.
	pub fn check_dim(&self, dim: usize) -> Result<()> {
		match self.dim {
			Some(expected) if expected != dim => Err(Error::DimensionMismatch { expected, actual: dim }),
			_ => Ok(()),
		}
	}

	/// Highest-scoring entry, or `None` when the index is empty or the top
	/// score is below `threshold`. Ties go to the earlier entry.
	pub fn best_match(&self, query: &[f32], threshold: f32) -> Option<MatchResult> {
		let query = self.prepare(query)?;
		let mut best: Option<(&ArtworkRecord, f32)> = None;

		for entry in &self.entries {
			let Some(score) = self.score(&query, entry) else { continue };
			if best.map_or(true, |(_, top)| score > top) {
				best = Some((entry, score));
			}
		}

		let (entry, score) = best?;
		if score < threshold {
			ui::debug(&format!("Best candidate '{}' scored {:.4}, below {:.2}", entry.id, score, threshold));
			return None;
		}

		Some(MatchResult { id: entry.id.clone(), score, metadata: entry.metadata.clone() })
	}

	/// The `k` best entries, highest first. Diagnostic use.
	pub fn query(&self, query: &[f32], k: usize) -> Vec<ScoredMatch> {
		let mut ranked = self.ranked(query, f32::NEG_INFINITY);
		ranked.truncate(k);
		ranked
	}

	/// Every entry scoring at least `threshold`, highest first.
	pub fn above_threshold(&self, query: &[f32], threshold: f32) -> Vec<ScoredMatch> {
		self.ranked(query, threshold)
	}

	fn ranked(&self, query: &[f32], threshold: f32) -> Vec<ScoredMatch> {
		let Some(query) = self.prepare(query) else {
			return Vec::new();
		};

		let mut scored: Vec<ScoredMatch> = self
			.entries
			.par_iter()
			.filter_map(|entry| {
				let score = self.score(&query, entry)?;
				(score >= threshold).then(|| ScoredMatch { id: entry.id.clone(), score })
			})
			.collect();

		// Stable, so equal scores stay in catalog order.
		scored.sort_by(|a, b| b.score.total_cmp(&a.score));
		scored
	}

	fn prepare(&self, query: &[f32]) -> Option<Embedding> {
		if self.entries.is_empty() {
			return None;
		}
		if let Some(dim) = self.dim {
			if query.len() != dim {
				ui::warn(&format!("Query has {} dimensions, catalog has {}", query.len(), dim));
			}
		}

		let query = Embedding::new(query.to_vec());
		Some(match self.metric {
			Metric::Cosine => query,
			Metric::Dot => query.normalized(),
		})
	}

	/// `None` for entries whose length differs from the query.
	fn score(&self, query: &Embedding, entry: &ArtworkRecord) -> Option<f32> {
		if entry.vector.dim() != query.dim() {
			return None;
		}
		Some(match self.metric {
			Metric::Cosine => cosine_similarity(query.as_slice(), entry.vector.as_slice()),
			Metric::Dot => dot(query.as_slice(), entry.vector.as_slice()),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn index(metric: Metric) -> SimilarityIndex {
		SimilarityIndex::from_records(
			vec![
				ArtworkRecord::new("mona_lisa", vec![1.0, 0.0, 0.0]),
				ArtworkRecord::new("starry_night", vec![0.0, 1.0, 0.0]),
			],
			metric,
		)
	}

	#[test]
	fn unnormalized_query_finds_nearest() {
		for metric in [Metric::Cosine, Metric::Dot] {
			let found = index(metric).best_match(&[0.9, 0.1, 0.0], 0.5).unwrap();
			assert_eq!(found.id, "mona_lisa");
			assert!((found.score - 0.9939).abs() < 1e-3, "{:?}: {}", metric, found.score);
		}
	}

	#[test]
	fn threshold_rejects_weak_match() {
		let index = index(Metric::Cosine);
		assert!(index.best_match(&[0.9, 0.1, 0.0], 0.995).is_none());
		assert!(index.best_match(&[0.9, 0.1, 0.0], 0.99).is_some());
	}

	#[test]
	fn empty_index_has_no_match() {
		let index = SimilarityIndex::default();
		assert!(index.best_match(&[1.0, 0.0], -1.0).is_none());
		assert!(index.query(&[1.0, 0.0], 3).is_empty());
	}

	#[test]
	fn first_entry_wins_ties() {
		let index = SimilarityIndex::from_records(
			vec![
				ArtworkRecord::new("first", vec![0.0, 1.0]),
				ArtworkRecord::new("second", vec![0.0, 2.0]),
			],
			Metric::Cosine,
		);
		assert_eq!(index.best_match(&[0.0, 1.0], 0.0).unwrap().id, "first");

		let ids: Vec<String> = index.query(&[0.0, 1.0], 2).into_iter().map(|m| m.id).collect();
		assert_eq!(ids, ["first", "second"]);
	}

	#[test]
	fn mismatched_dimensions_are_dropped_at_build() {
		let index = SimilarityIndex::from_records(
			vec![ArtworkRecord::new("a", vec![1.0, 0.0]), ArtworkRecord::new("b", vec![1.0, 0.0, 0.0])],
			Metric::Cosine,
		);
		assert_eq!(index.len(), 1);
		assert_eq!(index.dim(), Some(2));
		assert!(matches!(index.check_dim(3), Err(Error::DimensionMismatch { expected: 2, actual: 3 })));
	}

	#[test]
	fn wrong_length_query_matches_nothing() {
		assert!(index(Metric::Cosine).best_match(&[1.0, 0.0], -1.0).is_none());
	}

	#[test]
	fn above_threshold_is_sorted() {
		let index = SimilarityIndex::from_records(
			vec![
				ArtworkRecord::new("low", vec![0.2, 1.0]),
				ArtworkRecord::new("high", vec![1.0, 0.1]),
				ArtworkRecord::new("opposite", vec![-1.0, 0.0]),
			],
			Metric::Cosine,
		);
		let ids: Vec<String> = index.above_threshold(&[1.0, 0.0], 0.1).into_iter().map(|m| m.id).collect();
		assert_eq!(ids, ["high", "low"]);
	}
}
