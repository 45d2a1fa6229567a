//! Catalog file formats and tolerant loading
//!
//! Two layouts are understood:
//! - a pair of maps, `id -> [f32]` and `id -> {title, author, type, ...}`
//! - a single combined list `[{id, vector, title, author, ...}]`
//!
//! Either may be JSON or MessagePack, picked by file extension. Entry order
//! in the file is kept, since similarity ties resolve to the first entry.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::config::{CATALOG_COMBINED, CATALOG_COMBINED_JSON, CATALOG_INDEX, CATALOG_METADATA};
use crate::core::{ArtworkMetadata, ArtworkRecord, Embedding};
use crate::error::{Error, Result};
use crate::ui;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
	Json,
	MessagePack,
}

impl CatalogFormat {
	pub fn detect(path: &Path) -> Self {
		match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
			Some("msgpack") | Some("mp") => Self::MessagePack,
			_ => Self::Json,
		}
	}
}

/// Ordered artwork records, read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
	records: Vec<ArtworkRecord>,
	/// Metadata entries with no vector.
	orphaned_metadata: Vec<String>,
	skipped: usize,
}

/// Combined-file entry.
#[derive(Deserialize)]
struct CombinedEntry {
	id: String,
	vector: Vec<f32>,
	#[serde(flatten)]
	metadata: ArtworkMetadata,
}

/// Result of cross-checking the vector map against the metadata map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistencyReport {
	pub entries: usize,
	pub missing_metadata: Vec<String>,
	pub orphaned_metadata: Vec<String>,
	pub skipped: usize,
	/// Vector length → number of entries.
	pub dimensions: BTreeMap<usize, usize>,
}

impl ConsistencyReport {
	pub fn is_consistent(&self) -> bool {
		self.missing_metadata.is_empty()
			&& self.orphaned_metadata.is_empty()
			&& self.skipped == 0
			&& self.dimensions.len() <= 1
	}
}

impl Catalog {
	pub fn new(records: Vec<ArtworkRecord>) -> Self {
		Self { records, ..Self::default() }
	}

	/// Join a vector map with a metadata map, keeping vector order.
	pub fn from_parts(vectors: Vec<(String, Vec<f32>)>, mut metadata: HashMap<String, ArtworkMetadata>) -> Self {
		let mut records = Vec::with_capacity(vectors.len());
		for (id, vector) in vectors {
			let meta = metadata.remove(&id);
			records.push(ArtworkRecord { id, vector: Embedding::new(vector), metadata: meta });
		}

		let mut orphaned_metadata: Vec<String> = metadata.into_keys().collect();
		orphaned_metadata.sort();

		Self { records, orphaned_metadata, skipped: 0 }
	}

	/// Load from a directory: a combined file (MessagePack, then JSON) if present, otherwise the
	/// index + metadata pair. Never fails; problems leave an empty catalog.
	pub fn load_dir(dir: &Path) -> Self {
		for name in [CATALOG_COMBINED, CATALOG_COMBINED_JSON] {
			let combined = dir.join(name);
			if combined.is_file() {
				return Self::load_combined(&combined);
			}
		}

		let metadata = dir.join(CATALOG_METADATA);
		Self::load_files(&dir.join(CATALOG_INDEX), metadata.is_file().then_some(metadata.as_path()))
	}

	/// Index + optional metadata. A broken index gives an empty catalog; a
	/// broken metadata file only drops the metadata.
	pub fn load_files(index: &Path, metadata: Option<&Path>) -> Self {
		match Self::try_load_files(index, metadata) {
			Ok(catalog) => catalog,
			Err(e) => {
				ui::warn(&format!("{}, continuing with an empty catalog", e));
				Self::default()
			}
		}
	}

	pub fn try_load_files(index: &Path, metadata: Option<&Path>) -> Result<Self> {
		let (vectors, skipped) = parse_vectors(read_object(index)?);

		let metadata = match metadata {
			Some(path) => match read_object(path) {
				Ok(map) => parse_metadata(map),
				Err(e) => {
					ui::warn(&format!("{}, artwork details unavailable", e));
					HashMap::new()
				}
			},
			None => HashMap::new(),
		};

		let mut catalog = Self::from_parts(vectors, metadata);
		catalog.skipped = skipped;
		catalog.log_loaded(index);
		Ok(catalog)
	}

	pub fn load_combined(path: &Path) -> Self {
		match Self::try_load_combined(path) {
			Ok(catalog) => catalog,
			Err(e) => {
				ui::warn(&format!("{}, continuing with an empty catalog", e));
				Self::default()
			}
		}
	}

	pub fn try_load_combined(path: &Path) -> Result<Self> {
		let entries = match read_value(path)? {
			Value::Array(entries) => entries,
			_ => return Err(Error::CatalogLoad(format!("{}: expected a list of records", path.display()))),
		};

		let mut records = Vec::with_capacity(entries.len());
		let mut seen = HashSet::new();
		let mut skipped = 0;

		for (i, entry) in entries.into_iter().enumerate() {
			match serde_json::from_value::<CombinedEntry>(entry) {
				Ok(entry) if !seen.contains(&entry.id) && valid_vector(&entry.vector) => {
					seen.insert(entry.id.clone());
					records.push(ArtworkRecord {
						id: entry.id,
						vector: Embedding::new(entry.vector),
						metadata: Some(entry.metadata),
					});
				}
				Ok(entry) => {
					ui::warn(&format!("Skipping catalog entry '{}': duplicate id or unusable vector", entry.id));
					skipped += 1;
				}
				Err(e) => {
					ui::warn(&format!("Skipping catalog entry #{}: {}", i, e));
					skipped += 1;
				}
			}
		}

		let catalog = Self { records, orphaned_metadata: Vec::new(), skipped };
		catalog.log_loaded(path);
		Ok(catalog)
	}

	/// Write all records as one combined MessagePack file.
	pub fn save_msgpack(&self, path: &Path) -> Result<()> {
		let mut entries = Vec::with_capacity(self.records.len());
		for record in &self.records {
			let metadata = record.metadata.clone().unwrap_or_default();
			let mut entry = match serde_json::to_value(&metadata) {
				Ok(Value::Object(map)) => map,
				_ => Map::new(),
			};
			entry.insert("id".to_string(), Value::from(record.id.clone()));
			entry.insert("vector".to_string(), Value::from(record.vector.as_slice().to_vec()));
			entries.push(Value::Object(entry));
		}

		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				fs::create_dir_all(parent)?;
			}
		}

		// Named fields so the file reads back through the same tolerant path.
		let bytes = rmp_serde::to_vec_named(&Value::Array(entries))
			.map_err(|e| Error::CatalogLoad(format!("failed to encode catalog: {}", e)))?;
		fs::write(path, bytes)?;
		Ok(())
	}

	pub fn records(&self) -> &[ArtworkRecord] {
		&self.records
	}

	pub fn into_records(self) -> Vec<ArtworkRecord> {
		self.records
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	/// Entries dropped while loading.
	pub fn skipped(&self) -> usize {
		self.skipped
	}

	pub fn report(&self) -> ConsistencyReport {
		let mut dimensions = BTreeMap::new();
		for record in &self.records {
			*dimensions.entry(record.vector.dim()).or_insert(0) += 1;
		}

		ConsistencyReport {
			entries: self.records.len(),
			missing_metadata: self
				.records
				.iter()
				.filter(|r| r.metadata.is_none())
				.map(|r| r.id.clone())
				.collect(),
			orphaned_metadata: self.orphaned_metadata.clone(),
			skipped: self.skipped,
			dimensions,
		}
	}

	fn log_loaded(&self, path: &Path) {
		ui::debug(&format!(
			"Loaded {} catalog entries from {} ({} skipped)",
			self.records.len(),
			path.display(),
			self.skipped
		));
	}
}

fn read_value(path: &Path) -> Result<Value> {
	let bytes = fs::read(path).map_err(|e| Error::CatalogLoad(format!("{}: {}", path.display(), e)))?;

	let parsed = match CatalogFormat::detect(path) {
		CatalogFormat::Json => serde_json::from_slice(&bytes).map_err(|e| e.to_string()),
		CatalogFormat::MessagePack => rmp_serde::from_slice(&bytes).map_err(|e| e.to_string()),
	};
	parsed.map_err(|e| Error::CatalogLoad(format!("{}: {}", path.display(), e)))
}

fn read_object(path: &Path) -> Result<Map<String, Value>> {
	match read_value(path)? {
		Value::Object(map) => Ok(map),
		_ => Err(Error::CatalogLoad(format!("{}: expected an object keyed by artwork id", path.display()))),
	}
}

fn parse_vectors(map: Map<String, Value>) -> (Vec<(String, Vec<f32>)>, usize) {
	let mut vectors = Vec::with_capacity(map.len());
	let mut skipped = 0;

	for (id, value) in map {
		match serde_json::from_value::<Vec<f32>>(value) {
			Ok(vector) if valid_vector(&vector) => vectors.push((id, vector)),
			Ok(_) => {
				ui::warn(&format!("Skipping '{}': empty or non-finite vector", id));
				skipped += 1;
			}
			Err(e) => {
				ui::warn(&format!("Skipping '{}': {}", id, e));
				skipped += 1;
			}
		}
	}

	(vectors, skipped)
}

fn parse_metadata(map: Map<String, Value>) -> HashMap<String, ArtworkMetadata> {
	let mut metadata = HashMap::with_capacity(map.len());
	for (id, value) in map {
		match serde_json::from_value::<ArtworkMetadata>(value) {
			Ok(meta) => {
				metadata.insert(id, meta);
			}
			Err(e) => ui::warn(&format!("Ignoring metadata for '{}': {}", id, e)),
		}
	}
	metadata
}

fn valid_vector(vector: &[f32]) -> bool {
	!vector.is_empty() && vector.iter().all(|v| v.is_finite())
}
