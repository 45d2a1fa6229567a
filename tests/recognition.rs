// Recognition pipeline and catalog loading without model files

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use docent::config::{VisionProfile, CATALOG_INDEX, CATALOG_METADATA};
use docent::core::{ArtworkRecord, RawImage};
use docent::models::{EmbeddingModel, FeatureExtractor};
use docent::processing::{ImagePreprocessor, Layout, Normalization, Tensor};
use docent::search::{Metric, SimilarityIndex};
use docent::storage::Catalog;
use docent::{ErrorKind, Recognition, RecognitionPipeline, Result, Stage};

/// Mean colour of the interleaved input, so a solid image maps onto its RGB direction.
struct MeanColour {
	extra: usize,
}

impl FeatureExtractor for MeanColour {
	fn extract(&mut self, tensor: Tensor) -> Result<Vec<f32>> {
		assert_eq!(tensor.layout(), Layout::Hwc);
		let data = tensor.as_slice();
		let pixels = (data.len() / 3) as f32;

		let mut sums = vec![0.0f32; 3 + self.extra];
		for px in data.chunks_exact(3) {
			for c in 0..3 {
				sums[c] += px[c];
			}
		}
		Ok(sums.into_iter().map(|s| s / pixels).collect())
	}
}

fn profile() -> VisionProfile {
	VisionProfile {
		input_size: 16,
		embedding_dim: 3,
		normalization: Normalization::unit(),
		layout: Layout::Hwc,
		produces_normalized_output: false,
		..VisionProfile::default()
	}
}

fn primaries() -> Arc<SimilarityIndex> {
	Arc::new(SimilarityIndex::from_records(
		vec![
			ArtworkRecord::new("red", vec![1.0, 0.0, 0.0]),
			ArtworkRecord::new("green", vec![0.0, 1.0, 0.0]),
			ArtworkRecord::new("blue", vec![0.0, 0.0, 1.0]),
		],
		Metric::Cosine,
	))
}

fn pipeline(index: Arc<SimilarityIndex>, extra: usize) -> RecognitionPipeline<MeanColour> {
	let profile = profile();
	RecognitionPipeline::new(
		ImagePreprocessor::from_profile(&profile),
		EmbeddingModel::with_extractor(MeanColour { extra }, &profile),
		index,
		0.6,
	)
	.unwrap()
}

fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RawImage {
	let data = rgb.iter().copied().cycle().take((width * height * 3) as usize).collect();
	RawImage::from_rgb(width, height, data).unwrap()
}

#[test]
fn solid_colours_are_recognized() {
	let mut pipeline = pipeline(primaries(), 0);
	assert_eq!(pipeline.stage(), Stage::Idle);

	for (rgb, id) in [([200, 10, 10], "red"), ([5, 180, 5], "green"), ([0, 0, 90], "blue")] {
		// Wide frames pick up black letterbox bands, which only scale the mean.
		let found = pipeline.recognize(&solid(40, 10, rgb)).into_match().unwrap();
		assert_eq!(found.id, id);
		assert!(found.score > 0.99);
		assert_eq!(pipeline.stage(), Stage::Matched);
	}
}

#[test]
fn ambiguous_photo_is_no_match_with_first_candidate() {
	let mut pipeline = pipeline(primaries(), 0);

	match pipeline.recognize(&solid(16, 16, [128, 128, 128])) {
		Recognition::NoMatch { best: Some(best) } => {
			// All three tie at 1/sqrt(3); the first catalog entry wins.
			assert_eq!(best.id, "red");
			assert!((best.score - 0.57735).abs() < 1e-3);
		}
		other => panic!("expected NoMatch, got {:?}", other),
	}
	assert_eq!(pipeline.stage(), Stage::NoMatch);

	pipeline.set_threshold(0.5);
	assert_eq!(pipeline.try_recognize(&solid(16, 16, [128, 128, 128])).unwrap().unwrap().id, "red");
}

#[test]
fn empty_catalog_never_matches() {
	let mut pipeline = pipeline(Arc::new(SimilarityIndex::default()), 0);
	assert!(matches!(pipeline.recognize(&solid(8, 8, [255, 0, 0])), Recognition::NoMatch { best: None }));
	assert_eq!(pipeline.stage(), Stage::NoMatch);
}

#[test]
fn wrong_model_output_fails_the_pipeline() {
	let mut pipeline = pipeline(primaries(), 2);
	let outcome = pipeline.recognize(&solid(8, 8, [255, 0, 0]));

	assert_eq!(outcome.error_kind(), Some(ErrorKind::DimensionMismatch));
	assert_eq!(pipeline.stage(), Stage::Failed(ErrorKind::DimensionMismatch));
}

#[test]
fn model_and_catalog_dimensions_must_agree() {
	let profile = VisionProfile { embedding_dim: 4, ..profile() };
	let result = RecognitionPipeline::new(
		ImagePreprocessor::from_profile(&profile),
		EmbeddingModel::with_extractor(MeanColour { extra: 1 }, &profile),
		primaries(),
		0.6,
	);
	assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::DimensionMismatch));
}

#[test]
fn catalog_files_drive_the_index() {
	let dir = tempfile::tempdir().unwrap();
	fs::write(
		dir.path().join(CATALOG_INDEX),
		r#"{
			"mona_lisa": [1.0, 0.0, 0.0],
			"broken": [1.0, "x", 0.0],
			"starry_night": [0.0, 1.0, 0.0]
		}"#,
	)
	.unwrap();
	fs::write(
		dir.path().join(CATALOG_METADATA),
		r#"{
			"mona_lisa": {"title": "Mona Lisa", "author": "Leonardo da Vinci", "type": "Painting"},
			"starry_night": {"title": "The Starry Night", "author": "Vincent van Gogh"}
		}"#,
	)
	.unwrap();

	let catalog = Catalog::load_dir(dir.path());
	assert_eq!(catalog.len(), 2);
	assert_eq!(catalog.skipped(), 1);
	assert!(catalog.report().missing_metadata.is_empty());

	let index = SimilarityIndex::from_catalog(catalog, Metric::Cosine);
	let found = index.best_match(&[0.9, 0.1, 0.0], 0.5).unwrap();
	assert_eq!(found.id, "mona_lisa");
	assert!((found.score - 0.994).abs() < 1e-3);
	assert_eq!(found.title(), "Mona Lisa");
	assert_eq!(found.metadata.unwrap().kind, "Painting");
}

#[test]
fn missing_catalog_is_empty_not_fatal() {
	let dir = tempfile::tempdir().unwrap();
	let catalog = Catalog::load_dir(dir.path());
	assert!(catalog.is_empty());
	assert!(SimilarityIndex::from_catalog(catalog, Metric::Dot).best_match(&[1.0], 0.0).is_none());
}

/// Mean colour that also counts how often the model runs.
struct Counting {
	inner: MeanColour,
	calls: Arc<AtomicUsize>,
}

impl FeatureExtractor for Counting {
	fn extract(&mut self, tensor: Tensor) -> Result<Vec<f32>> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.inner.extract(tensor)
	}
}

#[test]
fn ranked_candidates_share_one_inference() {
	let calls = Arc::new(AtomicUsize::new(0));
	let profile = profile();
	let mut pipeline = RecognitionPipeline::new(
		ImagePreprocessor::from_profile(&profile),
		EmbeddingModel::with_extractor(Counting { inner: MeanColour { extra: 0 }, calls: calls.clone() }, &profile),
		primaries(),
		0.6,
	)
	.unwrap();

	let (outcome, ranked) = pipeline.recognize_ranked(&solid(8, 8, [200, 120, 0]), 2);
	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert_eq!(pipeline.stage(), Stage::Matched);
	assert_eq!(outcome.into_match().unwrap().id, "red");
	let ids: Vec<&str> = ranked.iter().map(|m| m.id.as_str()).collect();
	assert_eq!(ids, ["red", "green"]);

	// Below threshold the ranked list is still filled and agrees with the closest entry.
	pipeline.set_threshold(0.99);
	let (outcome, ranked) = pipeline.recognize_ranked(&solid(8, 8, [200, 120, 0]), 3);
	assert_eq!(calls.load(Ordering::SeqCst), 2);
	assert_eq!(pipeline.stage(), Stage::NoMatch);
	match outcome {
		Recognition::NoMatch { best: Some(best) } => assert_eq!(best.id, ranked[0].id),
		other => panic!("expected no match, got {:?}", other),
	}
	assert_eq!(ranked.len(), 3);

	let (_, ranked) = pipeline.recognize_ranked(&solid(8, 8, [200, 120, 0]), 0);
	assert!(ranked.is_empty());
}
