//! Optional YOLOv8 detector that narrows a photo down to the artwork

use image::imageops::{self, FilterType};
use ort::session::Session;
use std::path::Path;

use crate::config::{DETECTOR_INPUT_SIZE, DETECTOR_MIN_CONFIDENCE};
use crate::core::RawImage;
use crate::error::{Error, Result};
use crate::processing::{best_detection, crop_to, Detection, ImagePreprocessor, Layout, Normalization};
use crate::runtime::{create_session, SessionOptions};
use crate::ui;

pub struct Detector {
	session: Session,
	preprocessor: ImagePreprocessor,
	min_confidence: f32,
}

impl Detector {
	pub fn load(model_path: &Path, options: SessionOptions) -> Result<Self> {
		let session = create_session(model_path, options)?;
		Ok(Self {
			session,
			preprocessor: ImagePreprocessor::new(DETECTOR_INPUT_SIZE, Normalization::unit(), Layout::Chw),
			min_confidence: DETECTOR_MIN_CONFIDENCE,
		})
	}

	pub fn detect(&mut self, image: &RawImage) -> Result<Option<Detection>> {
		let size = self.preprocessor.size;
		// The detector was trained on stretched input, not letterboxed.
		let stretched = imageops::resize(image.as_rgb(), size, size, FilterType::Triangle);
		let tensor = self.preprocessor.to_tensor(&stretched);

		let input = ort::value::Tensor::from_array(tensor.into_parts())?;
		let outputs = self.session.run(ort::inputs!["images" => input])?;
		let (_, head) = outputs
			.iter()
			.next()
			.ok_or_else(|| Error::Inference("detector produced no outputs".to_string()))?;
		let (shape, data) = head.try_extract_tensor::<f32>()?;

		let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
		let [1, rows, anchors] = dims[..] else {
			return Err(Error::Inference(format!("unexpected detector output shape {:?}", dims)));
		};
		if rows <= 4 {
			return Err(Error::Inference(format!("detector output has {} rows", rows)));
		}

		Ok(best_detection(
			data,
			rows - 4,
			anchors,
			size,
			image.width(),
			image.height(),
			self.min_confidence,
		))
	}

	/// Crop to the detected artwork, or hand back the full frame when nothing
	/// usable was found.
	pub fn crop_subject(&mut self, image: &RawImage) -> RawImage {
		match self.detect(image) {
			Ok(Some(det)) => match crop_to(image, &det) {
				Some(cropped) => {
					ui::debug(&format!(
						"Cropped to {:.0}x{:.0} at ({:.0}, {:.0}), confidence {:.2}",
						det.width, det.height, det.x, det.y, det.confidence
					));
					cropped
				}
				None => image.clone(),
			},
			Ok(None) => {
				ui::debug("No subject detected, using full frame");
				image.clone()
			}
			Err(e) => {
				ui::warn(&format!("Detector failed, using full frame: {}", e));
				image.clone()
			}
		}
	}
}
