//! Subject crop from YOLOv8-style detector output

use image::imageops;

use crate::core::RawImage;

/// A box in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
	pub x: f32,
	pub y: f32,
	pub width: f32,
	pub height: f32,
	pub confidence: f32,
	pub class: usize,
}

/// Pick the single most confident box.
///
/// `output` is the `[4 + classes, anchors]` head (row-major, batch dropped):
/// rows 0..4 hold `cx, cy, w, h` in detector-input pixels, the remaining rows
/// hold per-class scores. The detector input was a stretched `input_size`
/// square, so x and y scale back independently.
pub fn best_detection(
	output: &[f32],
	classes: usize,
	anchors: usize,
	input_size: u32,
	image_width: u32,
	image_height: u32,
	min_confidence: f32,
) -> Option<Detection> {
	if output.len() < (4 + classes) * anchors || input_size == 0 {
		return None;
	}

	let row = |r: usize, a: usize| output[r * anchors + a];
	let sx = image_width as f32 / input_size as f32;
	let sy = image_height as f32 / input_size as f32;

	let mut best: Option<Detection> = None;
	let mut best_conf = min_confidence;

	for a in 0..anchors {
		let (class, score) = (0..classes)
			.map(|c| (c, row(4 + c, a)))
			.fold((0, f32::MIN), |acc, cur| if cur.1 > acc.1 { cur } else { acc });

		if score <= best_conf {
			continue;
		}
		best_conf = score;

		let w = row(2, a) * sx;
		let h = row(3, a) * sy;
		let left = (row(0, a) * sx - w / 2.0).max(0.0);
		let top = (row(1, a) * sy - h / 2.0).max(0.0);

		best = Some(Detection { x: left, y: top, width: w, height: h, confidence: score, class });
	}

	best
}

/// Crop to a detection, clamped to the image. Degenerate boxes yield `None`.
pub fn crop_to(image: &RawImage, det: &Detection) -> Option<RawImage> {
	let (iw, ih) = (image.width(), image.height());
	let x = (det.x.max(0.0) as u32).min(iw);
	let y = (det.y.max(0.0) as u32).min(ih);
	let w = (det.width.max(0.0) as u32).min(iw - x);
	let h = (det.height.max(0.0) as u32).min(ih - y);

	if w == 0 || h == 0 {
		return None;
	}

	let cropped = imageops::crop_imm(image.as_rgb(), x, y, w, h).to_image();
	RawImage::from_rgb_image(cropped).ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn head(boxes: &[([f32; 4], [f32; 2])]) -> Vec<f32> {
		let anchors = boxes.len();
		let mut out = vec![0.0; 6 * anchors];
		for (a, (coords, scores)) in boxes.iter().enumerate() {
			for r in 0..4 {
				out[r * anchors + a] = coords[r];
			}
			for c in 0..2 {
				out[(4 + c) * anchors + a] = scores[c];
			}
		}
		out
	}

	#[test]
	fn picks_highest_class_score() {
		let out = head(&[
			([320.0, 320.0, 100.0, 100.0], [0.3, 0.1]),
			([160.0, 160.0, 64.0, 64.0], [0.2, 0.9]),
		]);
		let det = best_detection(&out, 2, 2, 640, 1280, 640, 0.25).unwrap();
		assert_eq!(det.class, 1);
		assert!((det.confidence - 0.9).abs() < 1e-6);
		assert!((det.width - 128.0).abs() < 1e-3);
		assert!((det.x - 256.0).abs() < 1e-3);
	}

	#[test]
	fn nothing_above_threshold() {
		let out = head(&[([10.0, 10.0, 5.0, 5.0], [0.1, 0.2])]);
		assert!(best_detection(&out, 2, 1, 640, 640, 640, 0.25).is_none());
	}

	#[test]
	fn crop_is_clamped() {
		let img = RawImage::from_rgb(10, 10, vec![7; 300]).unwrap();
		let det = Detection { x: 6.0, y: 6.0, width: 20.0, height: 20.0, confidence: 1.0, class: 0 };
		let cropped = crop_to(&img, &det).unwrap();
		assert_eq!((cropped.width(), cropped.height()), (4, 4));

		let empty = Detection { width: 0.0, ..det };
		assert!(crop_to(&img, &empty).is_none());
	}
}
