//! Letterbox resize and tensor serialization

use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::config::{VisionProfile, CLIP_MEAN, CLIP_STD};
use crate::core::RawImage;
use crate::error::{Error, Result};

/// Padding color for the unused part of the canvas.
pub const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// Per-channel mapping from `[0, 255]` to model input values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalization {
	/// `(v/255 - mean[c]) / std[c]`
	MeanStd { mean: [f32; 3], std: [f32; 3] },
	/// `v * scale + offset`
	Scale { scale: f32, offset: f32 },
}

impl Normalization {
	pub fn clip() -> Self {
		Self::MeanStd { mean: CLIP_MEAN, std: CLIP_STD }
	}

	/// `v / 255`
	pub fn unit() -> Self {
		Self::Scale { scale: 1.0 / 255.0, offset: 0.0 }
	}

	/// `v / 127.5 - 1`
	pub fn symmetric() -> Self {
		Self::Scale { scale: 1.0 / 127.5, offset: -1.0 }
	}

	#[inline]
	pub fn apply(&self, value: u8, channel: usize) -> f32 {
		let v = value as f32;
		match self {
			Self::MeanStd { mean, std } => (v / 255.0 - mean[channel]) / std[channel],
			Self::Scale { scale, offset } => v * scale + offset,
		}
	}
}

/// Memory order of the input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
	/// `[1, H, W, 3]`, channels interleaved per pixel
	Hwc,
	/// `[1, 3, H, W]`, one plane per channel
	Chw,
}

/// Where the scaled image sits inside the square canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRect {
	pub x: u32,
	pub y: u32,
	pub width: u32,
	pub height: u32,
}

#[derive(Debug, Clone)]
pub struct Letterbox {
	pub canvas: RgbImage,
	pub content: ContentRect,
}

/// Fit `image` inside a `size`×`size` black canvas without distorting it.
///
/// The longer side becomes exactly `size`; the shorter side is scaled by the
/// same factor and centered, leaving equal bands of padding on either side
/// (the extra pixel goes to the bottom/right when the band is odd).
pub fn letterbox(image: &RgbImage, size: u32) -> Letterbox {
	let (w, h) = image.dimensions();
	let long = w.max(h) as f64;
	let scale = size as f64 / long;

	let fit = |side: u32| ((side as f64 * scale).round() as u32).clamp(1, size);
	let (new_w, new_h) = if w >= h { (size, fit(h)) } else { (fit(w), size) };

	let mut canvas = RgbImage::from_pixel(size, size, BACKGROUND);
	let left = (size - new_w) / 2;
	let top = (size - new_h) / 2;

	if (new_w, new_h) == (w, h) {
		imageops::replace(&mut canvas, image, left as i64, top as i64);
	} else {
		let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
		imageops::replace(&mut canvas, &resized, left as i64, top as i64);
	}

	Letterbox {
		canvas,
		content: ContentRect { x: left, y: top, width: new_w, height: new_h },
	}
}

/// Model input: float32, shape `[1, 3, S, S]` or `[1, S, S, 3]` depending on layout.
#[derive(Debug, Clone)]
pub struct Tensor {
	data: Array4<f32>,
	layout: Layout,
}

impl Tensor {
	pub fn layout(&self) -> Layout {
		self.layout
	}

	pub fn shape(&self) -> [usize; 4] {
		let s = self.data.shape();
		[s[0], s[1], s[2], s[3]]
	}

	/// Value for pixel `(x, y)`, channel `c`, independent of layout.
	pub fn at(&self, x: usize, y: usize, c: usize) -> f32 {
		match self.layout {
			Layout::Hwc => self.data[[0, y, x, c]],
			Layout::Chw => self.data[[0, c, y, x]],
		}
	}

	/// Flat buffer in memory order.
	pub fn as_slice(&self) -> &[f32] {
		self.data.as_slice().unwrap_or(&[])
	}

	/// Shape and flat buffer, ready for an ONNX input.
	pub fn into_parts(self) -> (Vec<usize>, Vec<f32>) {
		let shape = self.shape().to_vec();
		let (data, _) = self.data.into_raw_vec_and_offset();
		(shape, data)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePreprocessor {
	pub size: u32,
	pub normalization: Normalization,
	pub layout: Layout,
}

impl ImagePreprocessor {
	pub fn new(size: u32, normalization: Normalization, layout: Layout) -> Self {
		Self { size, normalization, layout }
	}

	pub fn from_profile(profile: &VisionProfile) -> Self {
		Self::new(profile.input_size, profile.normalization, profile.layout)
	}

	pub fn letterbox(&self, image: &RawImage) -> Letterbox {
		letterbox(image.as_rgb(), self.size)
	}

	pub fn preprocess(&self, image: &RawImage) -> Result<Tensor> {
		if self.size == 0 {
			return Err(Error::InvalidImage("target size must be non-zero".to_string()));
		}
		let boxed = self.letterbox(image);
		Ok(self.to_tensor(&boxed.canvas))
	}

	/// Serialize an already square `size`×`size` canvas.
	pub fn to_tensor(&self, canvas: &RgbImage) -> Tensor {
		let size = self.size as usize;
		let shape = match self.layout {
			Layout::Hwc => (1, size, size, 3),
			Layout::Chw => (1, 3, size, size),
		};
		let mut data = Array4::<f32>::zeros(shape);

		for (x, y, px) in canvas.enumerate_pixels() {
			let (x, y) = (x as usize, y as usize);
			if x >= size || y >= size {
				continue;
			}
			for c in 0..3 {
				let v = self.normalization.apply(px[c], c);
				match self.layout {
					Layout::Hwc => data[[0, y, x, c]] = v,
					Layout::Chw => data[[0, c, y, x]] = v,
				}
			}
		}

		Tensor { data, layout: self.layout }
	}
}
