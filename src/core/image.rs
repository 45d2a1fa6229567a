//! Decoded camera frames handed to the recognition pipeline

use image::{DynamicImage, RgbImage};
use std::path::Path;

use crate::error::{Error, Result};

/// An RGB bitmap with at least one pixel. Alpha is discarded on the way in.
#[derive(Debug, Clone)]
pub struct RawImage {
	pixels: RgbImage,
}

impl RawImage {
	pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
		check_dims(width, height)?;
		let expected = width as usize * height as usize * 3;
		if data.len() != expected {
			return Err(Error::InvalidImage(format!(
				"RGB buffer has {} bytes, expected {} for {}x{}",
				data.len(),
				expected,
				width,
				height
			)));
		}
		let pixels = RgbImage::from_raw(width, height, data)
			.ok_or_else(|| Error::InvalidImage("RGB buffer rejected".to_string()))?;
		Ok(Self { pixels })
	}

	pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
		check_dims(width, height)?;
		let expected = width as usize * height as usize * 4;
		if data.len() != expected {
			return Err(Error::InvalidImage(format!(
				"RGBA buffer has {} bytes, expected {} for {}x{}",
				data.len(),
				expected,
				width,
				height
			)));
		}
		let rgb: Vec<u8> = data.chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]).collect();
		Self::from_rgb(width, height, rgb)
	}

	pub fn from_dynamic(image: DynamicImage) -> Result<Self> {
		check_dims(image.width(), image.height())?;
		Ok(Self { pixels: image.to_rgb8() })
	}

	/// Decode an image file (fixtures, snapshots saved to disk).
	pub fn open(path: &Path) -> Result<Self> {
		let img = image::ImageReader::open(path)?
			.with_guessed_format()?
			.decode()
			.map_err(|e| Error::InvalidImage(format!("{}: {}", path.display(), e)))?;
		Self::from_dynamic(img)
	}

	/// Decode from encoded bytes (e.g. a JPEG snapshot body).
	pub fn decode(bytes: &[u8]) -> Result<Self> {
		let img = image::load_from_memory(bytes).map_err(|e| Error::InvalidImage(e.to_string()))?;
		Self::from_dynamic(img)
	}

	pub fn width(&self) -> u32 {
		self.pixels.width()
	}

	pub fn height(&self) -> u32 {
		self.pixels.height()
	}

	pub fn as_rgb(&self) -> &RgbImage {
		&self.pixels
	}

	pub(crate) fn from_rgb_image(pixels: RgbImage) -> Result<Self> {
		check_dims(pixels.width(), pixels.height())?;
		Ok(Self { pixels })
	}
}

fn check_dims(width: u32, height: u32) -> Result<()> {
	if width == 0 || height == 0 {
		return Err(Error::InvalidImage(format!("empty image ({}x{})", width, height)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_image_is_invalid() {
		let err = RawImage::from_rgb(0, 10, vec![]).unwrap_err();
		assert_eq!(err.kind(), crate::ErrorKind::InvalidImage);
	}

	#[test]
	fn short_buffer_is_invalid() {
		assert!(RawImage::from_rgba(2, 2, vec![0; 15]).is_err());
	}

	#[test]
	fn rgba_drops_alpha() {
		let img = RawImage::from_rgba(1, 1, vec![10, 20, 30, 0]).unwrap();
		assert_eq!(img.as_rgb().get_pixel(0, 0).0, [10, 20, 30]);
	}

	#[test]
	fn garbage_bytes_do_not_decode() {
		let err = RawImage::decode(b"definitely not a jpeg").unwrap_err();
		assert_eq!(err.kind(), crate::ErrorKind::InvalidImage);
	}
}
