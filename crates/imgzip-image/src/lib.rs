//! `image`-crate backend for the size-targeting compressor.
//!
//! Decodes input files into [`DynamicImage`] rasters, resizes them with a
//! Lanczos3 filter and encodes them as baseline JPEG.

use std::io::Write;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, ImageError};
use imgzip_core::{CompressError, Dimensions, Quality, RasterCodec};

#[derive(Debug, Clone, Copy)]
pub struct ImageCodec {
    filter: FilterType,
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }
}

impl ImageCodec {
    pub fn load(&self, path: &Path) -> Result<DynamicImage, CompressError> {
        load_raster(path)
    }
}

impl RasterCodec for ImageCodec {
    type Raster = DynamicImage;

    fn dimensions(&self, raster: &DynamicImage) -> Dimensions {
        let (width, height) = raster.dimensions();
        Dimensions::new(width, height)
    }

    fn resize(&self, raster: &DynamicImage, target: Dimensions) -> Result<DynamicImage, CompressError> {
        if target.is_empty() {
            return Err(CompressError::InvalidDimensions {
                width: target.width,
                height: target.height,
            });
        }
        Ok(raster.resize_exact(target.width, target.height, self.filter))
    }

    fn encode_to(&self, raster: &DynamicImage, quality: Quality, out: &mut dyn Write) -> Result<(), CompressError> {
        write_jpeg(raster, quality, out)
    }
}

/// Reads and decodes an image file, guessing the format from its contents.
pub fn load_raster(path: &Path) -> Result<DynamicImage, CompressError> {
    if !path.exists() {
        return Err(CompressError::FileNotFound(path.to_path_buf()));
    }
    let decode_err = |reason: String| CompressError::Decode {
        path: path.to_path_buf(),
        reason,
    };
    let raster = image::ImageReader::open(path)
        .map_err(|e| decode_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_err(e.to_string()))?
        .decode()
        .map_err(|e| decode_err(e.to_string()))?;

    let (width, height) = raster.dimensions();
    if width == 0 || height == 0 {
        return Err(CompressError::InvalidDimensions { width, height });
    }
    tracing::debug!(
        path = %path.display(),
        width,
        height,
        color = ?raster.color(),
        rgba_bytes = estimate_rgba_bytes(Dimensions::new(width, height)),
        "decoded input image"
    );
    Ok(raster)
}

/// Encodes a raster to JPEG bytes at the given quality.
pub fn encode_jpeg(raster: &DynamicImage, quality: Quality) -> Result<Vec<u8>, CompressError> {
    let mut out = Vec::new();
    write_jpeg(raster, quality, &mut out)?;
    Ok(out)
}

/// Reads back the dimensions of encoded image bytes.
pub fn decoded_dimensions(bytes: &[u8]) -> Result<Dimensions, CompressError> {
    let raster = image::load_from_memory(bytes).map_err(|e| CompressError::Decode {
        path: "<memory>".into(),
        reason: e.to_string(),
    })?;
    let (width, height) = raster.dimensions();
    Ok(Dimensions::new(width, height))
}

pub fn estimate_rgba_bytes(size: Dimensions) -> u64 {
    size.pixel_count().saturating_mul(4)
}

fn write_jpeg(raster: &DynamicImage, quality: Quality, out: &mut dyn Write) -> Result<(), CompressError> {
    let (width, height) = raster.dimensions();
    if width == 0 || height == 0 {
        return Err(CompressError::InvalidDimensions { width, height });
    }

    // JPEG carries no alpha and only 8-bit samples.
    let (pixels, color) = match raster.color() {
        ColorType::L8 | ColorType::L16 | ColorType::La8 | ColorType::La16 => {
            (raster.to_luma8().into_raw(), ExtendedColorType::L8)
        }
        _ => (raster.to_rgb8().into_raw(), ExtendedColorType::Rgb8),
    };

    let encoder = JpegEncoder::new_with_quality(out, quality.get());
    encoder
        .write_image(&pixels, width, height, color)
        .map_err(encode_error)
}

fn encode_error(err: ImageError) -> CompressError {
    match err {
        ImageError::IoError(io) => CompressError::Encode(format!("write failed: {}", io)),
        other => CompressError::Encode(other.to_string()),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Decoding the encoded bytes yields the raster's dimensions.
        #[test]
        fn prop_encode_then_decode_keeps_dimensions(
            width in 1u32..=64,
            height in 1u32..=64,
            q in 1u8..=100,
        ) {
            let raster = DynamicImage::new_rgb8(width, height);
            let jpeg = encode_jpeg(&raster, Quality::new(q).expect("valid quality")).expect("encode");
            prop_assert_eq!(decoded_dimensions(&jpeg).expect("decode"), Dimensions::new(width, height));
        }
    }
}
