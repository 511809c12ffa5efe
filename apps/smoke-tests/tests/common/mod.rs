//! Fixtures shared by the end-to-end conformance tests.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};

/// Deterministic RGB noise; compresses poorly, so it reliably exceeds size budgets.
pub fn noise_image(width: u32, height: u32, seed: u32) -> DynamicImage {
    let mut state = seed.max(1);
    let mut next = move || {
        // xorshift32
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    };
    DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |_, _| {
        let v = next();
        Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
    }))
}

pub fn gradient_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 96])
    }))
}

pub fn write_image(dir: &Path, name: &str, image: &DynamicImage, format: ImageFormat) -> Result<PathBuf> {
    let path = dir.join(name);
    image
        .save_with_format(&path, format)
        .with_context(|| format!("writing fixture {}", path.display()))?;
    Ok(path)
}

pub fn dir_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}
