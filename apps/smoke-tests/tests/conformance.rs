mod common;

use anyhow::Result;
use image::{GenericImageView, ImageFormat};
use imgzip_core::{
    compress, compress_to_path, CompressConfig, CompressError, Dimensions, ErrorCode, Quality, RasterCodec, SizeBudget,
    DEFAULT_BUDGET_BYTES,
};
use imgzip_image::{decoded_dimensions, load_raster, ImageCodec};
use imgzip_telemetry::sink_for_mode;
use common::{dir_entries, gradient_image, noise_image, write_image};

fn config(quality: u8, scratch: &std::path::Path) -> Result<CompressConfig> {
    Ok(CompressConfig {
        quality: Quality::new(quality)?,
        budget: SizeBudget::default(),
        scratch_dir: Some(scratch.to_path_buf()),
    })
}

#[test]
fn oversized_noise_gets_one_corrective_pass() -> Result<()> {
    let work = tempfile::tempdir()?;
    let scratch = tempfile::tempdir()?;
    let input = write_image(work.path(), "noise.png", &noise_image(1400, 1200, 7), ImageFormat::Png)?;
    let output = work.path().join("noise_compressed.jpg");

    let codec = ImageCodec::default();
    let raster = load_raster(&input)?;
    let outcome = compress_to_path(&codec, raster, &config(100, scratch.path())?, &output, None)?;

    assert_eq!(outcome.prescaled, Dimensions::new(1400, 1200));
    assert!(outcome.trial_bytes > DEFAULT_BUDGET_BYTES);
    let factor = outcome.corrective_scale.expect("corrective pass should run");
    assert!(factor > 0.0 && factor < 1.0);
    assert!(outcome.final_dimensions.fits_within(outcome.original));
    assert!(outcome.final_dimensions.width < 1400);

    let drift = (outcome.final_dimensions.aspect_ratio() - outcome.original.aspect_ratio()).abs();
    assert!(drift < 0.01, "aspect drift {drift}");

    // Best effort: a single square-root pass lands close to the budget on noise.
    let written = std::fs::read(&output)?;
    assert_eq!(written, outcome.encoded);
    assert!((written.len() as f64) < DEFAULT_BUDGET_BYTES as f64 * 1.25);

    assert_eq!(decoded_dimensions(&written)?, outcome.final_dimensions);
    assert!(dir_entries(scratch.path())?.is_empty());
    Ok(())
}

#[test]
fn small_image_at_quality_100_keeps_its_size() -> Result<()> {
    let work = tempfile::tempdir()?;
    let input = write_image(work.path(), "tiny.png", &gradient_image(64, 48), ImageFormat::Png)?;

    let codec = ImageCodec::default();
    let outcome = compress(&codec, codec.load(&input)?, &config(100, work.path())?, None)?;

    assert_eq!(outcome.final_dimensions, Dimensions::new(64, 48));
    assert_eq!(outcome.corrective_scale, None);
    assert_eq!(codec.dimensions(&outcome.raster), Dimensions::new(64, 48));
    assert_eq!(decoded_dimensions(&outcome.encoded)?, Dimensions::new(64, 48));
    assert_eq!(dir_entries(work.path())?, vec![input]);
    Ok(())
}

#[test]
fn low_quality_prescales_geometry() -> Result<()> {
    let work = tempfile::tempdir()?;
    let input = write_image(work.path(), "wide.jpg", &gradient_image(1000, 500), ImageFormat::Jpeg)?;

    let codec = ImageCodec::default();
    let outcome = compress(&codec, codec.load(&input)?, &config(5, work.path())?, None)?;

    assert_eq!(outcome.quality_scale, 0.1);
    assert_eq!(outcome.prescaled, Dimensions::new(100, 50));
    assert_eq!(outcome.final_dimensions, outcome.prescaled);
    assert_eq!(image::load_from_memory(&outcome.encoded)?.dimensions(), (100, 50));
    Ok(())
}

#[test]
fn telemetry_file_sink_records_the_run() -> Result<()> {
    let work = tempfile::tempdir()?;
    let log = work.path().join("telemetry.jsonl");
    let input = write_image(work.path(), "photo.png", &gradient_image(120, 90), ImageFormat::Png)?;
    let sink = sink_for_mode("file", log.to_str()).expect("file sink");

    let codec = ImageCodec::default();
    compress(&codec, codec.load(&input)?, &config(60, work.path())?, Some(sink.as_ref()))?;

    let events: Vec<String> = std::fs::read_to_string(&log)?
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).map(|v| v["eventType"].to_string()))
        .collect::<serde_json::Result<_>>()?;
    assert_eq!(events, vec!["\"CompressStart\"", "\"TrialEncoded\"", "\"CompressSuccess\""]);
    Ok(())
}

#[test]
fn corrupt_input_is_a_decode_error() -> Result<()> {
    let work = tempfile::tempdir()?;
    let input = work.path().join("broken.jpg");
    std::fs::write(&input, [0xFF, 0xD8, 0xFF, 0x00, 0x13, 0x37])?;

    let err = load_raster(&input).expect_err("corrupt jpeg should not decode");
    assert_eq!(err.code(), ErrorCode::DecodeError);

    let missing = load_raster(&work.path().join("absent.png")).expect_err("missing file");
    assert!(matches!(missing, CompressError::FileNotFound(_)));
    Ok(())
}
