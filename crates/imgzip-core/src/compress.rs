use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::{
    CompressConfig, CompressError, Dimensions, Quality, RasterCodec, SizeBudget, TelemetryEvent, TelemetryEventType,
    TelemetrySink,
};

const SCRATCH_PREFIX: &str = "imgzip-trial-";
const SCRATCH_SUFFIX: &str = ".jpg";

/// Result of a size-targeted compression: the final raster and its JPEG bytes.
#[derive(Debug, Clone)]
pub struct CompressOutcome<R> {
    pub raster: R,
    pub encoded: Vec<u8>,
    pub original: Dimensions,
    pub prescaled: Dimensions,
    pub final_dimensions: Dimensions,
    pub quality: Quality,
    pub quality_scale: f64,
    pub trial_bytes: u64,
    pub corrective_scale: Option<f64>,
}

impl<R> CompressOutcome<R> {
    pub fn summary(&self) -> CompressSummary {
        CompressSummary {
            original: self.original,
            prescaled: self.prescaled,
            final_dimensions: self.final_dimensions,
            quality: self.quality,
            quality_scale: self.quality_scale,
            trial_bytes: self.trial_bytes,
            corrective_scale: self.corrective_scale,
            encoded_bytes: self.encoded.len() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressSummary {
    pub original: Dimensions,
    pub prescaled: Dimensions,
    pub final_dimensions: Dimensions,
    pub quality: Quality,
    pub quality_scale: f64,
    pub trial_bytes: u64,
    pub corrective_scale: Option<f64>,
    pub encoded_bytes: u64,
}

/// Re-encodes `raster` as JPEG, shrinking it so the trial encode targets the budget.
///
/// The raster is first scaled by the quality's geometry scale, then trial
/// encoded into a scratch file. When that trial exceeds the budget a single
/// corrective resize by `sqrt(budget / trial)` follows. A final overshoot is
/// not an error.
pub fn compress<C: RasterCodec>(
    codec: &C,
    raster: C::Raster,
    config: &CompressConfig,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<CompressOutcome<C::Raster>, CompressError> {
    let start = Instant::now();
    emit(telemetry, TelemetryEventType::CompressStart, config.quality, None, None);

    match run_compress(codec, raster, config, telemetry) {
        Ok(outcome) => {
            emit(
                telemetry,
                TelemetryEventType::CompressSuccess,
                config.quality,
                Some(elapsed_ms(start)),
                Some(format!(
                    "original={},final={},bytes={}",
                    outcome.original,
                    outcome.final_dimensions,
                    outcome.encoded.len()
                )),
            );
            Ok(outcome)
        }
        Err(err) => {
            emit(
                telemetry,
                TelemetryEventType::CompressError,
                config.quality,
                Some(elapsed_ms(start)),
                Some(err.to_string()),
            );
            Err(err)
        }
    }
}

/// Runs [`compress`] and writes the encoded bytes to `output`.
///
/// `output` must not exist yet. If writing fails the partially written file is
/// removed, so the path either holds the complete JPEG or nothing.
pub fn compress_to_path<C: RasterCodec>(
    codec: &C,
    raster: C::Raster,
    config: &CompressConfig,
    output: &Path,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<CompressOutcome<C::Raster>, CompressError> {
    if output.exists() {
        return Err(CompressError::OutputExists(output.to_path_buf()));
    }
    let outcome = compress(codec, raster, config, telemetry)?;
    write_output(output, &outcome.encoded)?;
    tracing::debug!(path = %output.display(), bytes = outcome.encoded.len(), "wrote compressed image");
    Ok(outcome)
}

fn run_compress<C: RasterCodec>(
    codec: &C,
    raster: C::Raster,
    config: &CompressConfig,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<CompressOutcome<C::Raster>, CompressError> {
    let quality = config.quality;
    let original = codec.dimensions(&raster);
    if original.is_empty() {
        return Err(CompressError::InvalidDimensions {
            width: original.width,
            height: original.height,
        });
    }

    let quality_scale = quality.geometry_scale();
    let prescaled = original.scale(quality_scale);
    let scaled = resize_if_needed(codec, raster, original, prescaled)?;
    tracing::debug!(%original, %prescaled, quality_scale, "applied quality pre-scale");

    let trial_start = Instant::now();
    let trial_bytes = trial_encode(codec, &scaled, quality, config.scratch_dir.as_deref())?;
    emit(
        telemetry,
        TelemetryEventType::TrialEncoded,
        quality,
        Some(elapsed_ms(trial_start)),
        Some(format!("bytes={},budget={}", trial_bytes, config.budget.bytes())),
    );

    let (final_raster, corrective_scale) = correct_for_budget(codec, scaled, prescaled, trial_bytes, config.budget)?;
    let final_dimensions = codec.dimensions(&final_raster);
    if let Some(factor) = corrective_scale {
        emit(
            telemetry,
            TelemetryEventType::CorrectiveResize,
            quality,
            None,
            Some(format!("scale={:.4},from={},to={}", factor, prescaled, final_dimensions)),
        );
    }

    let encoded = codec.encode(&final_raster, quality)?;
    if config.budget.is_exceeded_by(encoded.len() as u64) {
        tracing::debug!(
            bytes = encoded.len(),
            budget = config.budget.bytes(),
            "final encode still over budget after corrective pass"
        );
    }

    Ok(CompressOutcome {
        raster: final_raster,
        encoded,
        original,
        prescaled,
        final_dimensions,
        quality,
        quality_scale,
        trial_bytes,
        corrective_scale,
    })
}

fn correct_for_budget<C: RasterCodec>(
    codec: &C,
    raster: C::Raster,
    current: Dimensions,
    trial_bytes: u64,
    budget: SizeBudget,
) -> Result<(C::Raster, Option<f64>), CompressError> {
    if !budget.is_exceeded_by(trial_bytes) {
        return Ok((raster, None));
    }
    let factor = budget.corrective_scale(trial_bytes);
    let target = current.scale(factor);
    tracing::info!(
        trial_bytes,
        budget = budget.bytes(),
        factor,
        from = %current,
        to = %target,
        "trial encode over budget, applying corrective resize"
    );
    let resized = resize_if_needed(codec, raster, current, target)?;
    Ok((resized, Some(factor)))
}

fn resize_if_needed<C: RasterCodec>(
    codec: &C,
    raster: C::Raster,
    current: Dimensions,
    target: Dimensions,
) -> Result<C::Raster, CompressError> {
    if current == target {
        return Ok(raster);
    }
    codec.resize(&raster, target)
}

/// Encodes into a scratch file and returns its size on disk.
///
/// The scratch file is deleted when the guard drops, on every return path.
fn trial_encode<C: RasterCodec>(
    codec: &C,
    raster: &C::Raster,
    quality: Quality,
    scratch_dir: Option<&Path>,
) -> Result<u64, CompressError> {
    let mut builder = Builder::new();
    builder.prefix(SCRATCH_PREFIX).suffix(SCRATCH_SUFFIX);
    let scratch = match scratch_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(CompressError::TempResource)?;
    tracing::debug!(path = %scratch.path().display(), "created scratch file");

    {
        let mut writer = BufWriter::new(scratch.as_file());
        codec.encode_to(raster, quality, &mut writer)?;
        writer.flush().map_err(CompressError::TempResource)?;
    }
    let measured = scratch.as_file().metadata().map_err(CompressError::TempResource)?.len();
    scratch.close().map_err(CompressError::TempResource)?;
    Ok(measured)
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<(), CompressError> {
    write_output_with(path, |file| file.write_all(bytes).and_then(|_| file.sync_all()))
}

/// Creates `path` exclusively and fills it with `fill`, removing it again if `fill` fails.
fn write_output_with<F>(path: &Path, fill: F) -> Result<(), CompressError>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let output_err = |source: io::Error| CompressError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new().write(true).create_new(true).open(path).map_err(|err| {
        if err.kind() == io::ErrorKind::AlreadyExists {
            CompressError::OutputExists(path.to_path_buf())
        } else {
            output_err(err)
        }
    })?;
    if let Err(err) = fill(&mut file) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(output_err(err));
    }
    Ok(())
}

fn emit(
    telemetry: Option<&dyn TelemetrySink>,
    event_type: TelemetryEventType,
    quality: Quality,
    duration_ms: Option<u64>,
    detail: Option<String>,
) {
    if let Some(sink) = telemetry {
        sink.emit(TelemetryEvent {
            event_type,
            quality,
            duration_ms,
            detail,
        });
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
