use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod compress;

pub use compress::{compress, compress_to_path, CompressOutcome, CompressSummary};

pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_BUDGET_BYTES: u64 = 1024 * 1024;
pub const MIN_QUALITY_SCALE: f64 = 0.1;
pub const SCRATCH_DIR_ENV: &str = "IMGZIP_SCRATCH_DIR";

/// JPEG quality factor, always within 1..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Quality(u8);

impl Quality {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 100;

    pub fn new(value: u8) -> Result<Self, CompressError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CompressError::InvalidQuality(value.to_string()))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Geometric pre-scale implied by the quality: low quality accepts smaller geometry.
    pub fn geometry_scale(self) -> f64 {
        (f64::from(self.0) / 100.0).max(MIN_QUALITY_SCALE)
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(DEFAULT_QUALITY)
    }
}

impl FromStr for Quality {
    type Err = CompressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value: i64 = trimmed
            .parse()
            .map_err(|_| CompressError::InvalidQuality(trimmed.to_string()))?;
        u8::try_from(value)
            .map_err(|_| CompressError::InvalidQuality(trimmed.to_string()))
            .and_then(Self::new)
    }
}

impl TryFrom<u8> for Quality {
    type Error = CompressError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quality> for u8 {
    fn from(quality: Quality) -> Self {
        quality.0
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte threshold for the trial encode. Advisory for the final output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SizeBudget(u64);

impl SizeBudget {
    pub fn new(bytes: u64) -> Self {
        Self(bytes.max(1))
    }

    pub fn bytes(self) -> u64 {
        self.0
    }

    pub fn is_exceeded_by(self, measured: u64) -> bool {
        measured > self.0
    }

    /// Uniform per-axis factor for a measured size over budget.
    ///
    /// Encoded size tracks image area, so the per-axis factor is the square
    /// root of the byte ratio. Never exceeds 1.0.
    pub fn corrective_scale(self, measured: u64) -> f64 {
        if measured == 0 {
            return 1.0;
        }
        (self.0 as f64 / measured as f64).sqrt().min(1.0)
    }
}

impl Default for SizeBudget {
    fn default() -> Self {
        Self(DEFAULT_BUDGET_BYTES)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Uniform downscale: `floor(dim * factor)`, at least one pixel per axis.
    ///
    /// The factor is clamped to `(0, 1]` so the result never exceeds `self`.
    pub fn scale(self, factor: f64) -> Self {
        let factor = if factor.is_finite() { factor.clamp(f64::MIN_POSITIVE, 1.0) } else { 1.0 };
        let axis = |value: u32| ((f64::from(value) * factor).floor() as u32).clamp(1, value.max(1));
        Self {
            width: axis(self.width),
            height: axis(self.height),
        }
    }

    pub fn aspect_ratio(self) -> f64 {
        f64::from(self.width) / f64::from(self.height.max(1))
    }

    pub fn fits_within(self, other: Dimensions) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    pub fn pixel_count(self) -> u64 {
        u64::from(self.width).saturating_mul(u64::from(self.height))
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Decode/resize/encode capability the compressor drives.
pub trait RasterCodec {
    type Raster;

    fn dimensions(&self, raster: &Self::Raster) -> Dimensions;

    /// Produces a new raster at exactly `target`; the source is left untouched.
    fn resize(&self, raster: &Self::Raster, target: Dimensions) -> Result<Self::Raster, CompressError>;

    fn encode_to(&self, raster: &Self::Raster, quality: Quality, out: &mut dyn io::Write) -> Result<(), CompressError>;

    fn encode(&self, raster: &Self::Raster, quality: Quality) -> Result<Vec<u8>, CompressError> {
        let mut out = Vec::new();
        self.encode_to(raster, quality, &mut out)?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEventType {
    CompressStart,
    TrialEncoded,
    CorrectiveResize,
    CompressSuccess,
    CompressError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_type: TelemetryEventType,
    pub quality: Quality,
    pub duration_ms: Option<u64>,
    pub detail: Option<String>,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("quality must be a number between 1-100 (received: '{0}')")]
    InvalidQuality(String),
    #[error("input file does not exist: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("cannot open image {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("invalid dimensions: width ({width}) and height ({height}) must be non-zero")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("scratch file error: {0}")]
    TempResource(#[source] io::Error),
    #[error("jpeg encoding failed: {0}")]
    Encode(String),
    #[error("output file already exists: {}", .0.display())]
    OutputExists(PathBuf),
    #[error("failed to write output {}: {source}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InputError,
    FileNotFound,
    DecodeError,
    TempResourceError,
    EncodeError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl CompressError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidQuality(_) => ErrorCode::InputError,
            Self::FileNotFound(_) => ErrorCode::FileNotFound,
            Self::Decode { .. } | Self::InvalidDimensions { .. } => ErrorCode::DecodeError,
            Self::TempResource(_) => ErrorCode::TempResourceError,
            Self::Encode(_) | Self::OutputExists(_) | Self::OutputWrite { .. } => ErrorCode::EncodeError,
        }
    }

    pub fn as_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressConfig {
    pub quality: Quality,
    pub budget: SizeBudget,
    pub scratch_dir: Option<PathBuf>,
}

/// Layers defaults, then the environment, then explicit overrides.
pub fn resolve_compress_config(overrides: CompressConfig) -> CompressConfig {
    let mut cfg = CompressConfig::default();
    if let Some(dir) = std::env::var_os(SCRATCH_DIR_ENV).filter(|v| !v.is_empty()) {
        cfg.scratch_dir = Some(PathBuf::from(dir));
    }
    cfg.quality = overrides.quality;
    cfg.budget = overrides.budget;
    if overrides.scratch_dir.is_some() {
        cfg.scratch_dir = overrides.scratch_dir;
    }
    cfg
}

/// Size comparison printed after a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeReport {
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub original_kb: u64,
    pub compressed_kb: u64,
    pub ratio_percent: f64,
}

impl SizeReport {
    pub fn new(original_bytes: u64, compressed_bytes: u64) -> Self {
        let ratio_percent = if original_bytes == 0 {
            0.0
        } else {
            compressed_bytes as f64 / original_bytes as f64 * 100.0
        };
        Self {
            original_bytes,
            compressed_bytes,
            original_kb: original_bytes / 1024,
            compressed_kb: compressed_bytes / 1024,
            ratio_percent,
        }
    }
}

impl fmt::Display for SizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Original size: {} KB", self.original_kb)?;
        writeln!(f, "Compressed size: {} KB", self.compressed_kb)?;
        write!(f, "Compression ratio: {:.2}%", self.ratio_percent)
    }
}
