use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveTime};
use clap::Parser;
use imgzip_core::{
    compress_to_path, resolve_compress_config, CompressConfig, CompressError, Quality, SizeBudget, SizeReport,
};
use imgzip_image::ImageCodec;
use imgzip_telemetry::sink_from_env;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_ENV: &str = "IMGZIP_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "imgzip",
    version,
    about = "Re-encode an image as JPEG, shrinking it toward a 1 MiB budget",
    after_help = "The output is written to <name>_compressed_<HHMMSS><ext> in the current directory. \
An existing file at that path is never overwritten; rerunning within the same second fails. \
Telemetry selected with IMGZIP_TELEMETRY_SINK (tracing, stderr, file) never writes to stdout."
)]
struct Cli {
    /// Image to compress (JPEG, PNG, GIF, BMP or TIFF).
    input: PathBuf,
    /// JPEG quality (1-100). Lower values also shrink the geometry.
    #[arg(default_value = "80", value_parser = parse_quality)]
    quality: Quality,
    /// Print the report, or the error on failure, as JSON.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    json: bool,
    /// Include stage timings in the JSON report.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    profile: bool,
    /// Directory for the trial-encode scratch file (defaults to IMGZIP_SCRATCH_DIR, then the system temp dir).
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json = cli.json;
    run(cli).inspect_err(|err| {
        if json {
            if let Ok(line) = serde_json::to_string_pretty(&error_json(err)) {
                println!("{}", line);
            }
        }
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn parse_quality(value: &str) -> std::result::Result<Quality, String> {
    value.parse::<Quality>().map_err(|err| err.to_string())
}

fn run(cli: Cli) -> Result<()> {
    let total_start = Instant::now();
    let config = resolve_compress_config(CompressConfig {
        quality: cli.quality,
        budget: SizeBudget::default(),
        scratch_dir: cli.scratch_dir.clone(),
    });

    if !cli.input.exists() {
        return Err(CompressError::FileNotFound(cli.input.clone()).into());
    }
    let original_bytes = std::fs::metadata(&cli.input)
        .with_context(|| format!("failed to stat input {}", cli.input.display()))?
        .len();
    let output_path = output_path_for(&cli.input, Local::now().time())?;
    tracing::info!(
        input = %cli.input.display(),
        output = %output_path.display(),
        quality = config.quality.get(),
        budget = config.budget.bytes(),
        "compressing image"
    );

    let codec = ImageCodec::default();
    let decode_start = Instant::now();
    let raster = codec.load(&cli.input)?;
    let decode_done = Instant::now();

    let telemetry = sink_from_env();
    let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());
    let outcome = compress_to_path(&codec, raster, &config, &output_path, telemetry_ref)?;
    let compress_done = Instant::now();

    let compressed_bytes = std::fs::metadata(&output_path)
        .with_context(|| format!("failed to stat output {}", output_path.display()))?
        .len();
    let report = SizeReport::new(original_bytes, compressed_bytes);

    if cli.json {
        let timings = cli.profile.then(|| {
            serde_json::json!({
                "decode": decode_done.duration_since(decode_start).as_millis(),
                "compress": compress_done.duration_since(decode_done).as_millis(),
                "total": compress_done.duration_since(total_start).as_millis(),
            })
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "input": cli.input,
                "output": output_path,
                "report": report,
                "compression": outcome.summary(),
                "timingsMs": timings,
            }))?
        );
    } else {
        println!("Compression complete!");
        println!("{}", report);
        println!("Output file: {}", output_path.display());
    }
    Ok(())
}

fn error_json(err: &anyhow::Error) -> serde_json::Value {
    match err.downcast_ref::<CompressError>() {
        Some(core) => serde_json::json!({ "error": core.as_error_info() }),
        None => serde_json::json!({ "error": { "message": format!("{:#}", err) } }),
    }
}

/// `<stem>_compressed_<HHMMSS><.ext>` in the current working directory.
fn output_path_for(input: &Path, time: NaiveTime) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .ok_or_else(|| anyhow!("input file must include a valid file name"))?
        .to_string_lossy();
    let extension = input
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    Ok(PathBuf::from(format!(
        "{}_compressed_{}{}",
        stem,
        time.format("%H%M%S"),
        extension
    )))
}
