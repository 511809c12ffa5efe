use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use imgzip_core::{TelemetryEvent, TelemetrySink};
use serde::Serialize;

pub const SINK_ENV: &str = "IMGZIP_TELEMETRY_SINK";
pub const FILE_ENV: &str = "IMGZIP_TELEMETRY_FILE";

pub fn sink_from_env() -> Option<Box<dyn TelemetrySink>> {
    let mode = std::env::var(SINK_ENV).ok()?;
    let file = std::env::var(FILE_ENV).ok();
    sink_for_mode(&mode, file.as_deref())
}

pub fn sink_for_mode(mode: &str, file: Option<&str>) -> Option<Box<dyn TelemetrySink>> {
    match mode.trim().to_ascii_lowercase().as_str() {
        "tracing" | "log" => Some(Box::new(TracingSink)),
        "stderr" => Some(Box::new(StderrSink)),
        "file" => {
            let path = file.filter(|v| !v.trim().is_empty())?;
            Some(Box::new(FileSink::new(PathBuf::from(path))))
        }
        _ => None,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TelemetryEnvelope {
    event_type: String,
    quality: u8,
    duration_ms: Option<u64>,
    detail: Option<String>,
}

impl From<&TelemetryEvent> for TelemetryEnvelope {
    fn from(event: &TelemetryEvent) -> Self {
        Self {
            event_type: format!("{:?}", event.event_type),
            quality: event.quality.get(),
            duration_ms: event.duration_ms,
            detail: event.detail.clone(),
        }
    }
}

/// Forwards events to the `tracing` subscriber at info level.
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        tracing::info!(
            target: "imgzip::telemetry",
            event_type = ?event.event_type,
            quality = event.quality.get(),
            duration_ms = ?event.duration_ms,
            detail = event.detail.as_deref().unwrap_or(""),
            "telemetry"
        );
    }
}

/// JSON lines on stderr; stdout is reserved for the report.
pub struct StderrSink;

impl TelemetrySink for StderrSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Ok(line) = serde_json::to_string(&TelemetryEnvelope::from(&event)) {
            eprintln!("{}", line);
        }
    }
}

pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write_line(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("creating telemetry log parent directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("opening telemetry file")?;
        writeln!(file, "{}", line).context("writing telemetry line")?;
        Ok(())
    }
}

impl TelemetrySink for FileSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Ok(line) = serde_json::to_string(&TelemetryEnvelope::from(&event)) {
            if let Err(err) = self.write_line(&line) {
                tracing::warn!(path = %self.path.display(), error = %err, "dropping telemetry event");
            }
        }
    }
}
