use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::AudioConfig;
use crate::video::SourceVideo;
use crate::{PipelineError, Result};

/// The transcoded audio track, compact enough to ship to the transcription
/// service. Handed to the transport client once and never retained after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAudio {
    pub data: Vec<u8>,
}

impl DerivedAudio {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Local audio extraction over an in-memory video buffer.
///
/// Implementations emit fractional progress in [0, 1] on `progress` while
/// the transcode runs. Not re-entrant: the orchestrator never starts a
/// second invocation while one is outstanding.
#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    async fn transcode(
        &self,
        video: &SourceVideo,
        progress: mpsc::Sender<f64>,
    ) -> Result<DerivedAudio>;
}

/// Audio extractor backed by the ffmpeg command line tools.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    config: AudioConfig,
}

impl FfmpegTranscoder {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    /// Probe the input duration, used to turn ffmpeg's out_time reports
    /// into fractions of the whole file.
    async fn probe_duration(&self, input: &Path) -> Result<f64> {
        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v", "quiet",
                "-print_format", "json",
                "-show_format",
                input.to_str().unwrap_or_default(),
            ])
            .output()
            .await
            .map_err(|e| {
                PipelineError::EngineUnavailable(format!("{}: {}", self.config.ffprobe_path, e))
            })?;

        if !output.status.success() {
            return Err(PipelineError::Transcode(format!(
                "ffprobe failed for {}",
                input.display()
            )));
        }

        let ffprobe_data: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::Transcode(format!("unreadable ffprobe output: {}", e)))?;

        parse_probe_duration(&ffprobe_data)
    }
}

#[async_trait]
impl MediaTranscoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        video: &SourceVideo,
        progress: mpsc::Sender<f64>,
    ) -> Result<DerivedAudio> {
        let scratch = tempfile::tempdir()?;

        // Unique per-invocation names so the engine never collides with
        // leftovers from an earlier run.
        let stamp = chrono::Utc::now().timestamp_millis();
        let (input_name, output_name) = scratch_names(stamp);
        let input_path = scratch.path().join(&input_name);
        let output_path = scratch.path().join(&output_name);

        tokio::fs::write(&input_path, &video.data).await?;

        info!(
            "🎬 Extracting audio track: {} ({:.1} MB)",
            video.name,
            video.len() as f64 / 1_000_000.0
        );

        let duration = self.probe_duration(&input_path).await?;

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args([
                "-i", input_path.to_str().unwrap_or_default(),
                "-map", "0:a",
                "-acodec", &self.config.codec,
                "-b:a", &self.config.bitrate,
                "-ac", &self.config.channels.to_string(),
                "-progress", "pipe:1",
                "-nostats",
                "-loglevel", "error",
                "-y",
                output_path.to_str().unwrap_or_default(),
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::EngineUnavailable(format!("{}: {}", self.config.ffmpeg_path, e))
            })?;

        // The -progress stream arrives while the transcode runs; forward
        // each report as a fraction of the probed duration.
        let stdout = child.stdout.take().ok_or_else(|| {
            PipelineError::Transcode("ffmpeg progress stream unavailable".to_string())
        })?;

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(fraction) = parse_progress_line(&line, duration) {
                // Receiver may be gone after a reset; that run is already
                // superseded, so the event is simply dropped.
                let _ = progress.send(fraction).await;
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(PipelineError::Transcode(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let data = tokio::fs::read(&output_path).await.map_err(|_| {
            PipelineError::Transcode(format!("no audio produced for {}", video.name))
        })?;

        if data.is_empty() {
            return Err(PipelineError::Transcode(format!(
                "empty audio output for {}",
                video.name
            )));
        }

        info!(
            "✅ Audio extracted: {} ({:.1} kB at {})",
            video.name,
            data.len() as f64 / 1_000.0,
            self.config.bitrate
        );

        Ok(DerivedAudio { data })
    }
}

/// Scratch file names for one transcode invocation.
fn scratch_names(stamp: i64) -> (String, String) {
    (format!("input-{}.mp4", stamp), format!("output-{}.mp3", stamp))
}

/// Parse one line of ffmpeg's `-progress pipe:1` key/value stream into a
/// fraction of the given duration.
///
/// Fractions above 1.0 (engine rounding near the end of the file) are
/// dropped rather than propagated. The closing `progress=end` report maps
/// to exactly 1.0.
fn parse_progress_line(line: &str, duration_secs: f64) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    let value = value.trim();

    let seconds = match key {
        // out_time_ms is in microseconds as well, despite the name
        "out_time_us" | "out_time_ms" => value.parse::<i64>().ok()? as f64 / 1_000_000.0,
        "out_time" => parse_timestamp(value)?,
        "progress" => return (value == "end").then_some(1.0),
        _ => return None,
    };

    if duration_secs <= 0.0 || seconds < 0.0 {
        return None;
    }

    let fraction = seconds / duration_secs;
    if fraction > 1.0 {
        debug!("dropping overshooting progress report: {:.4}", fraction);
        return None;
    }

    Some(fraction)
}

/// Parse an `HH:MM:SS.micros` timestamp into seconds.
fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Duration in seconds from ffprobe's JSON `format` section.
fn parse_probe_duration(data: &serde_json::Value) -> Result<f64> {
    let duration = data["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| PipelineError::Transcode("ffprobe output has no duration".to_string()))?;

    if duration <= 0.0 {
        return Err(PipelineError::Transcode(
            "video has zero duration".to_string(),
        ));
    }

    Ok(duration)
}
