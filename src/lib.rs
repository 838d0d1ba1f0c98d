//! upload.ai client pipeline
//!
//! Takes a locally selected video, derives a compact audio track from it,
//! stores that audio on the remote upload service, and requests a
//! transcription, reporting status and progress across the stages until a
//! transcript identifier is ready for downstream generation.

pub mod api;
pub mod audio;
pub mod config;
pub mod pipeline;
pub mod progress;
pub mod state;
pub mod video;

// Re-export main types for easy access
pub use crate::api::{HttpTransportClient, RemoteVideoId, TransportClient};
pub use crate::audio::{DerivedAudio, FfmpegTranscoder, MediaTranscoder};
pub use crate::config::{ApiConfig, AudioConfig, Config, PipelineConfig};
pub use crate::pipeline::{NoOpObserver, PipelineObserver, UploadPipeline};
pub use crate::state::{PipelineStatus, StatusSnapshot, SubmitAvailability};
pub use crate::video::{SourceVideo, VideoPreview};

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error types for pipeline operations
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcode engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("audio transcode failed: {0}")]
    Transcode(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response shape: {0}")]
    UnexpectedResponse(String),
}
