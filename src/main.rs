use anyhow::{anyhow, Result};
use clap::{Arg, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use upload_ai_rust::{
    Config, FfmpegTranscoder, HttpTransportClient, PipelineObserver, PipelineStatus,
    RemoteVideoId, SourceVideo, UploadPipeline,
};

/// Delivers the ready notification to the waiting CLI task.
struct ReadySignal {
    tx: std::sync::Mutex<Option<oneshot::Sender<RemoteVideoId>>>,
}

impl PipelineObserver for ReadySignal {
    fn on_resource_ready(&self, id: &RemoteVideoId) {
        if let Some(tx) = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(id.clone());
        }
    }

    fn on_resource_cleared(&self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("upload_ai_rust=info,upload_ai=info,warn")
        .init();

    let matches = Command::new("upload.ai pipeline")
        .version("0.1.0")
        .about("Uploads a video's audio track and requests its transcription")
        .arg(
            Arg::new("video")
                .short('i')
                .long("video")
                .value_name("FILE")
                .help("Video file to process")
                .required(true),
        )
        .arg(
            Arg::new("prompt")
                .short('p')
                .long("prompt")
                .value_name("TEXT")
                .help("Keywords mentioned in the video, comma separated"),
        )
        .arg(
            Arg::new("api-url")
                .long("api-url")
                .value_name("URL")
                .help("Base URL of the upload service"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file"),
        )
        .get_matches();

    let video_path = PathBuf::from(matches.get_one::<String>("video").unwrap());

    // Load configuration
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::load_from(std::path::Path::new(path))?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };

    if let Some(api_url) = matches.get_one::<String>("api-url") {
        config.api.base_url = api_url.clone();
    }
    config.validate()?;

    if !video_path.exists() {
        error!("Video file does not exist: {}", video_path.display());
        return Err(anyhow!("Video file not found"));
    }

    info!("🚀 upload.ai pipeline starting...");
    info!("📁 Video: {}", video_path.display());
    info!("🌐 Service: {}", config.api.base_url);

    let video = SourceVideo::from_path(&video_path).await?;

    let (ready_tx, ready_rx) = oneshot::channel();
    let observer = Arc::new(ReadySignal {
        tx: std::sync::Mutex::new(Some(ready_tx)),
    });

    let pipeline = UploadPipeline::new(
        Arc::new(FfmpegTranscoder::new(config.audio.clone())),
        Arc::new(HttpTransportClient::new(&config.api)),
        observer,
        &config.pipeline,
    );

    let mut status_rx = pipeline.subscribe();

    pipeline.select_file(video)?;
    if let Some(prompt) = matches.get_one::<String>("prompt") {
        pipeline.set_prompt(prompt.clone());
    }

    if !pipeline.submit() {
        return Err(anyhow!("Pipeline rejected the submit"));
    }

    // Follow the run to its terminal state
    loop {
        status_rx.changed().await?;
        let snapshot = status_rx.borrow_and_update().clone();

        if let Some(error) = &snapshot.error {
            error!("Pipeline stuck in {}: {}", snapshot.status, error);
            return Err(anyhow!("Upload failed during {}", snapshot.status));
        }

        info!("⏳ {} ({}%)", snapshot.status, snapshot.progress);

        if snapshot.status == PipelineStatus::Complete {
            break;
        }
    }

    let id = ready_rx.await?;
    info!("🎉 Transcript ready; video id: {}", id);
    println!("{}", id);

    Ok(())
}
