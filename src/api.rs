use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::info;

use crate::audio::DerivedAudio;
use crate::config::ApiConfig;
use crate::{PipelineError, Result};

/// Multipart field name the service expects the audio under.
pub const AUDIO_FIELD: &str = "file";

/// File name attached to the uploaded audio part.
pub const AUDIO_FILE_NAME: &str = "audio.mp3";

/// MIME type of the derived audio.
pub const AUDIO_MIME: &str = "audio/mpeg";

/// Identifier the remote service assigns to a stored audio resource.
///
/// Returned by the store call and required to request a transcription;
/// downstream generation consumes it once the transcript is ready.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteVideoId(String);

impl RemoteVideoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteVideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two remote operations the pipeline depends on.
///
/// Callers issue them strictly in order: the transcription request needs the
/// identifier the store call returned. Neither call is retried here.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Store the derived audio; returns the identifier of the stored resource.
    async fn store_audio(&self, audio: DerivedAudio) -> Result<RemoteVideoId>;

    /// Request a transcription of a stored resource. Success associates a
    /// transcript with the identifier; no new identifier is returned.
    async fn request_transcription(&self, id: &RemoteVideoId, prompt: &str) -> Result<()>;
}

/// HTTP client for the upload service
pub struct HttpTransportClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransportClient {
    pub fn new(config: &ApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl TransportClient for HttpTransportClient {
    async fn store_audio(&self, audio: DerivedAudio) -> Result<RemoteVideoId> {
        info!("📤 Storing audio ({:.1} kB)", audio.len() as f64 / 1_000.0);

        let part = reqwest::multipart::Part::bytes(audio.data)
            .file_name(AUDIO_FILE_NAME)
            .mime_str(AUDIO_MIME)?;
        let form = reqwest::multipart::Form::new().part(AUDIO_FIELD, part);

        let response = self
            .client
            .post(self.endpoint("videos"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Transport(format!(
                "audio store rejected ({}): {}",
                status, error_text
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let id = body["id"].as_str().ok_or_else(|| {
            PipelineError::UnexpectedResponse("store response carries no id".to_string())
        })?;

        info!("✅ Audio stored as {}", id);
        Ok(RemoteVideoId::new(id))
    }

    async fn request_transcription(&self, id: &RemoteVideoId, prompt: &str) -> Result<()> {
        info!("🎤 Requesting transcription for {}", id);

        let response = self
            .client
            .post(self.endpoint(&format!("videos/{}/transcription", id)))
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Transport(format!(
                "transcription request rejected ({}): {}",
                status, error_text
            )));
        }

        Ok(())
    }
}
