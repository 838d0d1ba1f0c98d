use serde::{Deserialize, Serialize};

/// Pipeline status for the current run.
///
/// Exactly one value is active at a time. Transitions are strictly forward
/// except the reset transition from any state back to `Idle`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PipelineStatus {
    /// No file selected
    Idle,

    /// A video file is selected and waiting for submit
    FileReady,

    /// Extracting the audio track locally
    Converting,

    /// Storing the derived audio on the remote service
    Uploading,

    /// Transcription requested for the stored resource
    Transcribing,

    /// Remote work done, settling before the terminal state
    PreparingResult,

    /// Transcript identifier available; terminal for the current file
    Complete,
}

impl PipelineStatus {
    /// Get the next status in a pipeline run
    pub fn next(&self) -> PipelineStatus {
        match self {
            PipelineStatus::Idle => PipelineStatus::FileReady,
            PipelineStatus::FileReady => PipelineStatus::Converting,
            PipelineStatus::Converting => PipelineStatus::Uploading,
            PipelineStatus::Uploading => PipelineStatus::Transcribing,
            PipelineStatus::Transcribing => PipelineStatus::PreparingResult,
            PipelineStatus::PreparingResult => PipelineStatus::Complete,
            PipelineStatus::Complete => PipelineStatus::Complete,
        }
    }

    /// Check if a run is currently in flight
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Converting
                | PipelineStatus::Uploading
                | PipelineStatus::Transcribing
                | PipelineStatus::PreparingResult
        )
    }

    /// Check if this status allows editing the transcription prompt
    pub fn allows_prompt_edit(&self) -> bool {
        matches!(self, PipelineStatus::Idle | PipelineStatus::FileReady)
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PipelineStatus::Idle => "idle",
            PipelineStatus::FileReady => "file-ready",
            PipelineStatus::Converting => "converting",
            PipelineStatus::Uploading => "uploading",
            PipelineStatus::Transcribing => "transcribing",
            PipelineStatus::PreparingResult => "preparing-result",
            PipelineStatus::Complete => "complete",
        };
        write!(f, "{}", label)
    }
}

/// One immutable view of the pipeline, replaced atomically on each transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    /// Current status
    pub status: PipelineStatus,

    /// Global progress on the 0-100 scale
    pub progress: u8,

    /// Fatal error for the current run, if any. The status stays where the
    /// failure happened; reset is the only recovery.
    pub error: Option<String>,
}

impl StatusSnapshot {
    pub fn idle() -> Self {
        Self {
            status: PipelineStatus::Idle,
            progress: 0,
            error: None,
        }
    }
}

/// Whether a submit would be accepted, and why not if it wouldn't.
///
/// Lets a front end distinguish "nothing to submit" from "busy" from
/// "already finished" when rendering its submit control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAvailability {
    /// A file is selected and no run is in flight
    Ready,

    /// No file selected; submit is a no-op
    NoFile,

    /// A run is in flight
    Busy,

    /// The current file already completed
    Finished,
}
