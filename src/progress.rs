//! Maps heterogeneous per-stage progress onto one 0-100 scale.
//!
//! Transcoding is the only stage with locally observable progress, so it is
//! rescaled into the [0, 60] sub-range. The remote stages report fixed
//! milestones instead of interpolating; their duration is not observable
//! from this side.

use crate::state::PipelineStatus;

/// Portion of the global scale covered by the converting stage.
pub const CONVERTING_SPAN: u8 = 60;

/// Milestone shown when the upload round-trip starts.
pub const UPLOADING_MILESTONE: u8 = 60;

/// Milestone shown when the transcription request is in flight.
pub const TRANSCRIBING_MILESTONE: u8 = 80;

/// Milestone shown once all remote work is done.
pub const PREPARING_MILESTONE: u8 = 100;

pub const MAX_PROGRESS: u8 = 100;

/// Fixed milestone value for a stage start.
pub fn stage_milestone(status: PipelineStatus) -> u8 {
    match status {
        PipelineStatus::Idle => 0,
        PipelineStatus::FileReady => 0,
        PipelineStatus::Converting => 0,
        PipelineStatus::Uploading => UPLOADING_MILESTONE,
        PipelineStatus::Transcribing => TRANSCRIBING_MILESTONE,
        PipelineStatus::PreparingResult => PREPARING_MILESTONE,
        PipelineStatus::Complete => MAX_PROGRESS,
    }
}

/// Rescale a fractional transcode progress into the global scale.
///
/// `round(p * 100) * 60 / 100`, capped at 100. Returns `None` for values the
/// engine should not have emitted (rounding artifacts above 1.0, negatives,
/// NaN); those are ignored rather than propagated.
pub fn map_converting(fraction: f64) -> Option<u8> {
    if !fraction.is_finite() || fraction < 0.0 {
        return None;
    }

    let percent = (fraction * 100.0).round() as u32;
    if percent > 100 {
        return None;
    }

    let scaled = percent * CONVERTING_SPAN as u32 / 100;
    Some(scaled.min(MAX_PROGRESS as u32) as u8)
}
