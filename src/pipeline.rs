use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::api::{RemoteVideoId, TransportClient};
use crate::audio::MediaTranscoder;
use crate::config::PipelineConfig;
use crate::progress;
use crate::state::{PipelineStatus, StatusSnapshot, SubmitAvailability};
use crate::video::{SourceVideo, VideoPreview};
use crate::PipelineError;

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Collaborator notifications for the surrounding application.
///
/// `on_resource_ready` fires exactly once per completed run with the stored
/// resource identifier; `on_resource_cleared` fires when the identifier (or a
/// pending run) stops being valid, so dependent state can be dropped.
pub trait PipelineObserver: Send + Sync {
    fn on_resource_ready(&self, id: &RemoteVideoId);

    fn on_resource_cleared(&self);
}

/// Observer that ignores all notifications.
pub struct NoOpObserver;

impl PipelineObserver for NoOpObserver {
    fn on_resource_ready(&self, _id: &RemoteVideoId) {}

    fn on_resource_cleared(&self) {}
}

struct PipelineInner {
    status: PipelineStatus,
    progress: u8,
    error: Option<String>,

    /// Selected file, shared with the active run
    video: Option<Arc<SourceVideo>>,

    /// Preview handle for the selected file; dropping it releases the
    /// underlying resource
    preview: Option<VideoPreview>,

    /// Transcription hint; frozen once a run starts
    prompt: String,

    /// Bumped on every reset/replacement. Work finishing under an older
    /// generation is discarded instead of touching the new run's state.
    generation: u64,
}

impl PipelineInner {
    fn new() -> Self {
        Self {
            status: PipelineStatus::Idle,
            progress: 0,
            error: None,
            video: None,
            preview: None,
            prompt: String::new(),
            generation: 0,
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
        }
    }
}

/// Sequences one video through transcode → store → transcription request,
/// owning the state machine and the current run's resources.
///
/// All mutations happen under one lock and are published as whole snapshots;
/// observers never see a half-applied transition. Only one run is active at
/// a time.
#[derive(Clone)]
pub struct UploadPipeline {
    inner: Arc<Mutex<PipelineInner>>,
    transcoder: Arc<dyn MediaTranscoder>,
    transport: Arc<dyn TransportClient>,
    observer: Arc<dyn PipelineObserver>,
    status_tx: watch::Sender<StatusSnapshot>,
    complete_delay: Duration,
}

impl UploadPipeline {
    pub fn new(
        transcoder: Arc<dyn MediaTranscoder>,
        transport: Arc<dyn TransportClient>,
        observer: Arc<dyn PipelineObserver>,
        config: &PipelineConfig,
    ) -> Self {
        let (status_tx, _status_rx) = watch::channel(StatusSnapshot::idle());

        Self {
            inner: Arc::new(Mutex::new(PipelineInner::new())),
            transcoder,
            transport,
            observer,
            status_tx,
            complete_delay: Duration::from_millis(config.complete_delay_ms),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipelineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &PipelineInner) {
        self.status_tx.send_replace(inner.snapshot());
    }

    /// Current snapshot of the pipeline.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status_tx.borrow().clone()
    }

    /// Watch the pipeline; a new snapshot is published on every transition.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> PipelineStatus {
        self.lock().status
    }

    /// Name of the currently selected file, if any.
    pub fn selected_file(&self) -> Option<String> {
        self.lock().video.as_ref().map(|v| v.name.clone())
    }

    /// Path of the preview copy for the selected file.
    pub fn preview_path(&self) -> Option<std::path::PathBuf> {
        self.lock().preview.as_ref().map(|p| p.path_buf())
    }

    /// Whether a submit would start a run right now, and why not otherwise.
    pub fn submit_availability(&self) -> SubmitAvailability {
        let inner = self.lock();
        if inner.status == PipelineStatus::Complete {
            SubmitAvailability::Finished
        } else if inner.status.is_in_flight() {
            SubmitAvailability::Busy
        } else if inner.video.is_none() {
            SubmitAvailability::NoFile
        } else {
            SubmitAvailability::Ready
        }
    }

    /// Set the transcription hint. Editable only before a run starts; the
    /// value captured at submit time is what gets sent.
    pub fn set_prompt(&self, prompt: impl Into<String>) {
        let mut inner = self.lock();
        if !inner.status.allows_prompt_edit() {
            warn!("prompt is frozen while {}", inner.status);
            return;
        }
        inner.prompt = prompt.into();
    }

    pub fn prompt(&self) -> String {
        self.lock().prompt.clone()
    }

    /// Take the first file of a selection; the rest are ignored. An empty
    /// selection is not a selection event.
    ///
    /// Replacing a held file supersedes any run in flight, releases the old
    /// preview before acquiring the new one, and notifies the collaborator
    /// that the previous resource is gone.
    pub fn select_files(&self, mut files: Vec<SourceVideo>) -> crate::Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        if files.len() > 1 {
            debug!("selection carries {} files; using the first", files.len());
        }
        let video = files.swap_remove(0);

        let (superseded, outcome) = {
            let mut inner = self.lock();
            let superseded = inner.video.is_some() || inner.status != PipelineStatus::Idle;

            // Supersede any previous run and release its preview before
            // acquiring the replacement.
            inner.generation += 1;
            inner.video = None;
            inner.preview = None;
            inner.status = PipelineStatus::Idle;
            inner.progress = 0;
            inner.error = None;

            let outcome = VideoPreview::create(&video).map(|preview| {
                info!(
                    "🎞️ Selected {} ({:.1} MB)",
                    video.name,
                    video.len() as f64 / 1_000_000.0
                );
                inner.preview = Some(preview);
                inner.video = Some(Arc::new(video));
                inner.status = PipelineStatus::FileReady;
            });
            self.publish(&inner);

            (superseded, outcome)
        };

        if superseded {
            self.observer.on_resource_cleared();
        }

        outcome
    }

    pub fn select_file(&self, video: SourceVideo) -> crate::Result<()> {
        self.select_files(vec![video])
    }

    /// Remove the selected file and reset to idle, discarding any in-flight
    /// run's future results. Does not abort work already dispatched; its
    /// results are discarded on arrival instead.
    pub fn remove_file(&self) {
        let had_resource = {
            let mut inner = self.lock();
            let had_resource = inner.video.is_some() || inner.status != PipelineStatus::Idle;

            inner.generation += 1;
            inner.video = None;
            inner.preview = None;
            inner.status = PipelineStatus::Idle;
            inner.progress = 0;
            inner.error = None;
            self.publish(&inner);

            had_resource
        };

        if had_resource {
            info!("🗑️ File removed; pipeline reset");
            self.observer.on_resource_cleared();
        }
    }

    /// Start a run for the selected file. A no-op (returns false) when no
    /// file is selected, while a run is in flight, or once complete.
    pub fn submit(&self) -> bool {
        let (video, prompt, generation) = {
            let mut inner = self.lock();

            let Some(video) = inner.video.clone() else {
                debug!("submit ignored: no file selected");
                return false;
            };
            if inner.status != PipelineStatus::FileReady {
                debug!("submit ignored while {}", inner.status);
                return false;
            }

            inner.status = PipelineStatus::Converting;
            inner.progress = 0;
            inner.error = None;
            self.publish(&inner);

            (video, inner.prompt.clone(), inner.generation)
        };

        info!("🚀 Submitting {} for transcription", video.name);

        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.run(video, prompt, generation).await;
        });

        true
    }

    /// Drive one run through all stages. Every transition is gated on the
    /// generation so a superseded run can never touch newer state.
    async fn run(&self, video: Arc<SourceVideo>, prompt: String, generation: u64) {
        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

        let transcode = self.transcoder.transcode(&video, progress_tx);
        let forward = async {
            while let Some(fraction) = progress_rx.recv().await {
                self.apply_converting_progress(generation, fraction);
            }
        };
        let (transcoded, ()) = tokio::join!(transcode, forward);

        let audio = match transcoded {
            Ok(audio) => audio,
            Err(e) => return self.fail(generation, e),
        };

        if !self.advance(generation, PipelineStatus::Uploading) {
            return;
        }

        let id = match self.transport.store_audio(audio).await {
            Ok(id) => id,
            Err(e) => return self.fail(generation, e),
        };

        if !self.advance(generation, PipelineStatus::Transcribing) {
            return;
        }

        if let Err(e) = self.transport.request_transcription(&id, &prompt).await {
            return self.fail(generation, e);
        }

        if !self.advance(generation, PipelineStatus::PreparingResult) {
            return;
        }

        // Cosmetic settle before the terminal state; keeps a UI from
        // flashing straight from the progress bar to the done state.
        tokio::time::sleep(self.complete_delay).await;

        if !self.advance(generation, PipelineStatus::Complete) {
            return;
        }

        info!("🎉 Transcript ready: {}", id);
        self.observer.on_resource_ready(&id);
    }

    /// Move the current run to `next`, pinning progress at the stage
    /// milestone. Returns false when the run has been superseded.
    fn advance(&self, generation: u64, next: PipelineStatus) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!("discarding {} transition from superseded run", next);
            return false;
        }

        inner.status = next;
        inner.progress = progress::stage_milestone(next);
        info!("Pipeline entered {} ({}%)", next, inner.progress);
        self.publish(&inner);

        true
    }

    /// Record a fatal failure for the current run. The status stays where
    /// the failure happened; reset is the only recovery.
    fn fail(&self, generation: u64, err: PipelineError) {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!("discarding failure from superseded run: {}", err);
            return;
        }

        error!("❌ Pipeline run failed during {}: {}", inner.status, err);
        inner.error = Some(err.to_string());
        self.publish(&inner);
    }

    /// Apply one transcode progress report, consumed only while the current
    /// run is converting. Reports outside that window, or regressing ones,
    /// are ignored so the published value never decreases within a run.
    fn apply_converting_progress(&self, generation: u64, fraction: f64) {
        let Some(mapped) = progress::map_converting(fraction) else {
            debug!("ignoring out-of-range progress report: {}", fraction);
            return;
        };

        let mut inner = self.lock();
        if inner.generation != generation || inner.status != PipelineStatus::Converting {
            debug!("ignoring progress report outside the converting window");
            return;
        }
        if mapped <= inner.progress {
            return;
        }

        inner.progress = mapped;
        self.publish(&inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::DerivedAudio;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    enum TranscodeStep {
        Progress(f64),
        Finish(crate::Result<DerivedAudio>),
    }

    /// Transcoder driven step by step from the test body.
    struct ScriptedTranscoder {
        steps: Mutex<Option<mpsc::Receiver<TranscodeStep>>>,
    }

    impl ScriptedTranscoder {
        fn new() -> (Arc<Self>, mpsc::Sender<TranscodeStep>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Arc::new(Self {
                    steps: Mutex::new(Some(rx)),
                }),
                tx,
            )
        }
    }

    #[async_trait]
    impl MediaTranscoder for ScriptedTranscoder {
        async fn transcode(
            &self,
            _video: &SourceVideo,
            progress: mpsc::Sender<f64>,
        ) -> crate::Result<DerivedAudio> {
            let mut steps = self
                .steps
                .lock()
                .unwrap()
                .take()
                .expect("transcoder invoked twice");

            while let Some(step) = steps.recv().await {
                match step {
                    TranscodeStep::Progress(p) => {
                        let _ = progress.send(p).await;
                    }
                    TranscodeStep::Finish(result) => return result,
                }
            }
            Ok(DerivedAudio { data: vec![0u8; 8] })
        }
    }

    /// Transcoder that replays a fixed progress script and succeeds.
    struct InstantTranscoder {
        events: Vec<f64>,
    }

    #[async_trait]
    impl MediaTranscoder for InstantTranscoder {
        async fn transcode(
            &self,
            _video: &SourceVideo,
            progress: mpsc::Sender<f64>,
        ) -> crate::Result<DerivedAudio> {
            for &event in &self.events {
                let _ = progress.send(event).await;
            }
            Ok(DerivedAudio {
                data: vec![1, 2, 3],
            })
        }
    }

    struct RecordingTransport {
        id: String,
        fail_store: bool,
        store_calls: AtomicUsize,
        store_gate: Mutex<Option<oneshot::Receiver<()>>>,
        transcription_gate: Mutex<Option<oneshot::Receiver<()>>>,
        transcriptions: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                id: "video-123".to_string(),
                fail_store: false,
                store_calls: AtomicUsize::new(0),
                store_gate: Mutex::new(None),
                transcription_gate: Mutex::new(None),
                transcriptions: Mutex::new(Vec::new()),
            })
        }

        fn failing_store() -> Arc<Self> {
            Arc::new(Self {
                fail_store: true,
                ..Self::unwrapped_ok()
            })
        }

        fn gated() -> (Arc<Self>, oneshot::Sender<()>, oneshot::Sender<()>) {
            let (store_tx, store_rx) = oneshot::channel();
            let (transcription_tx, transcription_rx) = oneshot::channel();
            let transport = Arc::new(Self {
                store_gate: Mutex::new(Some(store_rx)),
                transcription_gate: Mutex::new(Some(transcription_rx)),
                ..Self::unwrapped_ok()
            });
            (transport, store_tx, transcription_tx)
        }

        fn unwrapped_ok() -> Self {
            Self {
                id: "video-123".to_string(),
                fail_store: false,
                store_calls: AtomicUsize::new(0),
                store_gate: Mutex::new(None),
                transcription_gate: Mutex::new(None),
                transcriptions: Mutex::new(Vec::new()),
            }
        }

        fn store_count(&self) -> usize {
            self.store_calls.load(Ordering::SeqCst)
        }

        fn recorded_transcriptions(&self) -> Vec<(String, String)> {
            self.transcriptions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TransportClient for RecordingTransport {
        async fn store_audio(&self, _audio: DerivedAudio) -> crate::Result<RemoteVideoId> {
            self.store_calls.fetch_add(1, Ordering::SeqCst);

            let gate = self.store_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }

            if self.fail_store {
                return Err(PipelineError::Transport("connection refused".to_string()));
            }
            Ok(RemoteVideoId::new(self.id.clone()))
        }

        async fn request_transcription(
            &self,
            id: &RemoteVideoId,
            prompt: &str,
        ) -> crate::Result<()> {
            self.transcriptions
                .lock()
                .unwrap()
                .push((id.to_string(), prompt.to_string()));

            let gate = self.transcription_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        ready: Mutex<Vec<RemoteVideoId>>,
        cleared: AtomicUsize,
    }

    impl CountingObserver {
        fn ready_ids(&self) -> Vec<RemoteVideoId> {
            self.ready.lock().unwrap().clone()
        }

        fn cleared_count(&self) -> usize {
            self.cleared.load(Ordering::SeqCst)
        }
    }

    impl PipelineObserver for CountingObserver {
        fn on_resource_ready(&self, id: &RemoteVideoId) {
            self.ready.lock().unwrap().push(id.clone());
        }

        fn on_resource_cleared(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_pipeline(
        transcoder: Arc<dyn MediaTranscoder>,
        transport: Arc<dyn TransportClient>,
        observer: Arc<dyn PipelineObserver>,
    ) -> UploadPipeline {
        UploadPipeline::new(
            transcoder,
            transport,
            observer,
            &PipelineConfig {
                complete_delay_ms: 200,
            },
        )
    }

    fn sample_video() -> SourceVideo {
        SourceVideo::new("talk.mp4", vec![0u8; 1024])
    }

    async fn wait_for(
        pipeline: &UploadPipeline,
        pred: impl FnMut(&StatusSnapshot) -> bool,
    ) -> StatusSnapshot {
        let mut rx = pipeline.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(pred))
            .await
            .expect("timed out waiting for pipeline state")
            .expect("pipeline dropped");
        snapshot.clone()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_without_file_is_noop() {
        let transport = RecordingTransport::ok();
        let observer = Arc::new(CountingObserver::default());
        let pipeline = test_pipeline(
            Arc::new(InstantTranscoder { events: vec![] }),
            transport.clone(),
            observer.clone(),
        );

        assert_eq!(pipeline.submit_availability(), SubmitAvailability::NoFile);
        assert!(!pipeline.submit());
        settle().await;

        assert_eq!(pipeline.snapshot(), StatusSnapshot::idle());
        assert_eq!(transport.store_count(), 0);
        assert!(transport.recorded_transcriptions().is_empty());
        assert!(observer.ready_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_then_remove_resets() {
        let observer = Arc::new(CountingObserver::default());
        let pipeline = test_pipeline(
            Arc::new(InstantTranscoder { events: vec![] }),
            RecordingTransport::ok(),
            observer.clone(),
        );

        pipeline.select_file(sample_video()).unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::FileReady);
        assert_eq!(pipeline.submit_availability(), SubmitAvailability::Ready);
        assert_eq!(pipeline.selected_file().as_deref(), Some("talk.mp4"));
        assert_eq!(observer.cleared_count(), 0);

        pipeline.remove_file();
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.status, PipelineStatus::Idle);
        assert_eq!(snapshot.progress, 0);
        assert_eq!(observer.cleared_count(), 1);

        // Removing with nothing held stays a no-op
        pipeline.remove_file();
        assert_eq!(observer.cleared_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacing_selection_releases_old_preview() {
        let observer = Arc::new(CountingObserver::default());
        let pipeline = test_pipeline(
            Arc::new(InstantTranscoder { events: vec![] }),
            RecordingTransport::ok(),
            observer.clone(),
        );

        pipeline.select_file(sample_video()).unwrap();
        let old_preview = pipeline.preview_path().unwrap();
        assert!(old_preview.exists());

        pipeline
            .select_file(SourceVideo::new("other.mp4", vec![1u8; 32]))
            .unwrap();
        assert!(!old_preview.exists());
        assert_eq!(pipeline.selected_file().as_deref(), Some("other.mp4"));
        assert_eq!(pipeline.status(), PipelineStatus::FileReady);
        assert_eq!(observer.cleared_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_files_uses_first_of_selection() {
        let pipeline = test_pipeline(
            Arc::new(InstantTranscoder { events: vec![] }),
            RecordingTransport::ok(),
            Arc::new(CountingObserver::default()),
        );

        assert!(pipeline.select_files(Vec::new()).is_ok());
        assert_eq!(pipeline.status(), PipelineStatus::Idle);

        pipeline
            .select_files(vec![
                SourceVideo::new("first.mp4", vec![0u8; 16]),
                SourceVideo::new("second.mp4", vec![0u8; 16]),
            ])
            .unwrap();
        assert_eq!(pipeline.selected_file().as_deref(), Some("first.mp4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_happy_path() {
        let transport = RecordingTransport::ok();
        let observer = Arc::new(CountingObserver::default());
        let pipeline = test_pipeline(
            Arc::new(InstantTranscoder {
                events: vec![0.0, 0.5, 1.0],
            }),
            transport.clone(),
            observer.clone(),
        );

        pipeline.select_file(sample_video()).unwrap();
        pipeline.set_prompt("keyword1, keyword2");
        assert!(pipeline.submit());

        let done = wait_for(&pipeline, |s| s.status == PipelineStatus::Complete).await;
        assert_eq!(done.progress, 100);
        assert_eq!(done.error, None);

        assert_eq!(transport.store_count(), 1);
        assert_eq!(
            transport.recorded_transcriptions(),
            vec![("video-123".to_string(), "keyword1, keyword2".to_string())]
        );
        assert_eq!(observer.ready_ids(), vec![RemoteVideoId::new("video-123")]);
        assert_eq!(observer.cleared_count(), 0);

        // Terminal for the current file: submit stays rejected
        assert_eq!(pipeline.submit_availability(), SubmitAvailability::Finished);
        assert!(!pipeline.submit());
        settle().await;
        assert_eq!(observer.ready_ids().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_converting_progress_mapping_and_milestones() {
        let (transcoder, steps) = ScriptedTranscoder::new();
        let (transport, store_gate, transcription_gate) = RecordingTransport::gated();
        let observer = Arc::new(CountingObserver::default());
        let pipeline = test_pipeline(transcoder, transport.clone(), observer.clone());

        pipeline.select_file(sample_video()).unwrap();
        assert!(pipeline.submit());
        assert_eq!(pipeline.status(), PipelineStatus::Converting);
        assert_eq!(pipeline.snapshot().progress, 0);

        steps.send(TranscodeStep::Progress(0.25)).await.unwrap();
        wait_for(&pipeline, |s| s.progress == 15).await;

        steps.send(TranscodeStep::Progress(0.5)).await.unwrap();
        wait_for(&pipeline, |s| s.progress == 30).await;

        // Engine rounding artifact above 1.0 is ignored
        steps.send(TranscodeStep::Progress(1.2)).await.unwrap();
        settle().await;
        assert_eq!(pipeline.snapshot().progress, 30);

        // Regressions are ignored too; the value never decreases in a run
        steps.send(TranscodeStep::Progress(0.1)).await.unwrap();
        settle().await;
        assert_eq!(pipeline.snapshot().progress, 30);

        steps.send(TranscodeStep::Progress(0.9)).await.unwrap();
        wait_for(&pipeline, |s| s.progress == 54).await;

        steps
            .send(TranscodeStep::Finish(Ok(DerivedAudio {
                data: vec![9, 9, 9],
            })))
            .await
            .unwrap();

        // Milestones are exact regardless of the prior converting value
        let uploading = wait_for(&pipeline, |s| s.status == PipelineStatus::Uploading).await;
        assert_eq!(uploading.progress, 60);

        store_gate.send(()).unwrap();
        let transcribing = wait_for(&pipeline, |s| s.status == PipelineStatus::Transcribing).await;
        assert_eq!(transcribing.progress, 80);

        transcription_gate.send(()).unwrap();
        let preparing = wait_for(&pipeline, |s| s.status == PipelineStatus::PreparingResult).await;
        assert_eq!(preparing.progress, 100);

        wait_for(&pipeline, |s| s.status == PipelineStatus::Complete).await;
        assert_eq!(observer.ready_ids(), vec![RemoteVideoId::new("video-123")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_sticks_in_uploading() {
        let transport = RecordingTransport::failing_store();
        let observer = Arc::new(CountingObserver::default());
        let pipeline = test_pipeline(
            Arc::new(InstantTranscoder { events: vec![1.0] }),
            transport.clone(),
            observer.clone(),
        );

        pipeline.select_file(sample_video()).unwrap();
        assert!(pipeline.submit());

        let stuck = wait_for(&pipeline, |s| s.error.is_some()).await;
        assert_eq!(stuck.status, PipelineStatus::Uploading);
        assert_eq!(stuck.progress, 60);

        // No second call, no ready notification, no silent reset
        assert!(transport.recorded_transcriptions().is_empty());
        assert!(observer.ready_ids().is_empty());
        settle().await;
        assert_eq!(pipeline.status(), PipelineStatus::Uploading);

        // Explicit reset is the recovery path
        pipeline.remove_file();
        assert_eq!(pipeline.snapshot(), StatusSnapshot::idle());
        assert_eq!(observer.cleared_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcode_failure_is_fatal() {
        let (transcoder, steps) = ScriptedTranscoder::new();
        let transport = RecordingTransport::ok();
        let observer = Arc::new(CountingObserver::default());
        let pipeline = test_pipeline(transcoder, transport.clone(), observer.clone());

        pipeline.select_file(sample_video()).unwrap();
        assert!(pipeline.submit());

        steps
            .send(TranscodeStep::Finish(Err(PipelineError::Transcode(
                "engine exploded".to_string(),
            ))))
            .await
            .unwrap();

        let stuck = wait_for(&pipeline, |s| s.error.is_some()).await;
        assert_eq!(stuck.status, PipelineStatus::Converting);
        assert_eq!(transport.store_count(), 0);
        assert!(observer.ready_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_completion_discarded_after_reset() {
        let (transcoder, steps) = ScriptedTranscoder::new();
        let transport = RecordingTransport::ok();
        let observer = Arc::new(CountingObserver::default());
        let pipeline = test_pipeline(transcoder, transport.clone(), observer.clone());

        pipeline.select_file(sample_video()).unwrap();
        assert!(pipeline.submit());

        steps.send(TranscodeStep::Progress(0.25)).await.unwrap();
        wait_for(&pipeline, |s| s.progress == 15).await;

        // User removes the file while the transcode is still running
        pipeline.remove_file();
        assert_eq!(pipeline.snapshot(), StatusSnapshot::idle());
        assert_eq!(observer.cleared_count(), 1);

        // The superseded run keeps producing; nothing may reach new state
        steps.send(TranscodeStep::Progress(0.75)).await.unwrap();
        settle().await;
        assert_eq!(pipeline.snapshot(), StatusSnapshot::idle());

        steps
            .send(TranscodeStep::Finish(Ok(DerivedAudio {
                data: vec![1, 2, 3],
            })))
            .await
            .unwrap();
        settle().await;

        assert_eq!(pipeline.snapshot(), StatusSnapshot::idle());
        assert_eq!(transport.store_count(), 0);
        assert!(transport.recorded_transcriptions().is_empty());
        assert!(observer.ready_ids().is_empty());
        assert_eq!(observer.cleared_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_store_response_discarded_after_reset() {
        let (transport, store_gate, _transcription_gate) = RecordingTransport::gated();
        let observer = Arc::new(CountingObserver::default());
        let pipeline = test_pipeline(
            Arc::new(InstantTranscoder { events: vec![1.0] }),
            transport.clone(),
            observer.clone(),
        );

        pipeline.select_file(sample_video()).unwrap();
        assert!(pipeline.submit());
        wait_for(&pipeline, |s| s.status == PipelineStatus::Uploading).await;
        assert_eq!(transport.store_count(), 1);

        // Reset while the store call is in flight
        pipeline.remove_file();
        assert_eq!(observer.cleared_count(), 1);

        // The response eventually arrives for the superseded run
        store_gate.send(()).unwrap();
        settle().await;

        assert_eq!(pipeline.snapshot(), StatusSnapshot::idle());
        assert!(transport.recorded_transcriptions().is_empty());
        assert!(observer.ready_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_frozen_once_converting() {
        let (transcoder, steps) = ScriptedTranscoder::new();
        let transport = RecordingTransport::ok();
        let pipeline = test_pipeline(
            transcoder,
            transport.clone(),
            Arc::new(CountingObserver::default()),
        );

        pipeline.select_file(sample_video()).unwrap();
        pipeline.set_prompt("keyword1, keyword2");
        assert!(pipeline.submit());

        // Edits after submit do not reach the request
        pipeline.set_prompt("too late");
        assert_eq!(pipeline.prompt(), "keyword1, keyword2");

        steps
            .send(TranscodeStep::Finish(Ok(DerivedAudio {
                data: vec![1, 2, 3],
            })))
            .await
            .unwrap();
        wait_for(&pipeline, |s| s.status == PipelineStatus::Complete).await;

        assert_eq!(
            transport.recorded_transcriptions(),
            vec![("video-123".to_string(), "keyword1, keyword2".to_string())]
        );
    }
}
