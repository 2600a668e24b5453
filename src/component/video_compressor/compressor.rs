use super::batch_scheduler::BatchScheduler;
use super::command_builder::{CommandBuilder, derive_output_path};
use super::error::{CompressorError, CompressorResult, JobError, panic_message};
use super::job::{CancelToken, Job};
use super::preset::{PresetOverrides, PresetRegistry};
use super::process_supervisor::DEFAULT_GRACE_PERIOD;
use super::progress_hub::{JobUpdate, ProgressEvent, UpdateCallback};
use super::result::CompressionResult;
use crate::config::CompressorSettings;
use crate::tools::{
    FfprobeProbe, MetadataProbe, PROBE_BINARY, ProbeError, VideoInfo, ensure_output_parent,
    locate_encoder, locate_tool, validate_input_file,
};
use log::{info, warn};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use uuid::Uuid;

/// Progress callback for batches, receiving the job's index in the batch.
pub type BatchCallback = Arc<dyn Fn(usize, &JobUpdate) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct CompressionRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub preset: String,
    pub overrides: PresetOverrides,
}

impl CompressionRequest {
    #[must_use]
    pub fn new(input_path: &Path, output_path: &Path, preset: &str) -> Self {
        Self {
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            preset: preset.to_string(),
            overrides: PresetOverrides::default(),
        }
    }

    /// Request writing `<output_dir>/<input stem>.webm`.
    #[must_use]
    pub fn into_directory(input_path: &Path, output_dir: &Path, preset: &str) -> Self {
        Self::new(input_path, &derive_output_path(input_path, output_dir), preset)
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: PresetOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Entry point tying presets, probing, command building and supervision together.
pub struct Compressor {
    encoder: PathBuf,
    presets: Arc<PresetRegistry>,
    probe: Arc<dyn MetadataProbe>,
    shutdown_signal: Option<Arc<AtomicBool>>,
    grace_period: Duration,
    preserve_alpha_when_detected: bool,
}

impl Compressor {
    #[must_use]
    pub fn new(
        encoder: PathBuf,
        presets: Arc<PresetRegistry>,
        probe: Arc<dyn MetadataProbe>,
    ) -> Self {
        Self {
            encoder,
            presets,
            probe,
            shutdown_signal: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            preserve_alpha_when_detected: false,
        }
    }

    /// Locates the encoder and ffprobe as configured.
    pub fn from_settings(
        settings: &CompressorSettings,
        presets: Arc<PresetRegistry>,
    ) -> CompressorResult<Self> {
        let encoder = locate_encoder(settings.ffmpeg_path.as_deref())?;
        let probe = match locate_tool(PROBE_BINARY, settings.ffprobe_path.as_deref()) {
            Some(path) => FfprobeProbe::new(path),
            None => {
                warn!("{PROBE_BINARY} not found, progress percentage and ETA will be unavailable");
                FfprobeProbe::default()
            }
        };
        let mut compressor = Self::new(encoder, presets, Arc::new(probe));
        compressor.preserve_alpha_when_detected = settings.preserve_alpha_when_detected;
        Ok(compressor)
    }

    /// Jobs created afterwards are cancelled when the signal is raised.
    #[must_use]
    pub fn with_shutdown_signal(mut self, shutdown_signal: Arc<AtomicBool>) -> Self {
        self.shutdown_signal = Some(shutdown_signal);
        self
    }

    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    #[must_use]
    pub const fn with_alpha_detection(mut self, enabled: bool) -> Self {
        self.preserve_alpha_when_detected = enabled;
        self
    }

    #[must_use]
    pub fn encoder(&self) -> &Path {
        &self.encoder
    }

    #[must_use]
    pub const fn presets(&self) -> &Arc<PresetRegistry> {
        &self.presets
    }

    fn ensure_encoder(&self) -> CompressorResult<()> {
        if self.encoder.is_file() {
            Ok(())
        } else {
            Err(CompressorError::EncoderNotFound(
                self.encoder.display().to_string(),
            ))
        }
    }

    fn probe_input(&self, input: &Path) -> CompressorResult<VideoInfo> {
        match self.probe.probe(input) {
            Ok(info) => Ok(info),
            Err(ProbeError::NoVideoStream(path)) => Err(CompressorError::InvalidInput(format!(
                "{} has no video stream",
                path.display()
            ))),
            Err(ProbeError::Rejected { path, message }) => Err(CompressorError::InvalidInput(
                format!("{} is not a readable video: {message}", path.display()),
            )),
            Err(e @ (ProbeError::Unavailable(_) | ProbeError::Malformed(_))) => {
                warn!("Metadata unavailable for {}: {e}", input.display());
                Ok(VideoInfo::default())
            }
        }
    }

    /// Validates a request and builds its job without starting anything.
    ///
    /// Every validation failure surfaces here, before a process can spawn.
    pub fn prepare(&self, request: &CompressionRequest) -> CompressorResult<Job> {
        self.ensure_encoder()?;
        let input_size_bytes = validate_input_file(&request.input_path)?;
        let video_info = self.probe_input(&request.input_path)?;

        let mut params = self.presets.resolve(&request.preset, &request.overrides)?;
        if video_info.has_alpha && !params.preserve_alpha && self.preserve_alpha_when_detected {
            let overrides = PresetOverrides {
                preserve_alpha: true,
                ..request.overrides.clone()
            };
            match self.presets.resolve(&request.preset, &overrides) {
                Ok(with_alpha) => {
                    info!(
                        "Alpha channel detected, preserving it: {}",
                        request.input_path.display()
                    );
                    params = with_alpha;
                }
                Err(e) => warn!("Alpha channel detected but cannot be preserved: {e}"),
            }
        }

        let command = CommandBuilder::build(&request.input_path, &request.output_path, &params)?;
        ensure_output_parent(&request.output_path)?;

        let cancel = self
            .shutdown_signal
            .as_ref()
            .map_or_else(CancelToken::new, CancelToken::child_of);

        Ok(Job::new(
            &self.encoder,
            &request.input_path,
            &request.output_path,
            params,
            command,
            video_info,
            input_size_bytes,
            cancel,
        )
        .with_grace_period(self.grace_period))
    }

    /// Compresses one file on the calling thread.
    ///
    /// Validation errors are returned as `Err`; encoding failures and
    /// cancellation are reported inside the returned result.
    pub fn compress(
        &self,
        request: &CompressionRequest,
        on_progress: Option<UpdateCallback>,
    ) -> CompressorResult<CompressionResult> {
        let job = self.prepare(request)?;
        if let Some(callback) = on_progress {
            job.subscribe_callback(callback);
        }
        Ok(job.run())
    }

    /// Compresses many files with at most `concurrency_limit` running at once.
    ///
    /// Only structural problems are returned as `Err`: an invalid limit or a
    /// missing encoder. A request that fails validation yields a failed
    /// result in its slot and the other requests still run.
    pub fn compress_batch(
        &self,
        requests: Vec<CompressionRequest>,
        concurrency_limit: usize,
        on_progress: Option<BatchCallback>,
    ) -> CompressorResult<Vec<CompressionResult>> {
        let scheduler = BatchScheduler::new(concurrency_limit)?;
        self.ensure_encoder()?;

        let slots: Vec<(PathBuf, PathBuf)> = requests
            .iter()
            .map(|r| (r.input_path.clone(), r.output_path.clone()))
            .collect();

        let outcomes = scheduler.run(requests, |index, request| {
            let job = match self.prepare(&request) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Rejected {}: {e}", request.input_path.display());
                    let result = rejected(&request, &e);
                    if let Some(callback) = &on_progress {
                        notify_rejection(callback, index, &result);
                    }
                    return result;
                }
            };
            if let Some(callback) = &on_progress {
                let callback = Arc::clone(callback);
                job.subscribe_callback(Arc::new(move |update: &JobUpdate| {
                    callback(index, update);
                }));
            }
            job.run()
        });

        let results: Vec<CompressionResult> = outcomes
            .into_iter()
            .zip(slots)
            .map(|(outcome, (input, output))| {
                outcome.unwrap_or_else(|panicked| {
                    panicked.into_result(Uuid::new_v4(), &input, &output)
                })
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(
            "Batch complete: {succeeded}/{} succeeded",
            results.len()
        );
        Ok(results)
    }
}

/// Terminal update for a request that never became a job.
fn notify_rejection(callback: &BatchCallback, index: usize, result: &CompressionResult) {
    let update = JobUpdate {
        job_id: result.job_id,
        event: ProgressEvent::terminal(result.clone()),
    };
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(index, &update))) {
        warn!(
            "Batch callback panicked for item {}: {}",
            index + 1,
            panic_message(payload.as_ref())
        );
    }
}

fn rejected(request: &CompressionRequest, error: &CompressorError) -> CompressionResult {
    let input_size_bytes = fs::metadata(&request.input_path).map_or(0, |m| m.len());
    CompressionResult::failed(
        Uuid::new_v4(),
        &request.input_path,
        &request.output_path,
        input_size_bytes,
        None,
        JobError::from(error),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::video_compressor::error::ErrorKind;
    use crate::component::video_compressor::job::JobState;
    use tempfile::{TempDir, tempdir};

    enum FixedProbe {
        Info(VideoInfo),
        NoVideo,
        Unavailable,
    }

    impl MetadataProbe for FixedProbe {
        fn probe(&self, path: &Path) -> Result<VideoInfo, ProbeError> {
            match self {
                Self::Info(info) => Ok(info.clone()),
                Self::NoVideo => Err(ProbeError::NoVideoStream(path.to_path_buf())),
                Self::Unavailable => Err(ProbeError::Unavailable("ffprobe".to_string())),
            }
        }
    }

    fn setup(probe: FixedProbe) -> (TempDir, Compressor, PathBuf) {
        let dir = tempdir().unwrap();
        let encoder = dir.path().join("ffmpeg");
        fs::write(&encoder, "").unwrap();
        let input = dir.path().join("clip.mp4");
        fs::write(&input, vec![0u8; 1024]).unwrap();
        let compressor = Compressor::new(
            encoder,
            Arc::new(PresetRegistry::default()),
            Arc::new(probe),
        );
        (dir, compressor, input)
    }

    fn known_duration() -> FixedProbe {
        FixedProbe::Info(VideoInfo {
            duration_seconds: Some(5.0),
            ..VideoInfo::default()
        })
    }

    #[test]
    fn test_prepare_builds_queued_job() {
        let (dir, compressor, input) = setup(known_duration());
        let output = dir.path().join("out").join("clip.webm");
        let job = compressor
            .prepare(&CompressionRequest::new(&input, &output, "web"))
            .unwrap();
        assert_eq!(job.state(), JobState::Queued);
        assert_eq!(job.params().preset_name, "web");
        assert_eq!(job.video_info().duration_seconds, Some(5.0));
        assert!(dir.path().join("out").is_dir());
    }

    #[test]
    fn test_unknown_preset() {
        let (dir, compressor, input) = setup(known_duration());
        let request = CompressionRequest::new(&input, &dir.path().join("o.webm"), "nope");
        let err = compressor.prepare(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownPreset);
    }

    #[test]
    fn test_missing_input() {
        let (dir, compressor, _) = setup(known_duration());
        let request = CompressionRequest::new(
            &dir.path().join("missing.mp4"),
            &dir.path().join("o.webm"),
            "web",
        );
        assert_eq!(
            compressor.prepare(&request).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_not_a_video() {
        let (dir, compressor, input) = setup(FixedProbe::NoVideo);
        let request = CompressionRequest::new(&input, &dir.path().join("o.webm"), "web");
        assert_eq!(
            compressor.prepare(&request).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_missing_probe_degrades() {
        let (dir, compressor, input) = setup(FixedProbe::Unavailable);
        let request = CompressionRequest::new(&input, &dir.path().join("o.webm"), "web");
        let job = compressor.prepare(&request).unwrap();
        assert_eq!(job.video_info(), &VideoInfo::default());
    }

    #[test]
    fn test_wrong_container_is_rejected_before_creating_directories() {
        let (dir, compressor, input) = setup(known_duration());
        let output = dir.path().join("new").join("clip.mp4");
        let err = compressor
            .prepare(&CompressionRequest::new(&input, &output, "web"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(!dir.path().join("new").exists());
    }

    #[test]
    fn test_missing_encoder() {
        let (dir, _, input) = setup(known_duration());
        let compressor = Compressor::new(
            dir.path().join("no-such-ffmpeg"),
            Arc::new(PresetRegistry::default()),
            Arc::new(known_duration()),
        );
        let request = CompressionRequest::new(&input, &dir.path().join("o.webm"), "web");
        assert_eq!(
            compressor.prepare(&request).unwrap_err().kind(),
            ErrorKind::EncoderNotFound
        );
        let err = compressor.compress_batch(vec![request], 2, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncoderNotFound);
    }

    #[test]
    fn test_detected_alpha_is_preserved_when_enabled() {
        let alpha = || {
            FixedProbe::Info(VideoInfo {
                has_alpha: true,
                ..VideoInfo::default()
            })
        };
        let (dir, compressor, input) = setup(alpha());
        let request = CompressionRequest::new(&input, &dir.path().join("o.webm"), "web");

        let job = compressor.prepare(&request).unwrap();
        assert!(!job.params().preserve_alpha);

        let compressor = compressor.with_alpha_detection(true);
        assert!(compressor.prepare(&request).unwrap().params().preserve_alpha);

        // vp8 cannot carry alpha, so detection leaves it off
        let legacy = CompressionRequest::new(&input, &dir.path().join("o.webm"), "vp8-legacy");
        assert!(!compressor.prepare(&legacy).unwrap().params().preserve_alpha);
    }

    #[test]
    fn test_batch_rejects_zero_limit() {
        let (_dir, compressor, _) = setup(known_duration());
        let err = compressor.compress_batch(Vec::new(), 0, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConcurrencyLimit);
    }

    #[test]
    fn test_into_directory() {
        let request = CompressionRequest::into_directory(
            Path::new("/videos/holiday.mov"),
            Path::new("/out"),
            "web",
        );
        assert_eq!(request.output_path, PathBuf::from("/out/holiday.webm"));
    }
}
