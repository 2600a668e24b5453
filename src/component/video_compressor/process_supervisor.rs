//! Runs the encoder for one job and turns its stderr into progress events.

use super::command_builder::EncoderCommand;
use super::error::{CompressorError, ErrorKind, JobError};
use super::job::CancelToken;
use super::progress_hub::{ProgressEvent, ProgressHub, ProgressSnapshot};
use super::progress_parser::{ProgressMarker, for_each_line, parse_progress_line};
use super::result::CompressionResult;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long to keep reading stderr after the encoder exited
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Non-progress stderr lines kept for error reports
const TAIL_LINES: usize = 20;
/// Weight of the newest throughput sample in the ETA average
const RATE_SMOOTHING: f64 = 0.3;

enum PassOutcome {
    Succeeded,
    Failed(JobError),
    Cancelled,
}

/// Derives percentage and ETA from successive time markers.
///
/// Positions of multi-pass encodes are mapped onto one timeline so that
/// reported times never go backwards between passes.
#[derive(Debug)]
pub struct ProgressTracker {
    total_seconds: Option<f64>,
    pass_count: usize,
    smoothed_rate: Option<f64>,
    last_position: Option<f64>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(total_seconds: Option<f64>, pass_count: usize) -> Self {
        Self {
            total_seconds: total_seconds.filter(|t| t.is_finite() && *t > 0.0),
            pass_count: pass_count.max(1),
            smoothed_rate: None,
            last_position: None,
        }
    }

    /// `elapsed` is wall-clock time since the job started.
    pub fn observe(
        &mut self,
        pass_index: usize,
        marker: ProgressMarker,
        elapsed: Duration,
    ) -> Option<ProgressSnapshot> {
        let position = match self.total_seconds {
            Some(total) => {
                let within_pass = marker.position_seconds.clamp(0.0, total);
                (pass_index as f64 * total + within_pass) / self.pass_count as f64
            }
            // without a duration earlier passes cannot be placed on the timeline
            None if pass_index + 1 < self.pass_count => return None,
            None => marker.position_seconds.max(0.0),
        };

        if self.last_position.is_some_and(|last| position < last) {
            return None;
        }
        self.last_position = Some(position);

        let elapsed_secs = elapsed.as_secs_f64();
        if elapsed_secs > 0.0 && position > 0.0 {
            let sample = position / elapsed_secs;
            self.smoothed_rate = Some(match self.smoothed_rate {
                Some(rate) => RATE_SMOOTHING * sample + (1.0 - RATE_SMOOTHING) * rate,
                None => sample,
            });
        }

        let percentage = self
            .total_seconds
            .map(|total| (position / total * 100.0).min(100.0));
        let eta_seconds = match (self.total_seconds, self.smoothed_rate) {
            (Some(total), Some(rate)) if rate > 0.0 => Some(((total - position) / rate).max(0.0)),
            _ => None,
        };

        Some(ProgressSnapshot {
            current_time_seconds: position,
            total_time_seconds: self.total_seconds,
            percentage,
            eta_seconds,
            speed: marker.speed,
            pass: pass_index + 1,
            pass_count: self.pass_count,
        })
    }

    /// Snapshot marking the end of a successful encode, if it adds anything.
    #[must_use]
    pub fn final_snapshot(&self) -> Option<ProgressSnapshot> {
        let total = self.total_seconds?;
        if self.last_position.is_some_and(|last| last >= total) {
            return None;
        }
        Some(ProgressSnapshot {
            current_time_seconds: total,
            total_time_seconds: Some(total),
            percentage: Some(100.0),
            eta_seconds: Some(0.0),
            speed: None,
            pass: self.pass_count,
            pass_count: self.pass_count,
        })
    }
}

/// Supervises the encoder processes of a single job.
#[derive(Debug)]
pub struct ProcessSupervisor {
    encoder: PathBuf,
    job_id: Uuid,
    input_path: PathBuf,
    input_size_bytes: u64,
    duration_seconds: Option<f64>,
    cancel: CancelToken,
    grace_period: Duration,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(
        encoder: &Path,
        job_id: Uuid,
        input_path: &Path,
        input_size_bytes: u64,
        duration_seconds: Option<f64>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            encoder: encoder.to_path_buf(),
            job_id,
            input_path: input_path.to_path_buf(),
            input_size_bytes,
            duration_seconds,
            cancel,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn set_grace_period(&mut self, grace_period: Duration) {
        self.grace_period = grace_period;
    }

    /// Executes every pass of `command`, publishing progress into `hub`,
    /// and finishes with exactly one terminal event.
    pub fn run(
        &self,
        command: &EncoderCommand,
        total_duration_hint: Option<f64>,
        hub: &ProgressHub,
    ) -> CompressionResult {
        let started = Instant::now();
        let mut tracker = ProgressTracker::new(total_duration_hint, command.pass_count());
        let mut outcome = PassOutcome::Succeeded;

        for (pass_index, args) in command.passes().iter().enumerate() {
            outcome = self.run_pass(
                pass_index,
                command.pass_count(),
                args,
                &mut tracker,
                hub,
                started,
            );
            if !matches!(outcome, PassOutcome::Succeeded) {
                break;
            }
        }

        for log_file in command.passlog_files() {
            if log_file.exists() {
                if let Err(e) = fs::remove_file(&log_file) {
                    warn!("Failed to remove pass log {}: {e}", log_file.display());
                }
            }
        }

        let output_path = command.output_path();
        let result = match outcome {
            PassOutcome::Succeeded => match fs::metadata(output_path) {
                Ok(metadata) => {
                    if let Some(snapshot) = tracker.final_snapshot() {
                        let _ = hub.publish(ProgressEvent::Progress(snapshot));
                    }
                    CompressionResult::succeeded(
                        self.job_id,
                        &self.input_path,
                        output_path,
                        self.input_size_bytes,
                        metadata.len(),
                        self.duration_seconds,
                    )
                }
                Err(e) => self.failure(
                    output_path,
                    JobError::new(
                        ErrorKind::EncodingFailed,
                        format!("encoder reported success but output is missing: {e}"),
                    ),
                ),
            },
            PassOutcome::Failed(error) => self.failure(output_path, error),
            PassOutcome::Cancelled => self.failure(
                output_path,
                JobError::from(CompressorError::Cancelled),
            ),
        };

        match (&result.error, result.success) {
            (_, true) => info!(
                "Job {} completed in {:.1}s: {} ({:.2}x)",
                self.job_id,
                started.elapsed().as_secs_f64(),
                output_path.display(),
                result.compression_ratio
            ),
            (Some(error), false) if error.kind == ErrorKind::Cancelled => {
                warn!("Job {} cancelled: {}", self.job_id, self.input_path.display());
            }
            (error, false) => error!(
                "Job {} failed: {}",
                self.job_id,
                error.as_ref().map(ToString::to_string).unwrap_or_default()
            ),
        }

        if let Err(e) = hub.publish(ProgressEvent::terminal(result.clone())) {
            warn!("{e}");
        }
        result
    }

    fn failure(&self, output_path: &Path, error: JobError) -> CompressionResult {
        if output_path.exists() {
            match fs::remove_file(output_path) {
                Ok(()) => info!("Removed partial output: {}", output_path.display()),
                Err(e) => warn!(
                    "Failed to remove partial output {}: {e}",
                    output_path.display()
                ),
            }
        }
        CompressionResult::failed(
            self.job_id,
            &self.input_path,
            output_path,
            self.input_size_bytes,
            self.duration_seconds,
            error,
        )
    }

    fn spawn(&self, args: &[String]) -> io::Result<Child> {
        Command::new(&self.encoder)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
    }

    /// Reads stderr on a dedicated thread so the supervising loop can keep
    /// checking for cancellation between lines.
    fn spawn_stderr_reader(&self, child: &mut Child) -> Option<Receiver<String>> {
        let stderr = child.stderr.take()?;
        let (sender, receiver) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("stderr-{}", self.job_id))
            .spawn(move || {
                let result = for_each_line(stderr, |line| {
                    let _ = sender.send(line);
                });
                if let Err(e) = result {
                    debug!("stderr reader stopped: {e}");
                }
            });
        match spawned {
            Ok(_) => Some(receiver),
            Err(e) => {
                warn!("Job {}: could not start stderr reader: {e}", self.job_id);
                None
            }
        }
    }

    fn run_pass(
        &self,
        pass_index: usize,
        pass_count: usize,
        args: &[String],
        tracker: &mut ProgressTracker,
        hub: &ProgressHub,
        started: Instant,
    ) -> PassOutcome {
        if self.cancel.is_cancelled() {
            return PassOutcome::Cancelled;
        }

        let mut child = match self.spawn(args) {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return PassOutcome::Failed(JobError::from(CompressorError::EncoderNotFound(
                    self.encoder.display().to_string(),
                )));
            }
            Err(e) => {
                return PassOutcome::Failed(JobError::new(
                    ErrorKind::EncodingFailed,
                    format!("failed to start {}: {e}", self.encoder.display()),
                ));
            }
        };

        info!(
            "Encoder started [{}] job {} pass {}/{}",
            child.id(),
            self.job_id,
            pass_index + 1,
            pass_count
        );

        let receiver = self.spawn_stderr_reader(&mut child);
        let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
        let mut on_line = |line: String| {
            match parse_progress_line(&line) {
                Some(marker) => {
                    if let Some(snapshot) = tracker.observe(pass_index, marker, started.elapsed())
                    {
                        let _ = hub.publish(ProgressEvent::Progress(snapshot));
                    }
                }
                None => {
                    if tail.len() == TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
        };

        let mut stream_open = receiver.is_some();
        let status: ExitStatus = loop {
            if self.cancel.is_cancelled() {
                self.terminate(&mut child);
                return PassOutcome::Cancelled;
            }

            match (&receiver, stream_open) {
                (Some(rx), true) => match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(line) => on_line(line),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => stream_open = false,
                },
                _ => thread::sleep(POLL_INTERVAL),
            }

            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to poll encoder [{}]: {e}", child.id());
                    self.terminate(&mut child);
                    return PassOutcome::Failed(JobError::new(
                        ErrorKind::EncodingFailed,
                        format!("lost track of encoder process: {e}"),
                    ));
                }
            }
        };

        if let (Some(rx), true) = (&receiver, stream_open) {
            let deadline = Instant::now() + DRAIN_TIMEOUT;
            while let Ok(line) =
                rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            {
                on_line(line);
            }
        }

        if status.success() {
            PassOutcome::Succeeded
        } else {
            let tail = Vec::from(tail).join("\n");
            PassOutcome::Failed(JobError::from(CompressorError::EncodingFailed {
                status: status.to_string(),
                tail,
            }))
        }
    }

    /// Asks the encoder to stop, then kills it after the grace period.
    fn terminate(&self, child: &mut Child) {
        let pid = child.id();
        warn!("Terminating encoder [{pid}] for job {}", self.job_id);

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Ok(raw) = i32::try_from(pid) {
                if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                    debug!("SIGTERM to [{pid}] failed: {e}");
                }
            }

            let deadline = Instant::now() + self.grace_period;
            while Instant::now() < deadline {
                match child.try_wait() {
                    Ok(Some(_)) => return,
                    Ok(None) => thread::sleep(Duration::from_millis(50)),
                    Err(_) => break,
                }
            }
            warn!("Encoder [{pid}] ignored SIGTERM, killing");
        }

        let _ = child.kill();
        let _ = child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(position_seconds: f64) -> ProgressMarker {
        ProgressMarker {
            position_seconds,
            speed: None,
        }
    }

    #[test]
    fn test_percentage_and_eta() {
        let mut tracker = ProgressTracker::new(Some(100.0), 1);
        let snapshot = tracker
            .observe(0, marker(25.0), Duration::from_secs(5))
            .unwrap();
        assert_eq!(snapshot.percentage, Some(25.0));
        // 25s of video in 5s -> 5x, 75s remaining -> 15s
        assert!((snapshot.eta_seconds.unwrap() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentage_is_capped() {
        let mut tracker = ProgressTracker::new(Some(10.0), 1);
        let snapshot = tracker
            .observe(0, marker(12.0), Duration::from_secs(1))
            .unwrap();
        assert_eq!(snapshot.percentage, Some(100.0));
        assert_eq!(snapshot.eta_seconds, Some(0.0));
    }

    #[test]
    fn test_unknown_duration_has_no_percentage() {
        let mut tracker = ProgressTracker::new(None, 1);
        let snapshot = tracker
            .observe(0, marker(3.0), Duration::from_secs(1))
            .unwrap();
        assert_eq!(snapshot.percentage, None);
        assert_eq!(snapshot.eta_seconds, None);
        assert_eq!(snapshot.total_time_seconds, None);
        assert!(tracker.final_snapshot().is_none());
    }

    #[test]
    fn test_backwards_markers_are_dropped() {
        let mut tracker = ProgressTracker::new(Some(10.0), 1);
        assert!(tracker.observe(0, marker(4.0), Duration::from_secs(1)).is_some());
        assert!(tracker.observe(0, marker(3.0), Duration::from_secs(2)).is_none());
        assert!(tracker.observe(0, marker(4.0), Duration::from_secs(3)).is_some());
    }

    #[test]
    fn test_two_pass_timeline_is_monotonic() {
        let mut tracker = ProgressTracker::new(Some(10.0), 2);
        let a = tracker
            .observe(0, marker(10.0), Duration::from_secs(1))
            .unwrap();
        let b = tracker
            .observe(1, marker(0.0), Duration::from_secs(2))
            .unwrap();
        let c = tracker
            .observe(1, marker(10.0), Duration::from_secs(3))
            .unwrap();
        assert_eq!(a.percentage, Some(50.0));
        assert_eq!(b.current_time_seconds, 5.0);
        assert_eq!(c.percentage, Some(100.0));
        assert_eq!((c.pass, c.pass_count), (2, 2));
    }

    #[test]
    fn test_two_pass_without_duration_skips_first_pass() {
        let mut tracker = ProgressTracker::new(None, 2);
        assert!(tracker.observe(0, marker(5.0), Duration::from_secs(1)).is_none());
        assert!(tracker.observe(1, marker(1.0), Duration::from_secs(2)).is_some());
    }

    #[test]
    fn test_eta_is_smoothed() {
        let mut tracker = ProgressTracker::new(Some(100.0), 1);
        tracker.observe(0, marker(10.0), Duration::from_secs(1)); // 10x
        let snapshot = tracker
            .observe(0, marker(20.0), Duration::from_secs(10)) // sample 2x
            .unwrap();
        // 0.3 * 2 + 0.7 * 10 = 7.6
        assert!((snapshot.eta_seconds.unwrap() - 80.0 / 7.6).abs() < 1e-9);
    }
}
