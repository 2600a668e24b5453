use super::command_builder::EncoderCommand;
use super::error::{ErrorKind, JobError};
use super::preset::EffectiveParameters;
use super::process_supervisor::ProcessSupervisor;
use super::progress_hub::{
    ProgressEvent, ProgressHub, ProgressSnapshot, Subscription, UpdateCallback,
};
use super::result::CompressionResult;
use crate::tools::VideoInfo;
use log::{error, info, warn};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running | Self::Cancelled | Self::Failed)
                | (Self::Running, Self::Completed | Self::Failed | Self::Cancelled)
        )
    }

    #[must_use]
    pub fn from_result(result: &CompressionResult) -> Self {
        if result.success {
            Self::Completed
        } else if result.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Failed
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation flag, optionally chained to a process-wide
/// shutdown signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn child_of(shutdown_signal: &Arc<AtomicBool>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::clone(shutdown_signal)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.load(Ordering::SeqCst))
    }
}

/// Cloneable view of a job for observers on other threads.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    hub: Arc<ProgressHub>,
    cancel: CancelToken,
}

impl JobHandle {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }

    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    #[must_use]
    pub fn latest(&self) -> Option<ProgressSnapshot> {
        self.hub.latest()
    }

    /// Requests cancellation; the running encoder is terminated.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.hub.is_closed()
    }
}

/// One compression task from creation to its terminal state.
#[derive(Debug)]
pub struct Job {
    id: Uuid,
    input_path: PathBuf,
    output_path: PathBuf,
    params: EffectiveParameters,
    command: EncoderCommand,
    video_info: VideoInfo,
    input_size_bytes: u64,
    state: JobState,
    hub: Arc<ProgressHub>,
    cancel: CancelToken,
    supervisor: ProcessSupervisor,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        encoder: &Path,
        input_path: &Path,
        output_path: &Path,
        params: EffectiveParameters,
        command: EncoderCommand,
        video_info: VideoInfo,
        input_size_bytes: u64,
        cancel: CancelToken,
    ) -> Self {
        let id = Uuid::new_v4();
        let supervisor = ProcessSupervisor::new(
            encoder,
            id,
            input_path,
            input_size_bytes,
            video_info.duration_seconds,
            cancel.clone(),
        );
        Self {
            id,
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            params,
            command,
            video_info,
            input_size_bytes,
            state: JobState::Queued,
            hub: Arc::new(ProgressHub::new(id)),
            cancel,
            supervisor,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> JobState {
        self.state
    }

    #[must_use]
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    #[must_use]
    pub const fn params(&self) -> &EffectiveParameters {
        &self.params
    }

    #[must_use]
    pub const fn command(&self) -> &EncoderCommand {
        &self.command
    }

    #[must_use]
    pub const fn video_info(&self) -> &VideoInfo {
        &self.video_info
    }

    #[must_use]
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            hub: Arc::clone(&self.hub),
            cancel: self.cancel.clone(),
        }
    }

    pub fn subscribe_callback(&self, callback: UpdateCallback) {
        self.hub.subscribe_callback(callback);
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.supervisor.set_grace_period(grace_period);
        self
    }

    fn transition(&mut self, next: JobState) {
        if self.state.can_transition_to(next) {
            self.state = next;
        } else {
            error!(
                "Job {}: invalid state transition {} -> {}",
                self.id, self.state, next
            );
        }
    }

    /// Runs the job to completion on the calling thread.
    pub fn run(mut self) -> CompressionResult {
        if self.cancel.is_cancelled() {
            warn!("Job {} cancelled before start: {}", self.id, self.input_path.display());
            let result = CompressionResult::failed(
                self.id,
                &self.input_path,
                &self.output_path,
                self.input_size_bytes,
                self.video_info.duration_seconds,
                JobError::new(ErrorKind::Cancelled, "compression cancelled before start"),
            );
            self.transition(JobState::Cancelled);
            let _ = self.hub.publish(ProgressEvent::terminal(result.clone()));
            return result;
        }

        self.transition(JobState::Running);
        info!(
            "Job {} running: {} -> {} (preset {})",
            self.id,
            self.input_path.display(),
            self.output_path.display(),
            self.params.preset_name
        );

        let result = self.supervisor.run(
            &self.command,
            self.video_info.duration_seconds,
            &self.hub,
        );
        self.transition(JobState::from_result(&result));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Queued.can_transition_to(JobState::Cancelled));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(JobState::Running.can_transition_to(JobState::Cancelled));
        assert!(!JobState::Completed.can_transition_to(JobState::Failed));
        assert!(!JobState::Cancelled.can_transition_to(JobState::Running));
        assert!(!JobState::Queued.can_transition_to(JobState::Completed));
    }

    #[test]
    fn test_cancel_token_follows_parent() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let a = CancelToken::child_of(&shutdown);
        let b = CancelToken::child_of(&shutdown);

        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());

        shutdown.store(true, Ordering::SeqCst);
        assert!(b.is_cancelled());
    }
}
