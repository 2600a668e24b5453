//! Per-job fan-out of progress and terminal events.

use super::error::panic_message;
use super::result::CompressionResult;
use log::{debug, warn};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryIter};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Point-in-time view of a running job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub current_time_seconds: f64,
    pub total_time_seconds: Option<f64>,
    pub percentage: Option<f64>,
    pub eta_seconds: Option<f64>,
    /// Encoding speed reported by the encoder, as a multiple of realtime
    pub speed: Option<f64>,
    /// 1-based pass number
    pub pass: usize,
    pub pass_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress(ProgressSnapshot),
    Completed(CompressionResult),
    Failed(CompressionResult),
    Cancelled(CompressionResult),
}

impl ProgressEvent {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Progress(_) => "progress",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled(_) => "cancelled",
        }
    }

    /// Terminal event matching the outcome recorded in `result`.
    #[must_use]
    pub fn terminal(result: CompressionResult) -> Self {
        if result.success {
            Self::Completed(result)
        } else if result.is_cancelled() {
            Self::Cancelled(result)
        } else {
            Self::Failed(result)
        }
    }
}

/// An event tagged with the job it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobUpdate {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

pub type UpdateCallback = Arc<dyn Fn(&JobUpdate) + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("progress hub for job {0} is closed")]
pub struct HubClosed(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

enum Delivery {
    Channel(Sender<JobUpdate>),
    Callback(UpdateCallback),
}

impl Clone for Delivery {
    fn clone(&self) -> Self {
        match self {
            Self::Channel(sender) => Self::Channel(sender.clone()),
            Self::Callback(callback) => Self::Callback(Arc::clone(callback)),
        }
    }
}

#[derive(Default)]
struct HubState {
    subscribers: Vec<(SubscriberId, Delivery)>,
    latest: Option<ProgressSnapshot>,
    terminal: Option<ProgressEvent>,
    next_id: u64,
}

pub struct ProgressHub {
    job_id: Uuid,
    state: Mutex<HubState>,
}

impl std::fmt::Debug for ProgressHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHub")
            .field("job_id", &self.job_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ProgressHub {
    #[must_use]
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            state: Mutex::new(HubState::default()),
        }
    }

    #[must_use]
    pub const fn job_id(&self) -> Uuid {
        self.job_id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Channel listener receiving every event published from now on.
    /// Dropping the returned value detaches it.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let mut state = self.lock();
        // a closed hub hands out a listener that is already at its end
        if state.terminal.is_none() {
            let id = SubscriberId(state.next_id);
            state.next_id += 1;
            state.subscribers.push((id, Delivery::Channel(sender)));
        }
        Subscription {
            job_id: self.job_id,
            receiver,
        }
    }

    /// Callback listener, invoked on the publishing thread. A callback that
    /// panics is detached and the job keeps running.
    pub fn subscribe_callback(&self, callback: UpdateCallback) -> Option<SubscriberId> {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return None;
        }
        let id = SubscriberId(state.next_id);
        state.next_id += 1;
        state.subscribers.push((id, Delivery::Callback(callback)));
        Some(id)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.lock().subscribers.retain(|(sid, _)| *sid != id);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Most recent progress snapshot, kept for late subscribers.
    #[must_use]
    pub fn latest(&self) -> Option<ProgressSnapshot> {
        self.lock().latest.clone()
    }

    /// The terminal event once the job has finished.
    #[must_use]
    pub fn terminal_event(&self) -> Option<ProgressEvent> {
        self.lock().terminal.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().terminal.is_some()
    }

    /// Delivers `event` to every connected subscriber. A terminal event
    /// closes the hub; anything published after that is rejected.
    pub fn publish(&self, event: ProgressEvent) -> Result<(), HubClosed> {
        let update = JobUpdate {
            job_id: self.job_id,
            event,
        };

        let deliveries: Vec<(SubscriberId, Delivery)> = {
            let mut state = self.lock();
            if state.terminal.is_some() {
                return Err(HubClosed(self.job_id));
            }
            match &update.event {
                ProgressEvent::Progress(snapshot) => state.latest = Some(snapshot.clone()),
                terminal => state.terminal = Some(terminal.clone()),
            }
            if update.event.is_terminal() {
                std::mem::take(&mut state.subscribers)
            } else {
                state.subscribers.clone()
            }
        };

        let mut disconnected = Vec::new();
        for (id, delivery) in &deliveries {
            match delivery {
                Delivery::Channel(sender) => {
                    if sender.send(update.clone()).is_err() {
                        disconnected.push(*id);
                    }
                }
                Delivery::Callback(callback) => {
                    let delivered = panic::catch_unwind(AssertUnwindSafe(|| callback(&update)));
                    if let Err(payload) = delivered {
                        warn!(
                            "Job {}: progress callback panicked, detaching it: {}",
                            self.job_id,
                            panic_message(payload.as_ref())
                        );
                        disconnected.push(*id);
                    }
                }
            }
        }

        if !disconnected.is_empty() {
            debug!(
                "Job {}: dropping {} detached subscriber(s)",
                self.job_id,
                disconnected.len()
            );
            self.lock()
                .subscribers
                .retain(|(id, _)| !disconnected.contains(id));
        }
        Ok(())
    }
}

/// Detachable listener handle returned by [`ProgressHub::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    job_id: Uuid,
    receiver: Receiver<JobUpdate>,
}

impl Subscription {
    #[must_use]
    pub const fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Blocks for the next update; `None` once the hub has closed and
    /// everything was received.
    pub fn recv(&self) -> Option<JobUpdate> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<JobUpdate, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn try_iter(&self) -> TryIter<'_, JobUpdate> {
        self.receiver.try_iter()
    }
}

impl Iterator for Subscription {
    type Item = JobUpdate;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::video_compressor::error::{ErrorKind, JobError};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(t: f64) -> ProgressSnapshot {
        ProgressSnapshot {
            current_time_seconds: t,
            total_time_seconds: Some(10.0),
            percentage: Some(t * 10.0),
            eta_seconds: None,
            speed: None,
            pass: 1,
            pass_count: 1,
        }
    }

    fn result(job_id: Uuid, success: bool) -> CompressionResult {
        if success {
            CompressionResult::succeeded(
                job_id,
                Path::new("a.mp4"),
                Path::new("a.webm"),
                100,
                10,
                None,
            )
        } else {
            CompressionResult::failed(
                job_id,
                Path::new("a.mp4"),
                Path::new("a.webm"),
                100,
                None,
                JobError::new(ErrorKind::EncodingFailed, "exit 1"),
            )
        }
    }

    #[test]
    fn test_subscriber_receives_events_in_order() {
        let hub = ProgressHub::new(Uuid::new_v4());
        let sub = hub.subscribe();

        hub.publish(ProgressEvent::Progress(snapshot(1.0))).unwrap();
        hub.publish(ProgressEvent::Progress(snapshot(2.0))).unwrap();
        hub.publish(ProgressEvent::terminal(result(hub.job_id(), true)))
            .unwrap();

        let events: Vec<JobUpdate> = sub.collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event.name(), "progress");
        assert_eq!(events[2].event.name(), "completed");
        assert!(events.iter().all(|u| u.job_id == hub.job_id()));
    }

    #[test]
    fn test_late_subscriber_gets_no_history_but_latest_is_cached() {
        let hub = ProgressHub::new(Uuid::new_v4());
        hub.publish(ProgressEvent::Progress(snapshot(3.0))).unwrap();

        let sub = hub.subscribe();
        assert!(sub.try_iter().next().is_none());
        assert_eq!(hub.latest(), Some(snapshot(3.0)));

        hub.publish(ProgressEvent::Progress(snapshot(4.0))).unwrap();
        let update = sub.recv().unwrap();
        assert_eq!(update.event, ProgressEvent::Progress(snapshot(4.0)));
    }

    #[test]
    fn test_publish_after_terminal_is_rejected() {
        let hub = ProgressHub::new(Uuid::new_v4());
        hub.publish(ProgressEvent::terminal(result(hub.job_id(), false)))
            .unwrap();
        assert!(hub.is_closed());
        assert_eq!(
            hub.publish(ProgressEvent::Progress(snapshot(1.0))),
            Err(HubClosed(hub.job_id()))
        );
        assert_eq!(
            hub.publish(ProgressEvent::terminal(result(hub.job_id(), true))),
            Err(HubClosed(hub.job_id()))
        );
        assert!(matches!(hub.terminal_event(), Some(ProgressEvent::Failed(_))));
        assert!(hub.subscribe().recv().is_none());
    }

    #[test]
    fn test_dropped_subscriber_is_not_an_error() {
        let hub = ProgressHub::new(Uuid::new_v4());
        let kept = hub.subscribe();
        let dropped = hub.subscribe();
        drop(dropped);

        hub.publish(ProgressEvent::Progress(snapshot(1.0))).unwrap();
        assert_eq!(hub.subscriber_count(), 1);
        assert!(kept.recv().is_some());
    }

    #[test]
    fn test_callback_subscriber_and_unsubscribe() {
        let hub = ProgressHub::new(Uuid::new_v4());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = hub
            .subscribe_callback(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })).unwrap();

        hub.publish(ProgressEvent::Progress(snapshot(1.0))).unwrap();
        hub.unsubscribe(id);
        hub.publish(ProgressEvent::Progress(snapshot(2.0))).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callback_is_detached() {
        let hub = ProgressHub::new(Uuid::new_v4());
        let sub = hub.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        hub.subscribe_callback(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("listener bug");
        }));

        hub.publish(ProgressEvent::Progress(snapshot(1.0))).unwrap();
        hub.publish(ProgressEvent::Progress(snapshot(2.0))).unwrap();
        hub.publish(ProgressEvent::terminal(result(hub.job_id(), true)))
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sub.count(), 3);
        assert!(matches!(hub.terminal_event(), Some(ProgressEvent::Completed(_))));
    }

    #[test]
    fn test_terminal_event_delivered_once() {
        let hub = ProgressHub::new(Uuid::new_v4());
        let sub = hub.subscribe();
        hub.publish(ProgressEvent::terminal(result(hub.job_id(), true)))
            .unwrap();
        let _ = hub.publish(ProgressEvent::terminal(result(hub.job_id(), true)));

        let terminals = sub.filter(|u| u.event.is_terminal()).count();
        assert_eq!(terminals, 1);
    }

    #[test]
    fn test_update_serialization_is_keyed_by_job() {
        let job_id = Uuid::nil();
        let update = JobUpdate {
            job_id,
            event: ProgressEvent::Progress(snapshot(5.0)),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["job_id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["event"], "progress");
        assert_eq!(json["data"]["current_time_seconds"], 5.0);
        assert_eq!(json["data"]["percentage"], 50.0);
    }
}
