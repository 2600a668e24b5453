use super::progress_hub::{JobUpdate, ProgressEvent};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default, PartialEq)]
struct Slot {
    percentage: f64,
    finished: bool,
    succeeded: bool,
}

/// Point-in-time view of a whole batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchStatus {
    pub total: usize,
    pub finished: usize,
    pub succeeded: usize,
    pub overall_percentage: f64,
}

/// Folds per-job updates into batch-wide progress.
///
/// Jobs are addressed by their index in the batch. A finished job always
/// counts as 100% towards the overall figure, whatever its outcome.
#[derive(Debug)]
pub struct BatchProgress {
    slots: Mutex<Vec<Slot>>,
}

impl BatchProgress {
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            slots: Mutex::new(vec![Slot::default(); total]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, index: usize, update: &JobUpdate) {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(index) else {
            return;
        };
        if slot.finished {
            return;
        }
        match &update.event {
            ProgressEvent::Progress(snapshot) => {
                if let Some(percentage) = snapshot.percentage {
                    slot.percentage = slot.percentage.max(percentage.clamp(0.0, 100.0));
                }
            }
            ProgressEvent::Completed(_) => {
                slot.percentage = 100.0;
                slot.finished = true;
                slot.succeeded = true;
            }
            ProgressEvent::Failed(_) | ProgressEvent::Cancelled(_) => {
                slot.percentage = 100.0;
                slot.finished = true;
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> BatchStatus {
        let slots = self.lock();
        let total = slots.len();
        let overall_percentage = if total == 0 {
            100.0
        } else {
            slots.iter().map(|slot| slot.percentage).sum::<f64>() / total as f64
        };
        BatchStatus {
            total,
            finished: slots.iter().filter(|slot| slot.finished).count(),
            succeeded: slots.iter().filter(|slot| slot.succeeded).count(),
            overall_percentage,
        }
    }

    #[must_use]
    pub fn job_percentage(&self, index: usize) -> Option<f64> {
        self.lock().get(index).map(|slot| slot.percentage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::video_compressor::error::{ErrorKind, JobError};
    use crate::component::video_compressor::progress_hub::ProgressSnapshot;
    use crate::component::video_compressor::result::CompressionResult;
    use std::path::Path;
    use uuid::Uuid;

    fn progress(percentage: f64) -> JobUpdate {
        JobUpdate {
            job_id: Uuid::nil(),
            event: ProgressEvent::Progress(ProgressSnapshot {
                current_time_seconds: percentage,
                total_time_seconds: Some(100.0),
                percentage: Some(percentage),
                eta_seconds: None,
                speed: None,
                pass: 1,
                pass_count: 1,
            }),
        }
    }

    fn failed() -> JobUpdate {
        let result = CompressionResult::failed(
            Uuid::nil(),
            Path::new("a.mp4"),
            Path::new("a.webm"),
            10,
            None,
            JobError::new(ErrorKind::EncodingFailed, "boom"),
        );
        JobUpdate {
            job_id: Uuid::nil(),
            event: ProgressEvent::terminal(result),
        }
    }

    #[test]
    fn test_overall_percentage_is_mean() {
        let progress_map = BatchProgress::new(2);
        progress_map.record(0, &progress(50.0));
        progress_map.record(1, &progress(25.0));
        let status = progress_map.status();
        assert!((status.overall_percentage - 37.5).abs() < 1e-9);
        assert_eq!(status.finished, 0);
    }

    #[test]
    fn test_failed_job_counts_as_finished() {
        let progress_map = BatchProgress::new(2);
        progress_map.record(0, &failed());
        let status = progress_map.status();
        assert_eq!(status.finished, 1);
        assert_eq!(status.succeeded, 0);
        assert!((status.overall_percentage - 50.0).abs() < 1e-9);
        // updates after the terminal event are ignored
        progress_map.record(0, &progress(10.0));
        assert_eq!(progress_map.job_percentage(0), Some(100.0));
    }

    #[test]
    fn test_poisoned_lock_still_records() {
        let progress_map = std::sync::Arc::new(BatchProgress::new(2));
        let poisoner = std::sync::Arc::clone(&progress_map);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.slots.lock().unwrap();
            panic!("poison the batch lock");
        })
        .join();
        assert!(progress_map.slots.is_poisoned());

        progress_map.record(0, &progress(40.0));
        progress_map.record(1, &failed());
        let status = progress_map.status();
        assert_eq!(status.total, 2);
        assert_eq!(status.finished, 1);
        assert!((status.overall_percentage - 70.0).abs() < 1e-9);
        assert_eq!(progress_map.job_percentage(0), Some(40.0));
    }

    #[test]
    fn test_out_of_range_index_is_ignored() {
        let progress_map = BatchProgress::new(1);
        progress_map.record(5, &progress(80.0));
        assert_eq!(progress_map.job_percentage(0), Some(0.0));
        assert_eq!(progress_map.job_percentage(5), None);
    }
}
