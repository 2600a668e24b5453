use super::error::{CompressorError, CompressorResult, ErrorKind, JobError, panic_message};
use super::job::Job;
use super::result::CompressionResult;
use log::{debug, error, info};
use rayon::ThreadPool;
use rayon::prelude::*;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use uuid::Uuid;

/// A work item that panicked instead of returning.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("batch item {index} panicked: {message}")]
pub struct WorkerPanic {
    pub index: usize,
    pub message: String,
}

impl WorkerPanic {
    /// Failed result recorded in the slot of the panicked item.
    #[must_use]
    pub fn into_result(
        self,
        job_id: Uuid,
        input_path: &Path,
        output_path: &Path,
    ) -> CompressionResult {
        let input_size_bytes = fs::metadata(input_path).map_or(0, |m| m.len());
        CompressionResult::failed(
            job_id,
            input_path,
            output_path,
            input_size_bytes,
            None,
            JobError::new(ErrorKind::EncodingFailed, self.to_string()),
        )
    }
}

/// Runs independent work items with at most `limit` of them in flight.
///
/// Results are returned in submission order regardless of completion order,
/// and one item failing never affects the others.
#[derive(Debug)]
pub struct BatchScheduler {
    limit: usize,
    pool: ThreadPool,
}

impl BatchScheduler {
    pub fn new(limit: usize) -> CompressorResult<Self> {
        if limit < 1 {
            return Err(CompressorError::InvalidConcurrencyLimit(limit));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(limit)
            .thread_name(|index| format!("compress-worker-{index}"))
            .build()
            .map_err(|e| CompressorError::WorkerPool(e.to_string()))?;
        Ok(Self { limit, pool })
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Calls `worker(index, item)` for every item and collects the outputs.
    /// A panicking item yields [`WorkerPanic`] in its slot; the others
    /// still run to completion.
    pub fn run<T, R, F>(&self, items: Vec<T>, worker: F) -> Vec<Result<R, WorkerPanic>>
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> R + Sync,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }
        info!(
            "Batch started: {total} item(s), up to {} at a time",
            self.limit
        );

        let active = AtomicUsize::new(0);
        let results: Vec<Result<R, WorkerPanic>> = self.pool.install(|| {
            items
                .into_par_iter()
                .with_max_len(1)
                .enumerate()
                .map(|(index, item)| {
                    let running = active.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!("Batch item {} started ({running} active)", index + 1);
                    let output = panic::catch_unwind(AssertUnwindSafe(|| worker(index, item)))
                        .map_err(|payload| WorkerPanic {
                            index,
                            message: panic_message(payload.as_ref()),
                        });
                    active.fetch_sub(1, Ordering::SeqCst);
                    match &output {
                        Ok(_) => debug!("Batch item {} finished", index + 1),
                        Err(e) => error!("{e}"),
                    }
                    output
                })
                .collect()
        });

        info!("Batch finished: {total} item(s)");
        results
    }
}

/// Runs prepared jobs with at most `concurrency_limit` encoders at a time.
pub fn run_batch(
    jobs: Vec<Job>,
    concurrency_limit: usize,
) -> CompressorResult<Vec<CompressionResult>> {
    let scheduler = BatchScheduler::new(concurrency_limit)?;
    let slots: Vec<(Uuid, PathBuf, PathBuf)> = jobs
        .iter()
        .map(|job| {
            (
                job.id(),
                job.input_path().to_path_buf(),
                job.output_path().to_path_buf(),
            )
        })
        .collect();

    let results = scheduler.run(jobs, |_, job| job.run());
    Ok(results
        .into_iter()
        .zip(slots)
        .map(|(result, (job_id, input, output))| {
            result.unwrap_or_else(|panicked| panicked.into_result(job_id, &input, &output))
        })
        .collect())
}
