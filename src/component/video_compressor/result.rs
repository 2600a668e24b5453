use super::error::{ErrorKind, JobError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Terminal record of one compression job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    pub job_id: Uuid,
    pub success: bool,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub input_size_bytes: u64,
    pub output_size_bytes: u64,
    /// `input / output`; `0.0` when nothing was written
    pub compression_ratio: f64,
    /// Source duration, when the probe could determine it
    pub duration_seconds: Option<f64>,
    pub error: Option<JobError>,
}

impl CompressionResult {
    #[must_use]
    pub fn succeeded(
        job_id: Uuid,
        input_path: &Path,
        output_path: &Path,
        input_size_bytes: u64,
        output_size_bytes: u64,
        duration_seconds: Option<f64>,
    ) -> Self {
        Self {
            job_id,
            success: true,
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            input_size_bytes,
            output_size_bytes,
            compression_ratio: compression_ratio(input_size_bytes, output_size_bytes),
            duration_seconds,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(
        job_id: Uuid,
        input_path: &Path,
        output_path: &Path,
        input_size_bytes: u64,
        duration_seconds: Option<f64>,
        error: JobError,
    ) -> Self {
        Self {
            job_id,
            success: false,
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            input_size_bytes,
            output_size_bytes: 0,
            compression_ratio: 0.0,
            duration_seconds,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error_kind() == Some(ErrorKind::Cancelled)
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[must_use]
pub fn compression_ratio(input_size_bytes: u64, output_size_bytes: u64) -> f64 {
    if output_size_bytes == 0 {
        return 0.0;
    }
    input_size_bytes as f64 / output_size_bytes as f64
}
