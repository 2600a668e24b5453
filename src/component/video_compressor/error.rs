use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Stable classification of every failure the compressor can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EncoderNotFound,
    InvalidInput,
    UnknownPreset,
    DuplicateName,
    InvalidParameter,
    EncodingFailed,
    Cancelled,
    InvalidConcurrencyLimit,
    WorkerPool,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EncoderNotFound => "encoder_not_found",
            Self::InvalidInput => "invalid_input",
            Self::UnknownPreset => "unknown_preset",
            Self::DuplicateName => "duplicate_name",
            Self::InvalidParameter => "invalid_parameter",
            Self::EncodingFailed => "encoding_failed",
            Self::Cancelled => "cancelled",
            Self::InvalidConcurrencyLimit => "invalid_concurrency_limit",
            Self::WorkerPool => "worker_pool",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CompressorError {
    #[error(
        "{0} not found. Please install FFmpeg:\n  macOS: brew install ffmpeg\n  Ubuntu/Debian: sudo apt-get install ffmpeg\n  Windows: https://ffmpeg.org/download.html"
    )]
    EncoderNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown preset '{name}'. Available presets: {available}")]
    UnknownPreset { name: String, available: String },

    #[error("preset '{0}' is already registered")]
    DuplicateName(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("encoder exited with {status}: {tail}")]
    EncodingFailed { status: String, tail: String },

    #[error("compression cancelled")]
    Cancelled,

    #[error("concurrency limit must be at least 1, got {0}")]
    InvalidConcurrencyLimit(usize),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),
}

impl CompressorError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EncoderNotFound(_) => ErrorKind::EncoderNotFound,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::UnknownPreset { .. } => ErrorKind::UnknownPreset,
            Self::DuplicateName(_) => ErrorKind::DuplicateName,
            Self::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Self::EncodingFailed { .. } => ErrorKind::EncodingFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidConcurrencyLimit(_) => ErrorKind::InvalidConcurrencyLimit,
            Self::WorkerPool(_) => ErrorKind::WorkerPool,
        }
    }
}

/// Error as carried inside a finished job's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&CompressorError> for JobError {
    fn from(error: &CompressorError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

impl From<CompressorError> for JobError {
    fn from(error: CompressorError) -> Self {
        Self::from(&error)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

pub type CompressorResult<T> = std::result::Result<T, CompressorError>;


/// Text of a caught panic payload.
pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
