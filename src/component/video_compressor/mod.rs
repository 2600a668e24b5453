//! WebM compression: presets, encoder command construction, process
//! supervision, per-job progress fan-out and bounded batch execution.

mod batch_progress;
mod batch_scheduler;
mod command_builder;
mod compressor;
mod error;
mod event_stream;
mod job;
mod main;
mod preset;
mod process_supervisor;
mod progress_hub;
mod progress_parser;
mod result;

pub use batch_progress::{BatchProgress, BatchStatus};
pub use batch_scheduler::{BatchScheduler, WorkerPanic, run_batch};
pub use command_builder::{
    CommandBuilder, EncoderCommand, OUTPUT_EXTENSION, derive_output_path, scale_filter,
};
pub use compressor::{BatchCallback, CompressionRequest, Compressor};
pub use error::{CompressorError, CompressorResult, ErrorKind, JobError};
pub use event_stream::{DEFAULT_KEEPALIVE, StreamEnd, write_event_stream, write_frame};
pub use job::{CancelToken, Job, JobHandle, JobState};
pub use main::VideoCompressor;
pub use preset::{
    Bitrate, CRF_RANGE, Codec, CompressionPreset, EffectiveParameters, PresetOverrides,
    PresetRegistry, Resolution, builtin_presets,
};
pub use process_supervisor::{DEFAULT_GRACE_PERIOD, ProcessSupervisor, ProgressTracker};
pub use progress_hub::{
    HubClosed, JobUpdate, ProgressEvent, ProgressHub, ProgressSnapshot, SubscriberId,
    Subscription, UpdateCallback,
};
pub use progress_parser::{MAX_LINE_BYTES, ProgressMarker, for_each_line, parse_progress_line};
pub use result::{CompressionResult, compression_ratio};
