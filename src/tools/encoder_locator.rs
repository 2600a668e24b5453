use crate::component::video_compressor::{CompressorError, CompressorResult};
use log::{info, warn};
use std::path::{Path, PathBuf};

pub const ENCODER_BINARY: &str = "ffmpeg";
pub const PROBE_BINARY: &str = "ffprobe";

/// Resolves a tool from its configured path, falling back to `PATH`.
#[must_use]
pub fn locate_tool(name: &str, configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!(
            "Configured {name} path does not exist, searching PATH: {}",
            path.display()
        );
    }
    which::which(name).ok()
}

/// Finds the encoder binary; its absence is reported before any job starts.
pub fn locate_encoder(configured: Option<&Path>) -> CompressorResult<PathBuf> {
    require_tool(ENCODER_BINARY, configured)
}

fn require_tool(name: &str, configured: Option<&Path>) -> CompressorResult<PathBuf> {
    let path = locate_tool(name, configured)
        .ok_or_else(|| CompressorError::EncoderNotFound(name.to_string()))?;
    info!("Using {name}: {}", path.display());
    Ok(path)
}
