use log::debug;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Pixel format fragments that carry an alpha plane.
const ALPHA_PIXEL_FORMATS: &[&str] = &["yuva", "rgba", "argb", "bgra", "abgr", "gbra", "ya"];

/// Source metadata. Every field is optional; callers must cope with gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoInfo {
    pub duration_seconds: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,
    pub has_alpha: bool,
    pub bitrate: Option<u64>,
    pub frame_rate: Option<f64>,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe binary not available: {0}")]
    Unavailable(String),
    #[error("no video stream in {}", .0.display())]
    NoVideoStream(PathBuf),
    #[error("probe rejected {}: {message}", path.display())]
    Rejected { path: PathBuf, message: String },
    #[error("unreadable probe output: {0}")]
    Malformed(String),
}

/// Supplies metadata about an input before its command is built.
pub trait MetadataProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<VideoInfo, ProbeError>;
}

#[derive(Deserialize)]
struct FfprobeOutput {
    format: Option<FormatInfo>,
    streams: Option<Vec<StreamInfo>>,
}

#[derive(Deserialize)]
struct FormatInfo {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Deserialize)]
struct StreamInfo {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Runs `ffprobe` and reads its JSON report.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: PathBuf,
}

impl FfprobeProbe {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl MetadataProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> Result<VideoInfo, ProbeError> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    ProbeError::Unavailable(self.binary.display().to_string())
                }
                _ => ProbeError::Unavailable(format!("{}: {e}", self.binary.display())),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Rejected {
                path: path.to_path_buf(),
                message: format!("{} {}", output.status, stderr.trim()),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_output(path, &stdout)
    }
}

/// Turns an ffprobe JSON report into [`VideoInfo`].
pub fn parse_ffprobe_output(path: &Path, json: &str) -> Result<VideoInfo, ProbeError> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| ProbeError::Malformed(e.to_string()))?;

    let video_stream = probe
        .streams
        .as_ref()
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s.codec_type.as_deref() == Some("video"))
        })
        .ok_or_else(|| ProbeError::NoVideoStream(path.to_path_buf()))?;

    // format duration first, stream duration as fallback
    let duration_seconds = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(parse_positive)
        .or_else(|| video_stream.duration.as_deref().and_then(parse_positive));

    let bitrate = probe
        .format
        .as_ref()
        .and_then(|f| f.bit_rate.as_deref())
        .or(video_stream.bit_rate.as_deref())
        .and_then(|b| b.parse::<u64>().ok());

    let has_alpha = video_stream
        .pix_fmt
        .as_deref()
        .is_some_and(pixel_format_has_alpha);

    let info = VideoInfo {
        duration_seconds,
        width: video_stream.width,
        height: video_stream.height,
        codec: video_stream.codec_name.clone(),
        has_alpha,
        bitrate,
        frame_rate: video_stream
            .r_frame_rate
            .as_deref()
            .and_then(parse_frame_rate),
    };
    debug!("Probed {}: {info:?}", path.display());
    Ok(info)
}

fn parse_positive(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
}

#[must_use]
pub fn pixel_format_has_alpha(pix_fmt: &str) -> bool {
    let pix_fmt = pix_fmt.to_ascii_lowercase();
    ALPHA_PIXEL_FORMATS
        .iter()
        .any(|fragment| pix_fmt.contains(fragment))
}

/// Parses a frame rate such as "30/1" or "30000/1001".
fn parse_frame_rate(rate: &str) -> Option<f64> {
    if let Some((num_str, den_str)) = rate.split_once('/') {
        let num: f64 = num_str.parse().ok()?;
        let den: f64 = den_str.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    rate.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"codec_type": "audio", "codec_name": "aac"},
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "pix_fmt": "yuv420p", "r_frame_rate": "30000/1001", "duration": "12.5"}
        ],
        "format": {"duration": "12.480000", "bit_rate": "4000000"}
    }"#;

    #[test]
    fn test_parse_full_report() {
        let info = parse_ffprobe_output(Path::new("a.mp4"), SAMPLE).unwrap();
        assert_eq!(info.duration_seconds, Some(12.48));
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
        assert_eq!(info.codec.as_deref(), Some("h264"));
        assert_eq!(info.bitrate, Some(4_000_000));
        assert!(!info.has_alpha);
        assert!((info.frame_rate.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_missing_fields_stay_unknown() {
        let json = r#"{"streams": [{"codec_type": "video", "pix_fmt": "yuva420p"}]}"#;
        let info = parse_ffprobe_output(Path::new("a.webm"), json).unwrap();
        assert_eq!(info.duration_seconds, None);
        assert_eq!(info.width, None);
        assert_eq!(info.frame_rate, None);
        assert!(info.has_alpha);
    }

    #[test]
    fn test_no_video_stream() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3.0"}}"#;
        let err = parse_ffprobe_output(Path::new("a.mp3"), json).unwrap_err();
        assert!(matches!(err, ProbeError::NoVideoStream(_)));
    }

    #[test]
    fn test_garbage_output() {
        let err = parse_ffprobe_output(Path::new("a.mp4"), "not json").unwrap_err();
        assert!(matches!(err, ProbeError::Malformed(_)));
    }

    #[test]
    fn test_alpha_pixel_formats() {
        assert!(pixel_format_has_alpha("yuva444p"));
        assert!(pixel_format_has_alpha("rgba"));
        assert!(pixel_format_has_alpha("gbrap"));
        assert!(pixel_format_has_alpha("ya8"));
        assert!(!pixel_format_has_alpha("yuv420p"));
        assert!(!pixel_format_has_alpha("nv12"));
    }

    #[test]
    fn test_parse_frame_rate_fraction() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_frame_rate_invalid() {
        assert!(parse_frame_rate("invalid").is_none());
        assert!(parse_frame_rate("30/0").is_none());
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let probe = FfprobeProbe::new("/nonexistent/ffprobe-binary");
        let err = probe.probe(Path::new("a.mp4")).unwrap_err();
        assert!(matches!(err, ProbeError::Unavailable(_)));
    }
}
