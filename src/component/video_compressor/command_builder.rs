//! Turns resolved parameters into ffmpeg argument lists.

use super::error::{CompressorError, CompressorResult};
use super::preset::{Codec, EffectiveParameters, Resolution};
use log::warn;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const OUTPUT_EXTENSION: &str = "webm";
const AUDIO_CODEC: &str = "libopus";

#[cfg(windows)]
const NULL_SINK: &str = "NUL";
#[cfg(not(windows))]
const NULL_SINK: &str = "/dev/null";

/// One or more encoder invocations that together produce the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    passes: Vec<Vec<String>>,
    output_path: PathBuf,
    passlog_prefix: Option<PathBuf>,
}

impl EncoderCommand {
    #[must_use]
    pub fn passes(&self) -> &[Vec<String>] {
        &self.passes
    }

    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    #[must_use]
    pub fn is_two_pass(&self) -> bool {
        self.passes.len() > 1
    }

    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Statistics files left behind by a two-pass encode.
    #[must_use]
    pub fn passlog_files(&self) -> Vec<PathBuf> {
        self.passlog_prefix
            .iter()
            .map(|prefix| {
                let mut name = prefix.as_os_str().to_owned();
                name.push("-0.log");
                PathBuf::from(name)
            })
            .collect()
    }

    /// Every argument of every pass, flattened in execution order
    #[must_use]
    pub fn all_args(&self) -> Vec<&str> {
        self.passes.iter().flatten().map(String::as_str).collect()
    }
}

pub struct CommandBuilder;

impl CommandBuilder {
    /// Builds the encoder invocation. Pure apart from a warning log
    /// when alpha preservation forces a single pass.
    pub fn build(
        input_path: &Path,
        output_path: &Path,
        params: &EffectiveParameters,
    ) -> CompressorResult<EncoderCommand> {
        params.validate()?;
        Self::check_output_container(output_path)?;

        let two_pass = params.two_pass && !params.preserve_alpha;
        if params.two_pass && params.preserve_alpha {
            warn!(
                "Two-pass encoding disabled for preset '{}': alpha preservation requires single-pass CRF",
                params.preset_name
            );
        }

        if !two_pass {
            let mut args = Self::input_args(input_path);
            args.extend(Self::video_args(params));
            args.extend(Self::rate_control_args(params));
            args.extend(Self::audio_args(params));
            args.extend(Self::output_args(output_path));
            return Ok(EncoderCommand {
                passes: vec![args],
                output_path: output_path.to_path_buf(),
                passlog_prefix: None,
            });
        }

        let passlog_prefix = Self::passlog_prefix(output_path);
        let passlog = passlog_prefix.to_string_lossy().to_string();

        let mut first = Self::input_args(input_path);
        first.extend(Self::video_args(params));
        first.extend(Self::rate_control_args(params));
        first.extend(strings(&["-pass", "1", "-passlogfile", &passlog]));
        first.extend(strings(&["-an", "-f", "null", NULL_SINK]));

        let mut second = Self::input_args(input_path);
        second.extend(Self::video_args(params));
        second.extend(Self::rate_control_args(params));
        second.extend(strings(&["-pass", "2", "-passlogfile", &passlog]));
        second.extend(Self::audio_args(params));
        second.extend(Self::output_args(output_path));

        Ok(EncoderCommand {
            passes: vec![first, second],
            output_path: output_path.to_path_buf(),
            passlog_prefix: Some(passlog_prefix),
        })
    }

    fn check_output_container(output_path: &Path) -> CompressorResult<()> {
        let matches = output_path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(OUTPUT_EXTENSION));
        if matches {
            Ok(())
        } else {
            Err(CompressorError::InvalidParameter(format!(
                "output must be a .{OUTPUT_EXTENSION} file for vp8/vp9: {}",
                output_path.display()
            )))
        }
    }

    fn passlog_prefix(output_path: &Path) -> PathBuf {
        let mut prefix: OsString = output_path.as_os_str().to_owned();
        prefix.push(".passlog");
        PathBuf::from(prefix)
    }

    fn input_args(input_path: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input_path.to_string_lossy().to_string(),
        ]
    }

    fn video_args(params: &EffectiveParameters) -> Vec<String> {
        let mut args = strings(&["-c:v", params.codec.encoder_library()]);
        if params.codec == Codec::Vp9 {
            args.extend(strings(&["-row-mt", "1"]));
        }

        if params.preserve_alpha {
            // libvpx drops the alpha plane when alt-ref frames are enabled
            args.extend(strings(&[
                "-pix_fmt",
                "yuva420p",
                "-auto-alt-ref",
                "0",
                "-metadata:s:v:0",
                "alpha_mode=1",
            ]));
        }

        if let Some(max) = params.max_resolution {
            args.push("-vf".to_string());
            args.push(scale_filter(max));
        }

        args.push(params.codec.speed_flag().to_string());
        args.push(params.speed.to_string());
        args
    }

    fn rate_control_args(params: &EffectiveParameters) -> Vec<String> {
        if params.preserve_alpha {
            return vec![
                "-crf".to_string(),
                params.crf.to_string(),
                "-b:v".to_string(),
                "0".to_string(),
            ];
        }
        if params.two_pass {
            return vec!["-b:v".to_string(), params.video_bitrate.to_string()];
        }
        vec![
            "-b:v".to_string(),
            params.video_bitrate.to_string(),
            "-crf".to_string(),
            params.crf.to_string(),
        ]
    }

    fn audio_args(params: &EffectiveParameters) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            AUDIO_CODEC.to_string(),
            "-b:a".to_string(),
            params.audio_bitrate.to_string(),
        ]
    }

    fn output_args(output_path: &Path) -> Vec<String> {
        vec![
            "-f".to_string(),
            OUTPUT_EXTENSION.to_string(),
            output_path.to_string_lossy().to_string(),
        ]
    }
}

/// Bounding-box downscale that keeps the aspect ratio and never upscales.
#[must_use]
pub fn scale_filter(max: Resolution) -> String {
    format!(
        "scale=w=min({}\\,iw):h=min({}\\,ih):force_original_aspect_ratio=decrease",
        max.width, max.height
    )
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Output path for `input` inside `output_dir`: `dir/name.ext` -> `output_dir/name.webm`.
#[must_use]
pub fn derive_output_path(input: &Path, output_dir: &Path) -> PathBuf {
    let file_stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    output_dir.join(format!("{file_stem}.{OUTPUT_EXTENSION}"))
}
