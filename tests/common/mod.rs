//! Shared fixtures: a scripted stand-in for ffmpeg and a fixed metadata probe.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use webm_compressor::component::video_compressor::{Compressor, PresetRegistry};
use webm_compressor::tools::{MetadataProbe, ProbeError, VideoInfo};

/// Emits five progress lines, creates pass logs, writes 1 MiB of output.
pub const SUCCEEDING_ENCODER: &str = r#"#!/bin/sh
out=""
prev=""
for arg in "$@"; do
    if [ "$prev" = "-passlogfile" ]; then
        : > "$arg-0.log"
    fi
    prev="$arg"
    out="$arg"
done
echo "ffmpeg version fake Copyright (c) the fake developers" >&2
echo "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'input':" >&2
for t in 1 2 3 4 5; do
    printf 'frame=%d fps=30 q=31.0 size=N/A time=00:00:0%d.00 bitrate=N/A speed=2.0x\r' $((t * 30)) $t >&2
    sleep 0.05
done
printf '\n' >&2
case "$out" in
    /dev/null|NUL) exit 0 ;;
esac
head -c 1048576 /dev/zero > "$out"
"#;

/// Writes partial output, then fails.
pub const FAILING_ENCODER: &str = r#"#!/bin/sh
out=""
for arg in "$@"; do out="$arg"; done
echo "ffmpeg version fake" >&2
printf 'frame=30 fps=30 time=00:00:01.00 bitrate=N/A speed=1.0x\r' >&2
head -c 1024 /dev/zero > "$out"
echo "" >&2
echo "Error while encoding: disk on fire" >&2
exit 1
"#;

/// Records its pid next to itself and blocks until terminated.
pub const HANGING_ENCODER: &str = r#"#!/bin/sh
echo $$ > "$(dirname "$0")/pid"
printf 'frame=30 fps=30 time=00:00:01.00 bitrate=N/A speed=1.0x\n' >&2
exec sleep 30
"#;

/// Like the hanging encoder but ignores SIGTERM.
pub const STUBBORN_ENCODER: &str = r#"#!/bin/sh
trap '' TERM
echo $$ > "$(dirname "$0")/pid"
printf 'frame=30 fps=30 time=00:00:01.00 bitrate=N/A speed=1.0x\n' >&2
while true; do sleep 1; done
"#;

/// Hangs like [`HANGING_ENCODER`] when the input name contains `stuck`,
/// otherwise succeeds after a few progress lines.
pub const SELECTIVE_ENCODER: &str = r#"#!/bin/sh
case "$*" in
    *stuck*)
        echo $$ > "$(dirname "$0")/pid"
        printf 'frame=30 fps=30 time=00:00:01.00 bitrate=N/A speed=1.0x\n' >&2
        exec sleep 30
        ;;
esac
out=""
for arg in "$@"; do out="$arg"; done
for t in 1 2 3; do
    printf 'frame=%d fps=30 time=00:00:0%d.00 bitrate=N/A speed=2.0x\r' $((t * 30)) $t >&2
    sleep 0.05
done
head -c 65536 /dev/zero > "$out"
"#;

pub struct StaticProbe(pub VideoInfo);

impl MetadataProbe for StaticProbe {
    fn probe(&self, _path: &Path) -> Result<VideoInfo, ProbeError> {
        Ok(self.0.clone())
    }
}

pub struct Workspace {
    pub dir: TempDir,
    pub encoder: PathBuf,
}

impl Workspace {
    pub fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        let encoder = bin.join("ffmpeg");
        fs::write(&encoder, script).unwrap();
        fs::set_permissions(&encoder, fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, encoder }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn input(&self, name: &str, size: usize) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, vec![7u8; size]).unwrap();
        path
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join("out").join(name)
    }

    /// Pid written by the hanging encoders, once available.
    pub fn encoder_pid(&self) -> Option<i32> {
        let path = self.encoder.parent()?.join("pid");
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    pub fn compressor(&self, duration_seconds: Option<f64>) -> Compressor {
        let info = VideoInfo {
            duration_seconds,
            width: Some(1920),
            height: Some(1080),
            codec: Some("h264".to_string()),
            ..VideoInfo::default()
        };
        Compressor::new(
            self.encoder.clone(),
            Arc::new(PresetRegistry::default()),
            Arc::new(StaticProbe(info)),
        )
    }
}

pub fn process_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}
