//! Parsing of encoder diagnostic output.

use regex::Regex;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::LazyLock;

/// Longest single diagnostic line kept in memory; the rest is discarded.
pub const MAX_LINE_BYTES: usize = 4096;

static REGEX_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)time=\s*(\d+):(\d{1,2}):(\d{1,2}(?:\.\d+)?)").expect("Invalid regex")
});

static REGEX_SPEED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"speed=\s*([\d.]+)x").expect("Invalid regex"));

/// A time-position marker found in one diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressMarker {
    pub position_seconds: f64,
    pub speed: Option<f64>,
}

/// Extracts a progress marker from a stderr status line
/// (`frame= 12 fps=.. time=00:00:04.10 bitrate=.. speed=1.0x`)
/// or from a `-progress` key/value line (`out_time_us=4100000`).
#[must_use]
pub fn parse_progress_line(line: &str) -> Option<ProgressMarker> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            // ffmpeg reports both keys in microseconds
            "out_time_us" | "out_time_ms" => {
                let us = value.trim().parse::<u64>().ok()?;
                return Some(ProgressMarker {
                    position_seconds: us as f64 / 1_000_000.0,
                    speed: None,
                });
            }
            "out_time" => {
                return parse_clock(value.trim()).map(|position_seconds| ProgressMarker {
                    position_seconds,
                    speed: None,
                });
            }
            _ => {}
        }
    }

    let caps = REGEX_TIME.captures(line)?;
    let hours = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let minutes = caps.get(2)?.as_str().parse::<f64>().ok()?;
    let seconds = caps.get(3)?.as_str().parse::<f64>().ok()?;
    let position_seconds = hours * 3600.0 + minutes * 60.0 + seconds;
    if !position_seconds.is_finite() {
        return None;
    }

    Some(ProgressMarker {
        position_seconds,
        speed: parse_speed(line),
    })
}

fn parse_speed(line: &str) -> Option<f64> {
    REGEX_SPEED
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|speed| speed.is_finite())
}

/// `HH:MM:SS[.fraction]`
fn parse_clock(raw: &str) -> Option<f64> {
    let mut parts = raw.split(':');
    let h = parts.next()?.parse::<u64>().ok()?;
    let m = parts.next()?.parse::<u64>().ok()?;
    let s = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() || !s.is_finite() {
        return None;
    }
    let whole = h.checked_mul(3600)?.checked_add(m.checked_mul(60)?)?;
    Some(whole as f64 + s)
}

/// Reads `reader` to the end, calling `on_line` for every line.
///
/// Lines end at `\n` or `\r` because ffmpeg redraws its status line with
/// carriage returns. Lines longer than [`MAX_LINE_BYTES`] are truncated.
pub fn for_each_line<R: Read>(reader: R, mut on_line: impl FnMut(String)) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut current: Vec<u8> = Vec::with_capacity(256);

    loop {
        let buffer = match reader.fill_buf() {
            Ok(buffer) => buffer,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if buffer.is_empty() {
            break;
        }

        let consumed = buffer.len();
        for &byte in buffer {
            if byte == b'\n' || byte == b'\r' {
                if !current.is_empty() {
                    on_line(String::from_utf8_lossy(&current).into_owned());
                    current.clear();
                }
            } else if current.len() < MAX_LINE_BYTES {
                current.push(byte);
            }
        }
        reader.consume(consumed);
    }

    if !current.is_empty() {
        on_line(String::from_utf8_lossy(&current).into_owned());
    }
    Ok(())
}
