//! Server-Sent-Events rendering of a job's progress hub.
//!
//! The HTTP layer hands over any writer connected to the client; every
//! update becomes one `event:`/`data:` frame keyed by job id.

use super::progress_hub::{JobUpdate, ProgressEvent, ProgressHub};
use log::debug;
use std::io::{self, Write};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

/// Why a stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The terminal event was written.
    Finished,
    /// Writing failed; the client went away.
    PeerDisconnected,
}

/// Writes one SSE frame for `update`.
pub fn write_frame<W: Write>(writer: &mut W, update: &JobUpdate) -> io::Result<()> {
    let data = serde_json::to_string(update).map_err(io::Error::other)?;
    write!(writer, "event: {}\ndata: {}\n\n", update.event.name(), data)?;
    writer.flush()
}

/// Streams `hub` to `writer` until the job ends or the client disconnects.
///
/// A (re)connecting client first receives the latest cached snapshot, or
/// the terminal event if the job already finished. History is not replayed.
pub fn write_event_stream<W: Write>(
    hub: &ProgressHub,
    mut writer: W,
    keepalive: Duration,
) -> io::Result<StreamEnd> {
    let job_id = hub.job_id();
    // subscribe before reading the cache so no event falls in between
    let subscription = hub.subscribe();

    if let Some(terminal) = hub.terminal_event() {
        let update = JobUpdate {
            job_id,
            event: terminal,
        };
        return Ok(match write_frame(&mut writer, &update) {
            Ok(()) => StreamEnd::Finished,
            Err(_) => StreamEnd::PeerDisconnected,
        });
    }

    if let Some(snapshot) = hub.latest() {
        let update = JobUpdate {
            job_id,
            event: ProgressEvent::Progress(snapshot),
        };
        if write_frame(&mut writer, &update).is_err() {
            return Ok(StreamEnd::PeerDisconnected);
        }
    }

    loop {
        match subscription.recv_timeout(keepalive) {
            Ok(update) => {
                if write_frame(&mut writer, &update).is_err() {
                    debug!("Event stream for job {job_id}: client disconnected");
                    return Ok(StreamEnd::PeerDisconnected);
                }
                if update.event.is_terminal() {
                    return Ok(StreamEnd::Finished);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let alive = writer
                    .write_all(b": keep-alive\n\n")
                    .and_then(|()| writer.flush());
                if alive.is_err() {
                    return Ok(StreamEnd::PeerDisconnected);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                // closed between subscribe and the cache check
                return match hub.terminal_event() {
                    Some(event) => {
                        let update = JobUpdate { job_id, event };
                        Ok(match write_frame(&mut writer, &update) {
                            Ok(()) => StreamEnd::Finished,
                            Err(_) => StreamEnd::PeerDisconnected,
                        })
                    }
                    None => Ok(StreamEnd::Finished),
                };
            }
        }
    }
}
