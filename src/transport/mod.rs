//! Outbound audio transport: frame slicing, pacing, and flow-control
//! markers over the media stream.

pub mod protocol;

use crate::config::AudioConfig;
use protocol::{MarkInfo, OutboundEvent, encode_payload};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outbound half of the media stream connection.
///
/// Implementations must make every send a silent no-op once the
/// connection is closed; a dead socket is never an error the state
/// machine sees.
pub trait MediaSink: Send + Sync {
    /// Emit one event to the far end.
    fn send(&self, event: OutboundEvent);
    /// Whether the underlying connection is still open.
    fn is_open(&self) -> bool;
}

/// How a streaming operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Every frame was emitted.
    Completed,
    /// The cancellation token fired; remaining frames were discarded.
    Cancelled,
    /// The connection closed mid-send; remaining frames were discarded.
    Closed,
}

/// Slices a synthesized-audio buffer into fixed-duration frames and
/// paces their delivery to the caller.
pub struct AudioOutputTransport {
    sink: Arc<dyn MediaSink>,
    stream_sid: String,
    frame_bytes: usize,
    frame_duration: Duration,
}

impl AudioOutputTransport {
    /// Create a transport bound to one call's stream.
    pub fn new(sink: Arc<dyn MediaSink>, stream_sid: String, audio: &AudioConfig) -> Self {
        Self {
            sink,
            stream_sid,
            frame_bytes: audio.frame_bytes(),
            frame_duration: Duration::from_millis(u64::from(audio.frame_duration_ms)),
        }
    }

    /// Emit `audio` as ordered fixed-duration frames, one per tick.
    ///
    /// Stops immediately and silently when the token fires — no partial
    /// frame is emitted and cancellation is never an error, it only
    /// halts further output.
    pub async fn stream(&self, audio: &[u8], cancel: &CancellationToken) -> StreamOutcome {
        if audio.is_empty() {
            return StreamOutcome::Completed;
        }

        let mut ticker = tokio::time::interval(self.frame_duration);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        for frame in audio.chunks(self.frame_bytes) {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return StreamOutcome::Cancelled,
                _ = ticker.tick() => {}
            }
            if !self.sink.is_open() {
                debug!("media stream closed mid-send");
                return StreamOutcome::Closed;
            }
            self.sink.send(OutboundEvent::Media {
                stream_sid: self.stream_sid.clone(),
                media: encode_payload(frame),
            });
        }
        StreamOutcome::Completed
    }

    /// Announce a completed send. The far end echoes the name back once
    /// the audio has actually finished playing.
    pub fn send_mark(&self, name: &str) {
        if !self.sink.is_open() {
            return;
        }
        self.sink.send(OutboundEvent::Mark {
            stream_sid: self.stream_sid.clone(),
            mark: MarkInfo {
                name: name.to_owned(),
            },
        });
    }

    /// Tell the far end to discard frames it has buffered but not yet
    /// played. Purely advisory; required for responsive barge-in.
    pub fn flush(&self) {
        if !self.sink.is_open() {
            return;
        }
        self.sink.send(OutboundEvent::Clear {
            stream_sid: self.stream_sid.clone(),
        });
        debug!("flushed far-end playback queue");
    }
}
