//! Audio track ingress
//!
//! Audio access units are self-contained, so the writer is a thin shell
//! around the ring: one frame per write, marker-driven flushing for RTP.
//! When the stream's main video flushes an IDR the audio track is asked
//! to "narrow": the writer drops any partially assembled unit at its next
//! flush so buffering restarts at the key-frame boundary.

use std::sync::Arc;

use bytes::Bytes;

use crate::buffer::ByteChain;
use crate::codec::rtp::RtpFrame;
use crate::stream::StreamHandle;
use crate::track::{AvFrame, TrackHandle, TrackKind, TrackShared};

/// Writer half of an audio track.
pub struct AudioTrack {
    shared: Arc<TrackShared>,
    stream: Arc<StreamHandle>,
    attached: bool,
    cur: ByteChain,
}

impl AudioTrack {
    /// Create a writer bound to `stream`; the track announces itself on
    /// its first flushed frame.
    pub fn new(stream: Arc<StreamHandle>, name: impl Into<String>) -> Self {
        let shared = TrackShared::new(name.into(), TrackKind::Audio, stream.ring_capacity());
        Self {
            shared,
            stream,
            attached: false,
            cur: ByteChain::new(),
        }
    }

    /// Observer handle for this track
    pub fn handle(&self) -> TrackHandle {
        TrackHandle::new(self.shared.clone())
    }

    /// Store the codec configuration (e.g. AudioSpecificConfig)
    pub fn write_sequence_head(&mut self, head: Bytes) {
        self.shared.set_seq_head(head);
        self.attach();
    }

    /// Write one complete audio frame
    pub fn write_frame(&mut self, pts: u32, payload: Bytes) {
        self.cur.push(payload);
        self.flush(pts);
    }

    /// RTP ingress; the marker bit closes the frame
    pub fn write_rtp(&mut self, frame: RtpFrame) {
        self.cur.push(frame.payload);
        if frame.marker {
            self.flush(frame.timestamp);
        }
    }

    fn flush(&mut self, pts: u32) {
        // A pending narrow discards the backlog up to this boundary
        if self.shared.take_narrow() > 0 {
            tracing::debug!(track = %self.shared.name(), "Audio narrowed to key-frame boundary");
            self.cur = ByteChain::new();
            return;
        }
        if self.cur.is_empty() {
            return;
        }
        let frame = AvFrame {
            pts,
            dts: pts,
            iframe: false,
            nalus: vec![std::mem::take(&mut self.cur)],
        };
        self.shared.touch(frame.byte_len());
        self.shared.publish(frame);
        self.attach();
    }

    fn attach(&mut self) {
        if self.attached {
            return;
        }
        self.attached = true;
        let stream = self.stream.clone();
        let handle = self.handle();
        let _ = tokio::spawn(async move {
            let name = handle.name().to_string();
            if let Err(e) = stream.add_track(handle).await {
                tracing::warn!(stream = %stream.path(), track = %name, error = %e, "Track attach rejected");
            }
        });
    }
}
