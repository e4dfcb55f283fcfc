//! Data tracks
//!
//! Arbitrary timed payloads (subtitles, metadata, sensor samples) ride the
//! same ring as media frames, wrapped in a single-chain access unit. Data
//! tracks are the only kind the stream disposes explicitly: when the
//! stream closes or the track is removed, the ring is shut so consumers
//! observe end-of-stream.

use bytes::Bytes;
use std::sync::Arc;

use crate::buffer::ByteChain;
use crate::track::{AvFrame, TrackHandle, TrackKind, TrackShared};

/// Writer half of a data track.
pub struct DataTrack {
    shared: Arc<TrackShared>,
    seq: u32,
}

impl DataTrack {
    /// Create a standalone data track; attach it to a stream with
    /// `StreamHandle::add_track`.
    pub fn new(name: impl Into<String>, ring_capacity: usize) -> Self {
        Self {
            shared: TrackShared::new(name.into(), TrackKind::Data, ring_capacity),
            seq: 0,
        }
    }

    /// Observer handle for this track
    pub fn handle(&self) -> TrackHandle {
        TrackHandle::new(self.shared.clone())
    }

    /// Publish one payload; the sequence number stands in for a timestamp
    pub fn write(&mut self, payload: Bytes) {
        self.seq = self.seq.wrapping_add(1);
        let frame = AvFrame {
            pts: self.seq,
            dts: self.seq,
            iframe: false,
            nalus: vec![ByteChain::from_bytes(payload)],
        };
        self.shared.touch(frame.byte_len());
        self.shared.publish(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackState;

    #[tokio::test]
    async fn test_write_and_dispose() {
        let mut track = DataTrack::new("events", 16);
        let handle = track.handle();
        assert_eq!(handle.kind(), TrackKind::Data);

        let mut rx = handle.subscribe();
        track.write(Bytes::from_static(b"hello"));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.pts, 1);
        assert_eq!(frame.nalus[0].to_bytes().as_ref(), b"hello");

        handle.dispose();
        assert!(rx.recv().await.is_err());
        assert_eq!(handle.state(), TrackState::Offline);
    }
}
