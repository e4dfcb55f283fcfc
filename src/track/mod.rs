//! Media tracks
//!
//! A track is a single-writer stream of access units flowing through a
//! bounded ring. The protocol adapter that owns the writer half
//! ([`video::H265Track`], [`audio::AudioTrack`], [`data::DataTrack`])
//! appends media directly; everyone else (the stream task, subscribers)
//! observes the track through a cheap [`TrackHandle`].
//!
//! All cross-task track state is atomics or short critical sections, so
//! the writer never contends with the stream task's serial loop.

pub mod audio;
pub mod data;
pub mod dts;
pub mod ring;
pub mod video;

pub use audio::AudioTrack;
pub use data::DataTrack;
pub use dts::DtsEstimator;
pub use ring::FrameRing;
pub use video::H265Track;

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::buffer::ByteChain;

/// What kind of media a track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
    Data,
}

/// Liveness of a track as seen by the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackState {
    Online = 0,
    /// Publisher lost; the writer is gone until a republish
    Offline = 1,
}

/// One flushed access unit.
///
/// Cloning is cheap: the NALU chains are reference-counted segments.
#[derive(Debug, Clone, Default)]
pub struct AvFrame {
    /// Presentation timestamp, 90 kHz units for video
    pub pts: u32,

    /// Decoding timestamp estimated from the PTS sequence
    pub dts: u32,

    /// Whether the access unit contains an IDR/CRA/BLA NALU
    pub iframe: bool,

    /// The NALUs of this access unit
    pub nalus: Vec<ByteChain>,
}

impl AvFrame {
    /// Total payload bytes across all NALUs
    pub fn byte_len(&self) -> usize {
        self.nalus.iter().map(ByteChain::byte_len).sum()
    }
}

/// State shared between a track's writer and its observers
pub(crate) struct TrackShared {
    name: String,
    kind: TrackKind,
    state: AtomicU8,
    /// Milliseconds since `epoch`, plus one; zero means never written
    last_write: AtomicU64,
    bytes_in: AtomicU64,
    /// Narrow requests not yet consumed by the writer
    narrow_pending: AtomicU64,
    /// Total narrow requests ever made (observability)
    narrow_total: AtomicU64,
    epoch: Instant,
    ring: FrameRing<AvFrame>,
    seq_head: RwLock<Option<Bytes>>,
    /// Audio tracks to narrow when this (main video) track flushes an IDR
    narrow_targets: Mutex<Vec<TrackHandle>>,
}

impl TrackShared {
    pub(crate) fn new(name: String, kind: TrackKind, ring_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            kind,
            state: AtomicU8::new(TrackState::Online as u8),
            last_write: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            narrow_pending: AtomicU64::new(0),
            narrow_total: AtomicU64::new(0),
            epoch: Instant::now(),
            ring: FrameRing::new(ring_capacity),
            seq_head: RwLock::new(None),
            narrow_targets: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Record a write of `bytes` payload bytes
    pub(crate) fn touch(&self, bytes: usize) {
        let ms = self.epoch.elapsed().as_millis() as u64 + 1;
        self.last_write.store(ms, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn set_seq_head(&self, head: Bytes) {
        *self.seq_head.write().unwrap() = Some(head);
    }

    pub(crate) fn publish(&self, frame: AvFrame) -> usize {
        self.ring.publish(frame)
    }

    /// Consume pending narrow requests, returning how many were queued
    pub(crate) fn take_narrow(&self) -> u64 {
        self.narrow_pending.swap(0, Ordering::AcqRel)
    }

    pub(crate) fn notify_idr(&self) {
        let targets = self.narrow_targets.lock().unwrap();
        for t in targets.iter() {
            t.narrow();
        }
    }
}

/// Cheap, cloneable observer handle for a track.
#[derive(Clone)]
pub struct TrackHandle {
    shared: Arc<TrackShared>,
}

impl TrackHandle {
    pub(crate) fn new(shared: Arc<TrackShared>) -> Self {
        Self { shared }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn kind(&self) -> TrackKind {
        self.shared.kind
    }

    pub fn state(&self) -> TrackState {
        match self.shared.state.load(Ordering::Relaxed) {
            0 => TrackState::Online,
            _ => TrackState::Offline,
        }
    }

    pub fn set_state(&self, state: TrackState) {
        self.shared.state.store(state as u8, Ordering::Relaxed);
    }

    /// Receive flushed access units from the track's ring.
    ///
    /// Slow receivers lag: the ring is bounded, old frames are dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<AvFrame> {
        self.shared.ring.subscribe()
    }

    /// Latest sequence head (decoder configuration), if any
    pub fn sequence_head(&self) -> Option<Bytes> {
        self.shared.seq_head.read().unwrap().clone()
    }

    /// Time since the last write; `None` if never written
    pub fn last_write_age(&self) -> Option<Duration> {
        let ms = self.shared.last_write.load(Ordering::Relaxed);
        if ms == 0 {
            return None;
        }
        Some(
            self.shared
                .epoch
                .elapsed()
                .saturating_sub(Duration::from_millis(ms - 1)),
        )
    }

    /// Average inbound bitrate since track creation, bits per second
    pub fn bps(&self) -> u64 {
        let secs = self.shared.epoch.elapsed().as_secs().max(1);
        self.shared.bytes_in.load(Ordering::Relaxed) * 8 / secs
    }

    /// Ask the (audio) writer to trim its backlog to the key-frame boundary
    pub fn narrow(&self) {
        self.shared.narrow_pending.fetch_add(1, Ordering::AcqRel);
        self.shared.narrow_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Total narrow requests ever made against this track
    pub fn narrow_count(&self) -> u64 {
        self.shared.narrow_total.load(Ordering::Relaxed)
    }

    /// Register an audio track to be narrowed on each IDR of this track
    pub(crate) fn add_narrow_target(&self, target: TrackHandle) {
        self.shared.narrow_targets.lock().unwrap().push(target);
    }

    /// Drop a previously registered narrow target by name
    pub(crate) fn remove_narrow_target(&self, name: &str) {
        self.shared
            .narrow_targets
            .lock()
            .unwrap()
            .retain(|t| t.name() != name);
    }

    /// Stop fan-out: future subscribes observe a closed ring
    pub(crate) fn dispose(&self) {
        self.set_state(TrackState::Offline);
        self.shared.ring.close();
    }

    pub(crate) fn same_track(&self, other: &TrackHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for TrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackHandle")
            .field("name", &self.shared.name)
            .field("kind", &self.shared.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_basics() {
        let shared = TrackShared::new("h265".into(), TrackKind::Video, 8);
        let handle = TrackHandle::new(shared);

        assert_eq!(handle.name(), "h265");
        assert_eq!(handle.kind(), TrackKind::Video);
        assert_eq!(handle.state(), TrackState::Online);
        assert!(handle.last_write_age().is_none());

        handle.set_state(TrackState::Offline);
        assert_eq!(handle.state(), TrackState::Offline);
    }

    #[test]
    fn test_touch_updates_last_write() {
        let shared = TrackShared::new("a".into(), TrackKind::Audio, 8);
        let handle = TrackHandle::new(shared.clone());

        shared.touch(1500);
        let age = handle.last_write_age().unwrap();
        assert!(age < Duration::from_secs(1));
    }

    #[test]
    fn test_narrow_counters() {
        let shared = TrackShared::new("aac".into(), TrackKind::Audio, 8);
        let handle = TrackHandle::new(shared.clone());

        handle.narrow();
        handle.narrow();
        assert_eq!(handle.narrow_count(), 2);
        assert_eq!(shared.take_narrow(), 2);
        assert_eq!(shared.take_narrow(), 0);
        // Total is cumulative
        assert_eq!(handle.narrow_count(), 2);
    }

    #[test]
    fn test_idr_fans_out_to_targets() {
        let video = TrackHandle::new(TrackShared::new("v".into(), TrackKind::Video, 8));
        let audio = TrackHandle::new(TrackShared::new("a".into(), TrackKind::Audio, 8));

        video.add_narrow_target(audio.clone());
        video.shared.notify_idr();
        assert_eq!(audio.narrow_count(), 1);

        video.remove_narrow_target("a");
        video.shared.notify_idr();
        assert_eq!(audio.narrow_count(), 1);
    }

    #[tokio::test]
    async fn test_frame_flows_to_subscriber() {
        let shared = TrackShared::new("v".into(), TrackKind::Video, 8);
        let handle = TrackHandle::new(shared.clone());
        let mut rx = handle.subscribe();

        let frame = AvFrame {
            pts: 90_000,
            dts: 90_000,
            iframe: true,
            nalus: vec![ByteChain::from(vec![0x26, 0x01, 0xAA])],
        };
        assert_eq!(shared.publish(frame.clone()), 1);

        let got = rx.recv().await.unwrap();
        assert_eq!(got.pts, 90_000);
        assert!(got.iframe);
        assert_eq!(got.byte_len(), 3);
    }

    #[tokio::test]
    async fn test_dispose_closes_ring() {
        let handle = TrackHandle::new(TrackShared::new("d".into(), TrackKind::Data, 8));
        let mut rx = handle.subscribe();
        handle.dispose();
        assert!(rx.recv().await.is_err());
        // Late subscribers see a closed ring too
        let mut late = handle.subscribe();
        assert!(late.recv().await.is_err());
    }
}
