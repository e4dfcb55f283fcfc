//! H.265 video track ingress
//!
//! The writer accepts media through three doors:
//! - raw NALUs ([`H265Track::write_slice`]), classified per unit type
//! - container-framed AVCC payloads ([`H265Track::write_avcc`]), including
//!   the extended-header packet types (SequenceStart / CodedFrames /
//!   CodedFramesX)
//! - RTP payloads ([`H265Track::write_rtp`]) with aggregation-packet and
//!   fragmentation-unit handling; the marker bit closes the access unit
//!
//! Parameter sets are collected until VPS+SPS+PPS are present, at which
//! point the sequence header is built and published; the track attaches
//! itself to its stream on the first sequence head. A sequence-header
//! build or parse failure is terminal for the stream.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::buffer::{ByteChain, BytesPool};
use crate::codec::hevc::{self, H265NaluType, SpsInfo};
use crate::codec::rtp::{self, RtpFrame, RTP_MTU};
use crate::error::{Error, Result};
use crate::stream::StreamHandle;
use crate::track::{AvFrame, DtsEstimator, TrackHandle, TrackKind, TrackShared};

/// Extended-header packet types for container-framed HEVC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HevcPacketType {
    /// Codec configuration follows
    SequenceStart = 0,
    /// Coded frames with a composition-time offset
    CodedFrames = 1,
    /// End of sequence
    SequenceEnd = 2,
    /// Coded frames with composition time zero
    CodedFramesX = 3,
}

impl HevcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            0 => Some(HevcPacketType::SequenceStart),
            1 => Some(HevcPacketType::CodedFrames),
            2 => Some(HevcPacketType::SequenceEnd),
            3 => Some(HevcPacketType::CodedFramesX),
            _ => None,
        }
    }
}

/// Writer half of an H.265 video track.
pub struct H265Track {
    shared: Arc<TrackShared>,
    stream: Arc<StreamHandle>,
    vps: Option<Bytes>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    sps_info: SpsInfo,
    nalu_len_size: usize,
    /// Sequence head changed since the last flush
    dc_changed: bool,
    attached: bool,
    dts: DtsEstimator,
    pool: BytesPool,
    /// `sprop-max-don-diff > 0` was negotiated (interleaving not supported)
    use_donl: bool,
    cur_nalus: Vec<ByteChain>,
    cur_iframe: bool,
}

impl H265Track {
    /// Create a writer bound to `stream`; the track announces itself when
    /// the first sequence head is written.
    pub fn new(stream: Arc<StreamHandle>, name: impl Into<String>) -> Self {
        let shared = TrackShared::new(name.into(), TrackKind::Video, stream.ring_capacity());
        Self {
            shared,
            stream,
            vps: None,
            sps: None,
            pps: None,
            sps_info: SpsInfo::default(),
            nalu_len_size: 4,
            dc_changed: false,
            attached: false,
            dts: DtsEstimator::new(),
            pool: BytesPool::default(),
            use_donl: false,
            cur_nalus: Vec::new(),
            cur_iframe: false,
        }
    }

    /// Observer handle for this track
    pub fn handle(&self) -> TrackHandle {
        TrackHandle::new(self.shared.clone())
    }

    pub fn sps_info(&self) -> SpsInfo {
        self.sps_info
    }

    pub fn nalu_len_size(&self) -> usize {
        self.nalu_len_size
    }

    pub fn vps(&self) -> Option<&Bytes> {
        self.vps.as_ref()
    }

    pub fn sps(&self) -> Option<&Bytes> {
        self.sps.as_ref()
    }

    pub fn pps(&self) -> Option<&Bytes> {
        self.pps.as_ref()
    }

    /// Append one NALU to the in-progress access unit, applying the
    /// per-type policy (parameter sets are captured, key slices mark the
    /// AU, unknown types are dropped).
    pub fn write_slice(&mut self, slice: Bytes) {
        if slice.len() < 2 {
            tracing::warn!(stream = %self.stream.path(), "NALU shorter than its header");
            return;
        }
        match H265NaluType::from_header_byte(slice[0]) {
            Some(H265NaluType::Vps) => {
                self.vps = Some(slice);
            }
            Some(H265NaluType::Sps) => {
                if let Ok(info) = hevc::parse_sps(&slice) {
                    if info != self.sps_info {
                        tracing::debug!(
                            stream = %self.stream.path(),
                            width = info.width,
                            height = info.height,
                            "SPS dimensions changed"
                        );
                    }
                    self.sps_info = info;
                }
                self.sps = Some(slice);
            }
            Some(H265NaluType::Pps) => {
                self.pps = Some(slice);
                if let (Some(vps), Some(sps), Some(pps)) = (&self.vps, &self.sps, &self.pps) {
                    match hevc::build_seq_header(vps, sps, pps) {
                        Ok(head) => self.store_seq_head(head),
                        Err(e) => {
                            tracing::error!(
                                stream = %self.stream.path(),
                                error = %e,
                                "Sequence header build failed"
                            );
                            self.stream.close();
                        }
                    }
                }
            }
            Some(t) if t.is_keyframe() => {
                self.cur_iframe = true;
                self.append_nalu(slice);
            }
            Some(t) if t.is_trailing_slice() || t.is_sei() => {
                self.append_nalu(slice);
            }
            other => {
                tracing::warn!(
                    stream = %self.stream.path(),
                    nalu_type = hevc::nalu_type(slice[0]),
                    known = other.is_some(),
                    "Unsupported H.265 slice type dropped"
                );
            }
        }
    }

    /// Submit a complete sequence head (container-framed decoder config)
    /// and recover the parameter sets from it.
    pub fn write_sequence_head(&mut self, head: Bytes) {
        self.store_seq_head(head.clone());
        match hevc::parse_seq_header(&head) {
            Ok((vps, sps, pps)) => {
                if let Ok(info) = hevc::parse_sps(&sps) {
                    self.sps_info = info;
                }
                self.vps = Some(vps);
                self.sps = Some(sps);
                self.pps = Some(pps);
                if let Ok(size) = hevc::nalu_length_size(&head) {
                    self.nalu_len_size = size;
                }
            }
            Err(e) => {
                tracing::error!(
                    stream = %self.stream.path(),
                    error = %e,
                    "Sequence header parse failed"
                );
                self.stream.close();
            }
        }
    }

    /// Container-framed input: a byte chain of at least 6 bytes.
    pub fn write_avcc(&mut self, ts_ms: u32, frame: ByteChain) -> Result<()> {
        let len = frame.byte_len();
        if len < 6 {
            tracing::error!(stream = %self.stream.path(), len, "AVCC frame too short");
            return Err(Error::ShortWrite { len });
        }
        let b0 = frame.get(0).unwrap();
        if (b0 >> 4) & 0x08 != 0 {
            match HevcPacketType::from_byte(b0) {
                Some(HevcPacketType::SequenceStart) => {
                    let mut head = BytesMut::from(frame.to_bytes().as_ref());
                    head[..5].copy_from_slice(&[0x1c, 0x00, 0x00, 0x00, 0x00]);
                    self.write_sequence_head(head.freeze());
                    Ok(())
                }
                Some(HevcPacketType::CodedFrames) => {
                    // Strip the extended prefix; the composition time at
                    // [5..8] becomes the legacy offset at [2..5].
                    let mut reframed = frame.slice_from(5);
                    reframed.push_front(Bytes::copy_from_slice(&[b0 & 0x7F & 0xFC, 0x01]));
                    self.forward_avcc(ts_ms, reframed)
                }
                Some(HevcPacketType::CodedFramesX) => {
                    let mut reframed = frame.slice_from(5);
                    reframed
                        .push_front(Bytes::copy_from_slice(&[b0 & 0x7F & 0xFC, 0x01, 0, 0, 0]));
                    self.forward_avcc(ts_ms, reframed)
                }
                other => {
                    tracing::debug!(
                        stream = %self.stream.path(),
                        packet_type = b0 & 0x0F,
                        known = other.is_some(),
                        "Ignored extended packet type"
                    );
                    Ok(())
                }
            }
        } else if frame.get(1) == Some(0) {
            self.write_sequence_head(frame.to_bytes());
            Ok(())
        } else {
            self.forward_avcc(ts_ms, frame)
        }
    }

    /// RTP ingress; the marker bit flushes the access unit.
    pub fn write_rtp(&mut self, frame: RtpFrame) {
        match frame.h265_type() {
            Some(H265NaluType::Ap) => match rtp::unpack_ap(&frame.payload, self.use_donl) {
                Ok(nalus) => {
                    for nalu in nalus {
                        self.write_slice(nalu);
                    }
                }
                Err(e) => {
                    tracing::warn!(stream = %self.stream.path(), error = %e, "Bad aggregation packet");
                }
            },
            Some(H265NaluType::Fu) => match rtp::parse_fu(&frame.payload, self.use_donl) {
                Ok((hdr, fu, fragment)) => {
                    if fu.start {
                        if H265NaluType::from_type(fu.nalu_type)
                            .is_some_and(|t| t.is_keyframe())
                        {
                            self.cur_iframe = true;
                        }
                        let rebuilt = (hdr[0] & 0x81) | (fu.nalu_type << 1);
                        self.cur_nalus.push(ByteChain::from_bytes(
                            Bytes::copy_from_slice(&[rebuilt, hdr[1]]),
                        ));
                    }
                    match self.cur_nalus.last_mut() {
                        // Mid-AU fragments append to the open NALU
                        Some(last) => last.push(fragment),
                        None => {
                            tracing::warn!(
                                stream = %self.stream.path(),
                                "FU fragment without a start, dropped"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(stream = %self.stream.path(), error = %e, "Bad fragmentation unit");
                }
            },
            _ => self.write_slice(frame.payload.clone()),
        }
        if frame.marker {
            self.flush(frame.timestamp);
        }
    }

    /// Re-packetize a flushed access unit into RTP payloads, prefixing
    /// the parameter sets on key frames that do not already carry them.
    pub fn packetize(&mut self, frame: &AvFrame) -> Result<Vec<Bytes>> {
        // Config-change key AUs leave flush() with the sets already at
        // the head; adding them again would duplicate the config on the
        // wire.
        let has_params = frame
            .nalus
            .first()
            .and_then(|n| n.get(0))
            .and_then(H265NaluType::from_header_byte)
            == Some(H265NaluType::Vps);
        let params = if frame.iframe && !has_params {
            match (&self.vps, &self.sps, &self.pps) {
                (Some(v), Some(s), Some(p)) => Some([v, s, p]),
                _ => None,
            }
        } else {
            None
        };
        rtp::packetize_au(&frame.nalus, params, RTP_MTU, &mut self.pool)
    }

    fn append_nalu(&mut self, slice: Bytes) {
        self.cur_nalus.push(ByteChain::from_bytes(slice));
    }

    fn store_seq_head(&mut self, head: Bytes) {
        self.shared.set_seq_head(head);
        self.dc_changed = true;
        self.attach();
    }

    /// Announce the track to its stream exactly once
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

    /// Close the in-progress access unit and publish it on the ring.
    pub fn flush(&mut self, pts: u32) {
        if self.cur_nalus.is_empty() {
            return;
        }
        // A new decoder config must reach receivers before its key frame.
        // The flag stays pending across non-key flushes until a key AU
        // actually carries the sets.
        if self.dc_changed && self.cur_iframe {
            if let (Some(vps), Some(sps), Some(pps)) = (&self.vps, &self.sps, &self.pps) {
                let params = [vps.clone(), sps.clone(), pps.clone()];
                for set in params.into_iter().rev() {
                    self.cur_nalus.insert(0, ByteChain::from_bytes(set));
                }
                self.dc_changed = false;
            }
        }
        let dts = self.dts.feed(pts);
        let frame = AvFrame {
            pts,
            dts,
            iframe: self.cur_iframe,
            nalus: std::mem::take(&mut self.cur_nalus),
        };
        self.shared.touch(frame.byte_len());
        if frame.iframe {
            self.shared.notify_idr();
        }
        self.shared.publish(frame);
        self.cur_iframe = false;
    }

    fn forward_avcc(&mut self, ts_ms: u32, frame: ByteChain) -> Result<()> {
        let mut chain = frame;
        chain.read_byte(); // frame/codec byte
        chain.read_byte(); // packet type
        let ct = chain.read_bytes(3).ok_or(Error::ShortWrite {
            len: chain.byte_len(),
        })?;
        let mut cts = ((ct[0] as i32) << 16) | ((ct[1] as i32) << 8) | ct[2] as i32;
        if cts & 0x80_0000 != 0 {
            cts |= !0xFF_FFFF;
        }
        while chain.byte_len() >= self.nalu_len_size && !chain.is_empty() {
            let mut len = 0usize;
            for _ in 0..self.nalu_len_size {
                len = (len << 8) | chain.read_byte().unwrap() as usize;
            }
            match chain.read_bytes(len) {
                Some(nalu) => self.write_slice(nalu),
                None => {
                    tracing::warn!(
                        stream = %self.stream.path(),
                        want = len,
                        have = chain.byte_len(),
                        "Truncated AVCC NALU dropped"
                    );
                    break;
                }
            }
        }
        let pts = ((ts_ms as i64 + cts as i64) * 90) as u32;
        self.flush(pts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::hevc::test_support::{build_test_pps, build_test_sps, build_test_vps};
    use crate::registry::StreamRegistry;
    use crate::EngineConfig;
    use bytes::BufMut;
    use std::time::Duration;

    async fn test_stream(path: &str) -> Arc<StreamHandle> {
        let registry = StreamRegistry::new(EngineConfig::default());
        let (stream, _) = registry
            .find_or_create(path, Duration::from_secs(30))
            .unwrap();
        stream
    }

    fn key_slice(len: usize) -> Bytes {
        let mut data = hevc::nalu_header(19).to_vec();
        data.extend(std::iter::repeat(0xAB).take(len));
        Bytes::from(data)
    }

    fn trail_slice(len: usize) -> Bytes {
        let mut data = hevc::nalu_header(1).to_vec();
        data.extend(std::iter::repeat(0xCD).take(len));
        Bytes::from(data)
    }

    #[tokio::test]
    async fn test_parameter_sets_build_sequence_head() {
        let stream = test_stream("live/psets").await;
        let mut track = H265Track::new(stream, "h265");
        let handle = track.handle();

        track.write_slice(build_test_vps());
        track.write_slice(build_test_sps(1280, 720));
        assert!(handle.sequence_head().is_none());

        track.write_slice(build_test_pps());
        assert!(handle.sequence_head().is_some());
        assert_eq!(track.sps_info(), SpsInfo { width: 1280, height: 720 });
    }

    #[tokio::test]
    async fn test_iframe_flag_follows_key_nalus() {
        let stream = test_stream("live/iframe").await;
        let mut track = H265Track::new(stream, "h265");
        let mut rx = track.handle().subscribe();

        track.write_slice(key_slice(10));
        track.flush(0);
        let frame = rx.recv().await.unwrap();
        assert!(frame.iframe);

        track.write_slice(trail_slice(10));
        track.flush(3000);
        let frame = rx.recv().await.unwrap();
        assert!(!frame.iframe);
    }

    #[tokio::test]
    async fn test_rtp_fu_reassembly() {
        let stream = test_stream("live/fu").await;
        let mut track = H265Track::new(stream, "h265");
        let mut rx = track.handle().subscribe();

        let nalu = ByteChain::from_bytes(key_slice(5000));
        let mut pool = BytesPool::default();
        let packets = rtp::fragment_fu(&nalu, RTP_MTU, &mut pool).unwrap();

        for (i, p) in packets.iter().enumerate() {
            let marker = i == packets.len() - 1;
            track.write_rtp(RtpFrame::new(p.clone(), 90_000, marker));
        }

        let frame = rx.recv().await.unwrap();
        assert!(frame.iframe);
        assert_eq!(frame.pts, 90_000);
        assert_eq!(frame.nalus.len(), 1);
        assert_eq!(frame.nalus[0].to_bytes(), nalu.to_bytes());
    }

    #[tokio::test]
    async fn test_rtp_ap_ingest() {
        let stream = test_stream("live/ap").await;
        let mut track = H265Track::new(stream, "h265");
        let mut rx = track.handle().subscribe();

        let mut pool = BytesPool::default();
        let payload = rtp::pack_ap(
            &[trail_slice(40), trail_slice(60)],
            false,
            &mut pool,
        )
        .unwrap();
        track.write_rtp(RtpFrame::new(payload, 180_000, true));

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.nalus.len(), 2);
        assert!(!frame.iframe);
    }

    #[tokio::test]
    async fn test_avcc_short_write() {
        let stream = test_stream("live/short").await;
        let mut track = H265Track::new(stream, "h265");
        let err = track
            .write_avcc(0, ByteChain::from(vec![0x1c, 0x01, 0x00]))
            .unwrap_err();
        assert_eq!(err, Error::ShortWrite { len: 3 });
    }

    #[tokio::test]
    async fn test_avcc_legacy_frame() {
        let stream = test_stream("live/avcc").await;
        let mut track = H265Track::new(stream, "h265");
        let mut rx = track.handle().subscribe();

        // Legacy AVCC: header + cts + one 4-byte-length-prefixed key NALU
        let nalu = key_slice(20);
        let mut frame = BytesMut::new();
        frame.put_slice(&[0x1c, 0x01, 0x00, 0x00, 0x00]);
        frame.put_u32(nalu.len() as u32);
        frame.put_slice(&nalu);

        track
            .write_avcc(40, ByteChain::from_bytes(frame.freeze()))
            .unwrap();

        let got = rx.recv().await.unwrap();
        assert!(got.iframe);
        assert_eq!(got.pts, 40 * 90);
        assert_eq!(got.nalus[0].to_bytes(), nalu);
    }

    #[tokio::test]
    async fn test_avcc_extended_sequence_start() {
        let stream = test_stream("live/ext").await;
        let mut track = H265Track::new(stream, "h265");
        let handle = track.handle();

        let head =
            hevc::build_seq_header(&build_test_vps(), &build_test_sps(640, 360), &build_test_pps())
                .unwrap();
        // Extended header: bit 7 set, packet type SequenceStart, then a
        // 4-byte codec tag standing where the record's prefix will go.
        let mut ext = BytesMut::new();
        ext.put_slice(&[0x90, b'h', b'v', b'c', b'1']);
        ext.put_slice(&head[5..]);

        track
            .write_avcc(0, ByteChain::from_bytes(ext.freeze()))
            .unwrap();

        let stored = handle.sequence_head().unwrap();
        assert_eq!(&stored[..5], &[0x1c, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(track.sps_info().width, 640);
        assert_eq!(track.nalu_len_size(), 4);
    }

    #[tokio::test]
    async fn test_avcc_coded_frames_strips_prefix() {
        let stream = test_stream("live/cf").await;
        let mut track = H265Track::new(stream, "h265");
        let mut rx = track.handle().subscribe();

        let nalu = trail_slice(16);
        // Extended CodedFrames: [ext hdr][4-byte tag][cts(3)][len][nalu]
        let mut ext = BytesMut::new();
        ext.put_slice(&[0x81, b'h', b'v', b'c', b'1']);
        ext.put_slice(&[0x00, 0x00, 0x28]); // cts = 40ms
        ext.put_u32(nalu.len() as u32);
        ext.put_slice(&nalu);

        track
            .write_avcc(100, ByteChain::from_bytes(ext.freeze()))
            .unwrap();

        let got = rx.recv().await.unwrap();
        assert_eq!(got.pts, (100 + 40) * 90);
        assert_eq!(got.nalus[0].to_bytes(), nalu);
    }

    #[tokio::test]
    async fn test_dc_change_prepends_parameter_sets() {
        let stream = test_stream("live/dc").await;
        let mut track = H265Track::new(stream, "h265");
        let mut rx = track.handle().subscribe();

        track.write_slice(build_test_vps());
        track.write_slice(build_test_sps(320, 240));
        track.write_slice(build_test_pps());

        // A non-key AU between the config and its key frame neither
        // carries nor consumes the pending config
        track.write_slice(trail_slice(10));
        track.flush(0);
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.nalus.len(), 1);
        assert_eq!(hevc::nalu_type(frame.nalus[0].get(0).unwrap()), 1);

        track.write_slice(key_slice(30));
        track.flush(3000);
        let frame = rx.recv().await.unwrap();
        // VPS + SPS + PPS re-emitted ahead of the key slice
        assert_eq!(frame.nalus.len(), 4);
        assert_eq!(hevc::nalu_type(frame.nalus[0].get(0).unwrap()), 32);
        assert_eq!(hevc::nalu_type(frame.nalus[3].get(0).unwrap()), 19);

        // Next key AU without a config change is not prefixed
        track.write_slice(key_slice(30));
        track.flush(6000);
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.nalus.len(), 1);
    }

    #[tokio::test]
    async fn test_packetize_key_frame() {
        let stream = test_stream("live/pkt").await;
        let mut track = H265Track::new(stream, "h265");
        let mut rx = track.handle().subscribe();

        track.write_slice(build_test_vps());
        track.write_slice(build_test_sps(640, 360));
        track.write_slice(build_test_pps());
        track.write_slice(key_slice(3000));
        track.flush(0);

        // The config-change key AU carries the sets in-band already;
        // the packetizer must not add a second copy
        let frame = rx.recv().await.unwrap();
        let payloads = track.packetize(&frame).unwrap();
        assert_eq!(hevc::nalu_type(payloads[0][0]), 32);
        assert_eq!(
            payloads
                .iter()
                .filter(|p| hevc::nalu_type(p[0]) == 32)
                .count(),
            1
        );
        assert!(payloads.iter().all(|p| p.len() <= RTP_MTU));

        // A later key AU has no in-band config: the packetizer supplies
        // exactly one copy
        track.write_slice(key_slice(3000));
        track.flush(3000);
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.nalus.len(), 1);
        let payloads = track.packetize(&frame).unwrap();
        assert_eq!(hevc::nalu_type(payloads[0][0]), 32);
        assert_eq!(
            payloads
                .iter()
                .filter(|p| hevc::nalu_type(p[0]) == 32)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_nalu_dropped() {
        let stream = test_stream("live/unknown").await;
        let mut track = H265Track::new(stream, "h265");
        let mut rx = track.handle().subscribe();

        // Reserved type 47
        track.write_slice(Bytes::from_static(&[47 << 1, 0x01, 0xFF]));
        track.write_slice(trail_slice(5));
        track.flush(0);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.nalus.len(), 1);
    }
}
