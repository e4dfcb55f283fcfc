//! HEVC RTP payload packetization (RFC 7798 subset)
//!
//! Two payload structures are handled beyond single-NALU payloads:
//!
//! Aggregation packet (type 48):
//! ```text
//! [PayloadHdr(2)] [DONL(2)?] { [size(2)] [NALU] [DOND(1)?] }*
//! ```
//!
//! Fragmentation unit (type 49):
//! ```text
//! [PayloadHdr(2)] [FuHeader(1)] [DONL(2)?] [fragment]
//! FuHeader: S(1) E(1) FuType(6)
//! ```
//!
//! DONL/DOND fields only exist when `sprop-max-don-diff > 0` was
//! negotiated; the flag is plumbed through but decoding interleaved
//! streams is not supported, so the values are skipped on read and
//! zeroed on write.

use bytes::{BufMut, Bytes};

use crate::buffer::{ByteChain, BytesPool};
use crate::codec::hevc::{self, H265NaluType};
use crate::error::{CodecError, Result};

/// Default payload budget per RTP packet
pub const RTP_MTU: usize = 1200;

/// One RTP payload handed to the ingress path by a transport adapter.
#[derive(Debug, Clone)]
pub struct RtpFrame {
    /// RTP payload (after the 12-byte RTP header)
    pub payload: Bytes,

    /// RTP timestamp (90 kHz clock for video)
    pub timestamp: u32,

    /// RTP marker bit: set on the last packet of an access unit
    pub marker: bool,
}

impl RtpFrame {
    pub fn new(payload: Bytes, timestamp: u32, marker: bool) -> Self {
        Self {
            payload,
            timestamp,
            marker,
        }
    }

    /// NALU type of the payload header
    pub fn h265_type(&self) -> Option<H265NaluType> {
        self.payload.first().and_then(|&b| H265NaluType::from_header_byte(b))
    }
}

/// Parsed FU header bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuHeader {
    pub start: bool,
    pub end: bool,
    /// Original NALU type carried in the low six bits
    pub nalu_type: u8,
}

/// Pack NALUs into a single aggregation packet payload.
pub fn pack_ap(nalus: &[Bytes], use_donl: bool, pool: &mut BytesPool) -> Result<Bytes> {
    if nalus.is_empty() {
        return Err(CodecError::TruncatedPayload.into());
    }
    let total: usize = nalus.iter().map(|n| n.len() + 3).sum();
    let mut buf = pool.get(total + 4);
    buf.put_slice(&hevc::nalu_header(hevc::NALU_AP));
    if use_donl {
        buf.put_u16(0);
    }
    for nalu in nalus {
        if nalu.len() < 2 || nalu.len() > u16::MAX as usize {
            return Err(CodecError::InvalidNalu.into());
        }
        buf.put_u16(nalu.len() as u16);
        buf.put_slice(nalu);
        if use_donl {
            buf.put_u8(0);
        }
    }
    Ok(buf.freeze())
}

/// Unpack an aggregation packet payload into its NALUs (zero-copy slices).
pub fn unpack_ap(payload: &Bytes, use_donl: bool) -> Result<Vec<Bytes>> {
    let mut chain = ByteChain::from_bytes(payload.clone());
    chain
        .read_u16()
        .ok_or(CodecError::TruncatedPayload)?; // PayloadHdr
    if use_donl {
        chain.read_u16().ok_or(CodecError::TruncatedPayload)?;
    }
    let mut nalus = Vec::new();
    while !chain.is_empty() {
        let len = chain.read_u16().ok_or(CodecError::TruncatedPayload)? as usize;
        let nalu = chain
            .read_bytes(len)
            .ok_or(CodecError::TruncatedPayload)?;
        nalus.push(nalu);
        if use_donl {
            chain.read_byte().ok_or(CodecError::TruncatedPayload)?;
        }
    }
    if nalus.is_empty() {
        return Err(CodecError::TruncatedPayload.into());
    }
    Ok(nalus)
}

/// Parse a fragmentation-unit payload.
///
/// Returns the two payload-header bytes, the FU header bits, and the
/// fragment body.
pub fn parse_fu(payload: &Bytes, use_donl: bool) -> Result<([u8; 2], FuHeader, Bytes)> {
    let mut chain = ByteChain::from_bytes(payload.clone());
    let hdr = chain
        .read_bytes(3)
        .ok_or(CodecError::TruncatedPayload)?;
    let fu = FuHeader {
        start: hdr[2] & 0x80 != 0,
        end: hdr[2] & 0x40 != 0,
        nalu_type: hdr[2] & 0x3F,
    };
    if use_donl && fu.start {
        chain.read_u16().ok_or(CodecError::TruncatedPayload)?;
    }
    let fragment = chain.to_bytes();
    Ok(([hdr[0], hdr[1]], fu, fragment))
}

/// Split one NALU into fragmentation-unit payloads of at most `mtu` bytes.
///
/// NALUs that already fit in `mtu` come back as a single untouched payload.
pub fn fragment_fu(nalu: &ByteChain, mtu: usize, pool: &mut BytesPool) -> Result<Vec<Bytes>> {
    if nalu.byte_len() < 2 {
        return Err(CodecError::InvalidNalu.into());
    }
    if nalu.byte_len() <= mtu {
        return Ok(vec![nalu.to_bytes()]);
    }
    if mtu < 4 {
        return Err(CodecError::InvalidFragment.into());
    }
    let mut rest = nalu.clone();
    let b0 = rest.read_byte().unwrap();
    let b1 = rest.read_byte().unwrap();
    let ty = hevc::nalu_type(b0);
    let fu_b0 = (hevc::NALU_FU << 1) | (b0 & 0x81);

    let chunk = mtu - 3;
    let mut out = Vec::new();
    let mut first = true;
    while !rest.is_empty() {
        let take = chunk.min(rest.byte_len());
        let body = rest.read_bytes(take).unwrap();
        let mut fu = ty;
        if first {
            fu |= 0x80;
            first = false;
        }
        if rest.is_empty() {
            fu |= 0x40;
        }
        let mut buf = pool.get(take + 3);
        buf.put_slice(&[fu_b0, b1, fu]);
        buf.put_slice(&body);
        out.push(buf.freeze());
    }
    Ok(out)
}

/// Reassemble a complete FU packet sequence back into the original NALU.
pub fn defragment_fu(packets: &[Bytes], use_donl: bool) -> Result<Bytes> {
    let mut chain = ByteChain::new();
    let mut started = false;
    for (i, packet) in packets.iter().enumerate() {
        let (hdr, fu, fragment) = parse_fu(packet, use_donl)?;
        if fu.start {
            if started {
                return Err(CodecError::InvalidFragment.into());
            }
            started = true;
            let rebuilt = (hdr[0] & 0x81) | (fu.nalu_type << 1);
            chain.push(Bytes::copy_from_slice(&[rebuilt, hdr[1]]));
        } else if !started {
            return Err(CodecError::InvalidFragment.into());
        }
        chain.push(fragment);
        if fu.end != (i == packets.len() - 1) {
            return Err(CodecError::InvalidFragment.into());
        }
    }
    if !started {
        return Err(CodecError::InvalidFragment.into());
    }
    Ok(chain.to_bytes())
}

/// Packetize one access unit into RTP payloads.
///
/// For key frames the caller passes the parameter sets so receivers that
/// joined late can configure their decoder; each is emitted as its own
/// payload ahead of the slice data. NALUs above the MTU are fragmented.
pub fn packetize_au(
    nalus: &[ByteChain],
    params: Option<[&Bytes; 3]>,
    mtu: usize,
    pool: &mut BytesPool,
) -> Result<Vec<Bytes>> {
    let mut out = Vec::new();
    if let Some(sets) = params {
        for set in sets {
            out.push(set.clone());
        }
    }
    for nalu in nalus {
        out.extend(fragment_fu(nalu, mtu, pool)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nalu(ty: u8, len: usize) -> Bytes {
        let mut data = hevc::nalu_header(ty).to_vec();
        data.extend((0..len).map(|i| i as u8));
        Bytes::from(data)
    }

    #[test]
    fn test_ap_round_trip() {
        let mut pool = BytesPool::default();
        let input = vec![nalu(32, 8), nalu(33, 20), nalu(34, 5)];

        let payload = pack_ap(&input, false, &mut pool).unwrap();
        assert_eq!(hevc::nalu_type(payload[0]), hevc::NALU_AP);

        let output = unpack_ap(&payload, false).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_ap_round_trip_with_donl() {
        let mut pool = BytesPool::default();
        let input = vec![nalu(19, 100), nalu(1, 30)];
        let payload = pack_ap(&input, true, &mut pool).unwrap();
        let output = unpack_ap(&payload, true).unwrap();
        assert_eq!(output, input);
        // Without the flag the DONL bytes shift the framing
        assert!(unpack_ap(&payload, false).is_err() || unpack_ap(&payload, false).unwrap() != input);
    }

    #[test]
    fn test_ap_truncated() {
        assert!(unpack_ap(&Bytes::from_static(&[0x60]), false).is_err());
        // Length prefix promising more than available
        let bad = Bytes::from_static(&[0x60, 0x01, 0x00, 0x10, 0xAA]);
        assert!(unpack_ap(&bad, false).is_err());
    }

    #[test]
    fn test_fu_round_trip() {
        let mut pool = BytesPool::default();
        let original = ByteChain::from_bytes(nalu(19, 5000));

        let packets = fragment_fu(&original, RTP_MTU, &mut pool).unwrap();
        assert!(packets.len() > 1);
        for p in &packets {
            assert!(p.len() <= RTP_MTU);
            assert_eq!(hevc::nalu_type(p[0]), hevc::NALU_FU);
        }
        // Exactly one start, one end
        let (_, first, _) = parse_fu(&packets[0], false).unwrap();
        assert!(first.start && !first.end);
        assert_eq!(first.nalu_type, 19);
        let (_, last, _) = parse_fu(packets.last().unwrap(), false).unwrap();
        assert!(last.end && !last.start);

        let rebuilt = defragment_fu(&packets, false).unwrap();
        assert_eq!(rebuilt, original.to_bytes());
    }

    #[test]
    fn test_fu_small_nalu_passthrough() {
        let mut pool = BytesPool::default();
        let small = ByteChain::from_bytes(nalu(1, 100));
        let packets = fragment_fu(&small, RTP_MTU, &mut pool).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0], small.to_bytes());
    }

    #[test]
    fn test_fu_missing_start() {
        let mut pool = BytesPool::default();
        let packets = fragment_fu(
            &ByteChain::from_bytes(nalu(19, 4000)),
            RTP_MTU,
            &mut pool,
        )
        .unwrap();
        assert!(defragment_fu(&packets[1..], false).is_err());
    }

    #[test]
    fn test_packetize_au_prefixes_params_on_keyframe() {
        let mut pool = BytesPool::default();
        let vps = nalu(32, 4);
        let sps = nalu(33, 10);
        let pps = nalu(34, 3);
        let au = vec![ByteChain::from_bytes(nalu(19, 50))];

        let payloads =
            packetize_au(&au, Some([&vps, &sps, &pps]), RTP_MTU, &mut pool).unwrap();
        assert_eq!(payloads.len(), 4);
        assert_eq!(hevc::nalu_type(payloads[0][0]), 32);
        assert_eq!(hevc::nalu_type(payloads[1][0]), 33);
        assert_eq!(hevc::nalu_type(payloads[2][0]), 34);
        assert_eq!(hevc::nalu_type(payloads[3][0]), 19);

        // Non-key AU: no parameter sets
        let payloads = packetize_au(&au, None, RTP_MTU, &mut pool).unwrap();
        assert_eq!(payloads.len(), 1);
    }
}
