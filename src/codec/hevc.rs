//! H.265/HEVC parsing
//!
//! HEVC NALUs carry a 2-byte header; the unit type lives in bits 6..1 of
//! the first byte. Container formats frame HEVC with an
//! HEVCDecoderConfigurationRecord ("sequence header") preceded by a 5-byte
//! video-tag prefix:
//!
//! ```text
//! [0]      frame/codec byte (0x1c)
//! [1]      packet type (0 = sequence header)
//! [2..5]   composition time (0)
//! [5]      configurationVersion (1)
//! [6]      profile_space(2) | tier(1) | profile_idc(5)
//! [7..11]  general_profile_compatibility_flags
//! [11..17] general_constraint_indicator_flags
//! [17]     general_level_idc
//! [18..26] segmentation / parallelism / chroma / bit depth / frame rate
//! [26]     constantFrameRate(2) | numTemporalLayers(3)
//!          | temporalIdNested(1) | lengthSizeMinusOne(2)
//! [27]     numOfArrays, then (arrayHdr, count, {len, NALU}) per array
//! ```
//!
//! The NALU length-prefix width used by AVCC framing is therefore byte 26,
//! low two bits, plus one.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};

/// RTP aggregation packet NALU type
pub const NALU_AP: u8 = 48;
/// RTP fragmentation unit NALU type
pub const NALU_FU: u8 = 49;

/// Byte offset of the length-size indicator inside a sequence header
const LENGTH_SIZE_OFFSET: usize = 26;
/// Byte offset of the parameter-set arrays inside a sequence header
const ARRAYS_OFFSET: usize = 27;

/// Extract the NALU type from the first header byte
#[inline]
pub fn nalu_type(b0: u8) -> u8 {
    (b0 >> 1) & 0x3F
}

/// Build a 2-byte NALU header for a unit type (layer 0, TID 1)
#[inline]
pub fn nalu_header(ty: u8) -> [u8; 2] {
    [(ty << 1) & 0x7E, 0x01]
}

/// HEVC NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H265NaluType {
    /// Trailing picture, non-reference
    TrailN = 0,
    /// Trailing picture, reference
    TrailR = 1,
    TsaN = 2,
    TsaR = 3,
    StsaN = 4,
    StsaR = 5,
    RadlN = 6,
    RadlR = 7,
    RaslN = 8,
    RaslR = 9,
    /// Broken link access, with leading pictures
    BlaWLp = 16,
    BlaWRadl = 17,
    BlaNLp = 18,
    /// Instantaneous decoder refresh
    IdrWRadl = 19,
    IdrNLp = 20,
    /// Clean random access
    Cra = 21,
    /// Video parameter set
    Vps = 32,
    /// Sequence parameter set
    Sps = 33,
    /// Picture parameter set
    Pps = 34,
    /// Access unit delimiter
    Aud = 35,
    SeiPrefix = 39,
    SeiSuffix = 40,
    /// RTP aggregation packet
    Ap = 48,
    /// RTP fragmentation unit
    Fu = 49,
}

impl H265NaluType {
    /// Map a raw unit type to a known variant
    pub fn from_type(t: u8) -> Option<Self> {
        Some(match t {
            0 => H265NaluType::TrailN,
            1 => H265NaluType::TrailR,
            2 => H265NaluType::TsaN,
            3 => H265NaluType::TsaR,
            4 => H265NaluType::StsaN,
            5 => H265NaluType::StsaR,
            6 => H265NaluType::RadlN,
            7 => H265NaluType::RadlR,
            8 => H265NaluType::RaslN,
            9 => H265NaluType::RaslR,
            16 => H265NaluType::BlaWLp,
            17 => H265NaluType::BlaWRadl,
            18 => H265NaluType::BlaNLp,
            19 => H265NaluType::IdrWRadl,
            20 => H265NaluType::IdrNLp,
            21 => H265NaluType::Cra,
            32 => H265NaluType::Vps,
            33 => H265NaluType::Sps,
            34 => H265NaluType::Pps,
            35 => H265NaluType::Aud,
            39 => H265NaluType::SeiPrefix,
            40 => H265NaluType::SeiSuffix,
            48 => H265NaluType::Ap,
            49 => H265NaluType::Fu,
            _ => return None,
        })
    }

    /// Classify the first byte of a NALU header
    pub fn from_header_byte(b0: u8) -> Option<Self> {
        Self::from_type(nalu_type(b0))
    }

    /// IDR/CRA/BLA variants start a new decodable picture
    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            H265NaluType::BlaWLp
                | H265NaluType::BlaWRadl
                | H265NaluType::BlaNLp
                | H265NaluType::IdrWRadl
                | H265NaluType::IdrNLp
                | H265NaluType::Cra
        )
    }

    /// Ordinary coded slices (types 0..=9)
    pub fn is_trailing_slice(&self) -> bool {
        (*self as u8) <= 9
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(
            self,
            H265NaluType::Vps | H265NaluType::Sps | H265NaluType::Pps
        )
    }

    pub fn is_sei(&self) -> bool {
        matches!(self, H265NaluType::SeiPrefix | H265NaluType::SeiSuffix)
    }
}

/// Picture dimensions parsed from the SPS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpsInfo {
    pub width: u32,
    pub height: u32,
}

/// Fields the decoder configuration record copies from the SPS
#[derive(Debug, Clone, Default)]
struct SpsDetail {
    profile_space: u8,
    tier_flag: u8,
    profile_idc: u8,
    compat_flags: u32,
    constraint_flags: [u8; 6],
    level_idc: u8,
    max_sub_layers_minus1: u8,
    temporal_id_nested: u8,
    chroma_format_idc: u32,
    bit_depth_luma_minus8: u32,
    bit_depth_chroma_minus8: u32,
    info: SpsInfo,
}

/// Parse picture dimensions from an SPS NALU (header included)
pub fn parse_sps(sps: &[u8]) -> Result<SpsInfo> {
    parse_sps_detail(sps).map(|d| d.info)
}

fn parse_sps_detail(sps: &[u8]) -> Result<SpsDetail> {
    if sps.len() < 4 || nalu_type(sps[0]) != H265NaluType::Sps as u8 {
        return Err(CodecError::InvalidSps.into());
    }
    let rbsp = extract_rbsp(&sps[2..]);
    let mut r = BitReader::new(&rbsp);
    let mut d = SpsDetail::default();

    r.read_bits(4)?; // sps_video_parameter_set_id
    d.max_sub_layers_minus1 = r.read_bits(3)? as u8;
    d.temporal_id_nested = r.read_bits(1)? as u8;

    // profile_tier_level
    d.profile_space = r.read_bits(2)? as u8;
    d.tier_flag = r.read_bits(1)? as u8;
    d.profile_idc = r.read_bits(5)? as u8;
    d.compat_flags = r.read_bits(32)?;
    for flag in d.constraint_flags.iter_mut() {
        *flag = r.read_bits(8)? as u8;
    }
    d.level_idc = r.read_bits(8)? as u8;
    let n = d.max_sub_layers_minus1 as usize;
    let mut profile_present = [false; 8];
    let mut level_present = [false; 8];
    for i in 0..n {
        profile_present[i] = r.read_bits(1)? == 1;
        level_present[i] = r.read_bits(1)? == 1;
    }
    if n > 0 {
        for _ in n..8 {
            r.read_bits(2)?; // reserved_zero_2bits
        }
    }
    for i in 0..n {
        if profile_present[i] {
            r.skip(88)?;
        }
        if level_present[i] {
            r.skip(8)?;
        }
    }

    r.read_ue()?; // sps_seq_parameter_set_id
    d.chroma_format_idc = r.read_ue()?;
    if d.chroma_format_idc == 3 {
        r.read_bits(1)?; // separate_colour_plane_flag
    }
    let width = r.read_ue()?;
    let height = r.read_ue()?;
    let (mut crop_x, mut crop_y) = (0u32, 0u32);
    if r.read_bits(1)? == 1 {
        let left = r.read_ue()?;
        let right = r.read_ue()?;
        let top = r.read_ue()?;
        let bottom = r.read_ue()?;
        let sub_width = if d.chroma_format_idc == 1 || d.chroma_format_idc == 2 {
            2
        } else {
            1
        };
        let sub_height = if d.chroma_format_idc == 1 { 2 } else { 1 };
        crop_x = (left + right) * sub_width;
        crop_y = (top + bottom) * sub_height;
    }
    d.bit_depth_luma_minus8 = r.read_ue()?;
    d.bit_depth_chroma_minus8 = r.read_ue()?;

    d.info = SpsInfo {
        width: width.saturating_sub(crop_x),
        height: height.saturating_sub(crop_y),
    };
    Ok(d)
}

/// Build a sequence header (5-byte prefix + HEVCDecoderConfigurationRecord)
/// from raw VPS/SPS/PPS NALUs.
pub fn build_seq_header(vps: &[u8], sps: &[u8], pps: &[u8]) -> Result<Bytes> {
    for (nalu, ty, name) in [
        (vps, H265NaluType::Vps, "VPS"),
        (sps, H265NaluType::Sps, "SPS"),
        (pps, H265NaluType::Pps, "PPS"),
    ] {
        if nalu.len() < 2 || nalu.len() > u16::MAX as usize {
            return Err(CodecError::MissingParameterSet(name).into());
        }
        if nalu_type(nalu[0]) != ty as u8 {
            return Err(CodecError::MissingParameterSet(name).into());
        }
    }
    let d = parse_sps_detail(sps)?;

    let mut buf = BytesMut::with_capacity(33 + vps.len() + sps.len() + pps.len() + 15);
    // Container prefix: keyframe + sequence-header packet, zero composition time
    buf.put_slice(&[0x1c, 0x00, 0x00, 0x00, 0x00]);
    buf.put_u8(0x01); // configurationVersion
    buf.put_u8((d.profile_space << 6) | (d.tier_flag << 5) | d.profile_idc);
    buf.put_u32(d.compat_flags);
    buf.put_slice(&d.constraint_flags);
    buf.put_u8(d.level_idc);
    buf.put_u16(0xF000); // min_spatial_segmentation_idc
    buf.put_u8(0xFC); // parallelismType
    buf.put_u8(0xFC | (d.chroma_format_idc as u8 & 0x03));
    buf.put_u8(0xF8 | (d.bit_depth_luma_minus8 as u8 & 0x07));
    buf.put_u8(0xF8 | (d.bit_depth_chroma_minus8 as u8 & 0x07));
    buf.put_u16(0); // avgFrameRate
    // constantFrameRate=0, lengthSizeMinusOne=3 (4-byte NALU lengths)
    buf.put_u8(((d.max_sub_layers_minus1 + 1) << 3) | (d.temporal_id_nested << 2) | 0x03);
    buf.put_u8(3); // numOfArrays
    for (nalu, ty) in [
        (vps, H265NaluType::Vps),
        (sps, H265NaluType::Sps),
        (pps, H265NaluType::Pps),
    ] {
        buf.put_u8(0x80 | ty as u8); // array_completeness set
        buf.put_u16(1);
        buf.put_u16(nalu.len() as u16);
        buf.put_slice(nalu);
    }
    Ok(buf.freeze())
}

/// Recover VPS/SPS/PPS from a sequence header without copying.
///
/// Returns the first NALU of each parameter-set array as a slice of the
/// input `Bytes`.
pub fn parse_seq_header(head: &Bytes) -> Result<(Bytes, Bytes, Bytes)> {
    if head.len() <= ARRAYS_OFFSET {
        return Err(CodecError::InvalidSequenceHeader.into());
    }
    let mut vps = None;
    let mut sps = None;
    let mut pps = None;
    let num_arrays = head[ARRAYS_OFFSET] as usize;
    let mut off = ARRAYS_OFFSET + 1;
    for _ in 0..num_arrays {
        if off + 3 > head.len() {
            return Err(CodecError::InvalidSequenceHeader.into());
        }
        let ty = head[off] & 0x3F;
        let count = u16::from_be_bytes([head[off + 1], head[off + 2]]) as usize;
        off += 3;
        for _ in 0..count {
            if off + 2 > head.len() {
                return Err(CodecError::InvalidSequenceHeader.into());
            }
            let len = u16::from_be_bytes([head[off], head[off + 1]]) as usize;
            off += 2;
            if off + len > head.len() {
                return Err(CodecError::InvalidSequenceHeader.into());
            }
            let nalu = head.slice(off..off + len);
            off += len;
            match H265NaluType::from_type(ty) {
                Some(H265NaluType::Vps) => vps.get_or_insert(nalu),
                Some(H265NaluType::Sps) => sps.get_or_insert(nalu),
                Some(H265NaluType::Pps) => pps.get_or_insert(nalu),
                _ => continue,
            };
        }
    }
    Ok((
        vps.ok_or(CodecError::MissingParameterSet("VPS"))?,
        sps.ok_or(CodecError::MissingParameterSet("SPS"))?,
        pps.ok_or(CodecError::MissingParameterSet("PPS"))?,
    ))
}

/// NALU length-prefix width (1, 2 or 4 bytes) declared by a sequence header
pub fn nalu_length_size(head: &[u8]) -> Result<usize> {
    if head.len() <= LENGTH_SIZE_OFFSET {
        return Err(CodecError::InvalidSequenceHeader.into());
    }
    Ok(((head[LENGTH_SIZE_OFFSET] & 0x03) + 1) as usize)
}

/// Strip emulation-prevention bytes (00 00 03 -> 00 00) from a NALU body
fn extract_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0u32;
    for &b in data {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

/// MSB-first bit reader over an RBSP byte slice
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bits(&mut self, n: u32) -> Result<u32> {
        debug_assert!(n <= 32);
        let mut value = 0u32;
        for _ in 0..n {
            let byte = self
                .data
                .get(self.pos / 8)
                .ok_or(CodecError::InvalidSps)?;
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Ok(value)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        if (self.pos + n + 7) / 8 > self.data.len() {
            return Err(CodecError::InvalidSps.into());
        }
        self.pos += n;
        Ok(())
    }

    /// Exp-Golomb unsigned
    fn read_ue(&mut self) -> Result<u32> {
        let mut zeros = 0u32;
        while self.read_bits(1)? == 0 {
            zeros += 1;
            if zeros > 31 {
                return Err(CodecError::InvalidSps.into());
            }
        }
        let rest = if zeros > 0 { self.read_bits(zeros)? } else { 0 };
        Ok((1u32 << zeros) - 1 + rest)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Builders for structurally valid HEVC bitstreams used across the
    //! crate's tests.

    use bytes::Bytes;

    /// LSB-append bit writer producing MSB-first bytes
    pub struct BitWriter {
        bytes: Vec<u8>,
        bit: u8,
    }

    impl BitWriter {
        pub fn new() -> Self {
            Self {
                bytes: Vec::new(),
                bit: 0,
            }
        }

        pub fn put_bits(&mut self, value: u32, n: u32) {
            for i in (0..n).rev() {
                if self.bit == 0 {
                    self.bytes.push(0);
                }
                let b = ((value >> i) & 1) as u8;
                let last = self.bytes.last_mut().unwrap();
                *last |= b << (7 - self.bit);
                self.bit = (self.bit + 1) % 8;
            }
        }

        pub fn put_ue(&mut self, value: u32) {
            let v = value + 1;
            let bits = 32 - v.leading_zeros();
            self.put_bits(0, bits - 1);
            self.put_bits(v, bits);
        }

        pub fn finish(mut self) -> Vec<u8> {
            // rbsp_stop_one_bit + alignment
            self.put_bits(1, 1);
            while self.bit != 0 {
                self.put_bits(0, 1);
            }
            self.bytes
        }
    }

    /// Build a minimal, parseable SPS NALU for the given dimensions
    pub fn build_test_sps(width: u32, height: u32) -> Bytes {
        let mut w = BitWriter::new();
        w.put_bits(0, 4); // sps_video_parameter_set_id
        w.put_bits(0, 3); // sps_max_sub_layers_minus1
        w.put_bits(1, 1); // sps_temporal_id_nesting_flag
        w.put_bits(0, 2); // general_profile_space
        w.put_bits(0, 1); // general_tier_flag
        w.put_bits(1, 5); // general_profile_idc (Main)
        w.put_bits(0x6000_0000, 32); // compatibility flags
        w.put_bits(0x90, 8); // progressive + frame-only
        w.put_bits(0, 32);
        w.put_bits(0, 8);
        w.put_bits(93, 8); // general_level_idc (3.1)
        w.put_ue(0); // sps_seq_parameter_set_id
        w.put_ue(1); // chroma_format_idc (4:2:0)
        w.put_ue(width);
        w.put_ue(height);
        w.put_bits(0, 1); // conformance_window_flag
        w.put_ue(0); // bit_depth_luma_minus8
        w.put_ue(0); // bit_depth_chroma_minus8
        let mut sps = vec![0x42, 0x01];
        sps.extend(w.finish());
        Bytes::from(sps)
    }

    /// Minimal VPS NALU (only the header is inspected by the builder)
    pub fn build_test_vps() -> Bytes {
        Bytes::from_static(&[0x40, 0x01, 0x0c, 0x01, 0xff, 0xff])
    }

    /// Minimal PPS NALU
    pub fn build_test_pps() -> Bytes {
        Bytes::from_static(&[0x44, 0x01, 0xc1, 0x72, 0xb4, 0x62, 0x40])
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_nalu_type_extraction() {
        assert_eq!(nalu_type(0x40), 32); // VPS
        assert_eq!(nalu_type(0x42), 33); // SPS
        assert_eq!(nalu_type(0x44), 34); // PPS
        assert_eq!(nalu_type(0x26), 19); // IDR_W_RADL
        assert_eq!(nalu_type(0x02), 1); // TRAIL_R
    }

    #[test]
    fn test_nalu_type_round_trip() {
        for t in 0..=63u8 {
            let header = nalu_header(t);
            assert_eq!(nalu_type(header[0]), t);
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(H265NaluType::from_header_byte(0x40), Some(H265NaluType::Vps));
        assert_eq!(
            H265NaluType::from_header_byte(0x26),
            Some(H265NaluType::IdrWRadl)
        );
        assert!(H265NaluType::IdrNLp.is_keyframe());
        assert!(H265NaluType::Cra.is_keyframe());
        assert!(H265NaluType::BlaWLp.is_keyframe());
        assert!(!H265NaluType::TrailR.is_keyframe());
        assert!(H265NaluType::TrailN.is_trailing_slice());
        assert!(H265NaluType::RaslR.is_trailing_slice());
        assert!(!H265NaluType::Vps.is_trailing_slice());
        assert!(H265NaluType::Sps.is_parameter_set());
        assert!(H265NaluType::SeiPrefix.is_sei());
        // Reserved types map to nothing
        assert_eq!(H265NaluType::from_type(47), None);
    }

    #[test]
    fn test_parse_sps_dimensions() {
        let sps = build_test_sps(1920, 1080);
        let info = parse_sps(&sps).unwrap();
        assert_eq!(info, SpsInfo { width: 1920, height: 1080 });

        let sps = build_test_sps(640, 360);
        assert_eq!(parse_sps(&sps).unwrap().width, 640);
    }

    #[test]
    fn test_parse_sps_rejects_garbage() {
        assert!(parse_sps(&[0x42]).is_err());
        // Wrong NALU type
        assert!(parse_sps(&[0x40, 0x01, 0x00, 0x00]).is_err());
        // Truncated bitstream
        assert!(parse_sps(&[0x42, 0x01, 0x01]).is_err());
    }

    #[test]
    fn test_seq_header_round_trip() {
        let vps = build_test_vps();
        let sps = build_test_sps(1280, 720);
        let pps = build_test_pps();

        let head = build_seq_header(&vps, &sps, &pps).unwrap();
        assert_eq!(&head[..5], &[0x1c, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(nalu_length_size(&head).unwrap(), 4);

        let (v, s, p) = parse_seq_header(&head).unwrap();
        assert_eq!(v, vps);
        assert_eq!(s, sps);
        assert_eq!(p, pps);
    }

    #[test]
    fn test_build_rejects_bad_parameter_sets() {
        let vps = build_test_vps();
        let sps = build_test_sps(640, 480);
        // PPS with a VPS header byte
        let err = build_seq_header(&vps, &sps, &[0x40, 0x01]).unwrap_err();
        assert_eq!(
            err,
            CodecError::MissingParameterSet("PPS").into()
        );
        // Truncated PPS
        assert!(build_seq_header(&vps, &sps, &[0x44]).is_err());
        // SPS that cannot be parsed
        assert!(build_seq_header(&vps, &[0x42, 0x01], &build_test_pps()).is_err());
    }

    #[test]
    fn test_parse_seq_header_truncated() {
        let head = build_seq_header(
            &build_test_vps(),
            &build_test_sps(320, 240),
            &build_test_pps(),
        )
        .unwrap();
        for cut in [0, 10, 27, 30, head.len() - 1] {
            assert!(parse_seq_header(&head.slice(..cut)).is_err());
        }
    }

    #[test]
    fn test_extract_rbsp() {
        assert_eq!(
            extract_rbsp(&[0x00, 0x00, 0x03, 0x01, 0x02]),
            vec![0x00, 0x00, 0x01, 0x02]
        );
        // 03 not preceded by two zeros survives
        assert_eq!(extract_rbsp(&[0x00, 0x03, 0x00]), vec![0x00, 0x03, 0x00]);
    }

    #[test]
    fn test_bit_reader_ue() {
        // 1 -> 0, 010 -> 1, 011 -> 2, 00100 -> 3
        let data = [0b1_010_011_0, 0b0100_0000];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_ue().unwrap(), 0);
        assert_eq!(r.read_ue().unwrap(), 1);
        assert_eq!(r.read_ue().unwrap(), 2);
        assert_eq!(r.read_ue().unwrap(), 3);
    }
}
