//! Codec-level helpers for the H.265 ingress path
//!
//! This module provides:
//! - HEVC NALU classification and sequence-header (decoder configuration
//!   record) construction and parsing
//! - SPS parsing for picture dimensions
//! - RTP payload packetization: aggregation packets and fragmentation units

pub mod hevc;
pub mod rtp;

pub use hevc::{nalu_header, nalu_type, H265NaluType, SpsInfo};
pub use rtp::{RtpFrame, RTP_MTU};
