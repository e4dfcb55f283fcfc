//! Byte-buffer pool and segmented byte chains
//!
//! Media payloads arrive as scattered fragments (RTP payload slices, AVCC
//! segments). [`ByteChain`] strings reference-counted `Bytes` segments
//! together so access units can be assembled and re-framed without copying.
//! [`BytesPool`] recycles the mutable scratch buffers used to build
//! contiguous records (sequence headers, RTP payloads); released buffers
//! return to a size-classed free list instead of the allocator.
//!
//! `Bytes` reference counting already provides the "buffer shell" pattern:
//! slicing a payload is a zero-copy view that keeps the backing allocation
//! alive, so shells need no dedicated type here.

use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

/// A chain of `Bytes` segments behaving as one logical byte string.
///
/// Cloning is cheap: segments are reference-counted.
#[derive(Debug, Clone, Default)]
pub struct ByteChain {
    segs: VecDeque<Bytes>,
    len: usize,
}

impl ByteChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chain from a single segment
    pub fn from_bytes(data: Bytes) -> Self {
        let mut chain = Self::new();
        chain.push(data);
        chain
    }

    /// Append a segment; empty segments are dropped
    pub fn push(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.len += data.len();
            self.segs.push_back(data);
        }
    }

    /// Prepend a segment
    pub fn push_front(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.len += data.len();
            self.segs.push_front(data);
        }
    }

    /// Total byte length across all segments
    pub fn byte_len(&self) -> usize {
        self.len
    }

    /// Whether the chain holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of segments
    pub fn seg_count(&self) -> usize {
        self.segs.len()
    }

    /// Byte at logical position `i`
    pub fn get(&self, mut i: usize) -> Option<u8> {
        for seg in &self.segs {
            if i < seg.len() {
                return Some(seg[i]);
            }
            i -= seg.len();
        }
        None
    }

    /// Iterate over the segments
    pub fn segments(&self) -> impl Iterator<Item = &Bytes> {
        self.segs.iter()
    }

    /// Zero-copy sub-chain covering bytes `[n..]`
    pub fn slice_from(&self, mut n: usize) -> ByteChain {
        let mut out = ByteChain::new();
        for seg in &self.segs {
            if n >= seg.len() {
                n -= seg.len();
                continue;
            }
            out.push(seg.slice(n..));
            n = 0;
        }
        out
    }

    /// Flatten into a single contiguous `Bytes`.
    ///
    /// Single-segment chains return the segment itself without copying.
    pub fn to_bytes(&self) -> Bytes {
        match self.segs.len() {
            0 => Bytes::new(),
            1 => self.segs[0].clone(),
            _ => {
                let mut buf = BytesMut::with_capacity(self.len);
                for seg in &self.segs {
                    buf.extend_from_slice(seg);
                }
                buf.freeze()
            }
        }
    }

    /// Read `n` bytes off the front of the chain.
    ///
    /// Zero-copy when the read fits inside the first segment. Returns
    /// `None` without consuming anything if fewer than `n` bytes remain.
    pub fn read_bytes(&mut self, n: usize) -> Option<Bytes> {
        if n > self.len {
            return None;
        }
        if n == 0 {
            return Some(Bytes::new());
        }
        let front_len = self.segs.front().map(Bytes::len).unwrap_or(0);
        if n <= front_len {
            let front = self.segs.front_mut().unwrap();
            let out = front.split_to(n);
            if front.is_empty() {
                self.segs.pop_front();
            }
            self.len -= n;
            return Some(out);
        }
        let mut buf = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let front = self.segs.front_mut().unwrap();
            let take = remaining.min(front.len());
            buf.extend_from_slice(&front.split_to(take));
            if front.is_empty() {
                self.segs.pop_front();
            }
            remaining -= take;
        }
        self.len -= n;
        Some(buf.freeze())
    }

    /// Read a single byte off the front
    pub fn read_byte(&mut self) -> Option<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    /// Read a big-endian u16 off the front
    pub fn read_u16(&mut self) -> Option<u16> {
        let b = self.read_bytes(2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }
}

impl Buf for ByteChain {
    fn remaining(&self) -> usize {
        self.len
    }

    fn chunk(&self) -> &[u8] {
        self.segs.front().map(|b| b.as_ref()).unwrap_or(&[])
    }

    fn advance(&mut self, mut cnt: usize) {
        assert!(cnt <= self.len, "advance past end of chain");
        self.len -= cnt;
        while cnt > 0 {
            let front = self.segs.front_mut().unwrap();
            if cnt < front.len() {
                front.advance(cnt);
                return;
            }
            cnt -= front.len();
            self.segs.pop_front();
        }
    }
}

impl From<Bytes> for ByteChain {
    fn from(data: Bytes) -> Self {
        Self::from_bytes(data)
    }
}

impl From<Vec<u8>> for ByteChain {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(Bytes::from(data))
    }
}

/// Size-classed recycler for `BytesMut` scratch buffers.
///
/// Class `i` holds buffers of capacity `1 << i`. A `get` pops from the
/// smallest class that fits (allocating on miss); `put` returns a buffer
/// to its class, dropping it if the class is full.
#[derive(Debug)]
pub struct BytesPool {
    classes: Vec<Vec<BytesMut>>,
    per_class: usize,
}

impl BytesPool {
    /// Pool with `levels` size classes (largest buffer = `1 << (levels-1)`)
    pub fn new(levels: usize) -> Self {
        Self {
            classes: (0..levels).map(|_| Vec::new()).collect(),
            per_class: 8,
        }
    }

    fn class_of(&self, size: usize) -> Option<usize> {
        let class = (usize::BITS - size.saturating_sub(1).leading_zeros()) as usize;
        (class < self.classes.len()).then_some(class)
    }

    /// Get a cleared buffer with capacity for at least `size` bytes.
    ///
    /// Requests larger than the biggest class fall through to a plain
    /// allocation that will not be recycled.
    pub fn get(&mut self, size: usize) -> BytesMut {
        match self.class_of(size.max(1)) {
            Some(class) => match self.classes[class].pop() {
                Some(mut buf) => {
                    buf.clear();
                    buf
                }
                None => BytesMut::with_capacity(1 << class),
            },
            None => BytesMut::with_capacity(size),
        }
    }

    /// Return a buffer to the pool
    pub fn put(&mut self, buf: BytesMut) {
        if let Some(class) = self.class_of(buf.capacity().max(1)) {
            // Only keep buffers that actually fill their class.
            if buf.capacity() >= (1 << class.saturating_sub(1))
                && self.classes[class].len() < self.per_class
            {
                self.classes[class].push(buf);
            }
        }
    }

    /// Total buffers currently pooled
    pub fn pooled(&self) -> usize {
        self.classes.iter().map(Vec::len).sum()
    }
}

impl Default for BytesPool {
    fn default() -> Self {
        // 17 classes: 1 byte .. 64 KiB
        Self::new(17)
    }
}
