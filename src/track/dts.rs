//! DTS estimation from the PTS sequence
//!
//! B-frames arrive in decode order, so presentation timestamps are not
//! monotonic. The estimator emits a decoding timestamp as the minimum over
//! a sliding window of the last three presentation timestamps, clamped to
//! never decrease. For streams without reordering the output trails the
//! input by two frames; with reordering up to depth two the output stays
//! monotonic and never exceeds the frame's own PTS.

/// Sliding-window DTS estimator (reorder depth 2).
#[derive(Debug, Default)]
pub struct DtsEstimator {
    p1: u32,
    p2: u32,
    last_dts: u32,
    fed: u8,
}

impl DtsEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next PTS (90 kHz units), returning the estimated DTS.
    pub fn feed(&mut self, pts: u32) -> u32 {
        let dts = match self.fed {
            0 => pts,
            1 => pts.min(self.p1).max(self.last_dts),
            _ => pts.min(self.p1).min(self.p2).max(self.last_dts),
        };
        self.p2 = self.p1;
        self.p1 = pts;
        if self.fed < 2 {
            self.fed += 1;
        }
        self.last_dts = dts;
        dts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotone_input_trails_by_two() {
        let mut est = DtsEstimator::new();
        let pts: Vec<u32> = (0..8).map(|i| i * 3000).collect();
        let dts: Vec<u32> = pts.iter().map(|&p| est.feed(p)).collect();

        assert_eq!(dts[0], 0);
        assert_eq!(dts[1], 0);
        for i in 2..8 {
            assert_eq!(dts[i], pts[i - 2]);
        }
    }

    #[test]
    fn test_reordered_input_stays_monotonic() {
        let mut est = DtsEstimator::new();
        // IBBP cadence in decode order: I P B B P B B ...
        let pts = [0u32, 9000, 3000, 6000, 18000, 12000, 15000, 27000];
        let mut prev = 0;
        for (&p, i) in pts.iter().zip(0..) {
            let d = est.feed(p);
            assert!(d <= p, "dts {} exceeds pts {} at {}", d, p, i);
            assert!(d >= prev, "dts went backwards at {}", i);
            prev = d;
        }
    }

    #[test]
    fn test_first_frame_is_pts() {
        let mut est = DtsEstimator::new();
        assert_eq!(est.feed(90_000), 90_000);
    }
}
