//! Per-neighbor link quality estimation (ETX).
//!
//! Each sample is the number of link-layer attempts one packet consumed.
//! Failures are recorded at double cost, so a lossy link degrades faster
//! than a merely slow one recovers.

use crate::types::{INITIAL_LINK_ESTIMATE, LINK_ESTIMATE_HISTORY, LINK_ESTIMATE_UNIT};

/// Ring of recent transmission costs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkEstimate {
    history: [u8; LINK_ESTIMATE_HISTORY],
    next: u8,
    count: u8,
}

impl LinkEstimate {
    pub const fn new() -> Self {
        Self {
            history: [0; LINK_ESTIMATE_HISTORY],
            next: 0,
            count: 0,
        }
    }

    /// Forget all samples.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Record a delivery that took `cost` attempts. Zero is ignored.
    pub fn record_success(&mut self, cost: u8) {
        if cost == 0 {
            return;
        }
        self.push(cost);
    }

    /// Record a failed delivery that burned `cost` attempts.
    pub fn record_failure(&mut self, cost: u8) {
        if cost == 0 {
            return;
        }
        self.push(cost.saturating_mul(2));
    }

    fn push(&mut self, sample: u8) {
        self.history[self.next as usize] = sample;
        self.next = (self.next + 1) % LINK_ESTIMATE_HISTORY as u8;
        if (self.count as usize) < LINK_ESTIMATE_HISTORY {
            self.count += 1;
        }
    }

    /// Current estimate in `LINK_ESTIMATE_UNIT`s.
    ///
    /// Unsampled links report `INITIAL_LINK_ESTIMATE`.
    pub fn estimate(&self) -> u16 {
        if self.count == 0 {
            return INITIAL_LINK_ESTIMATE;
        }
        let sum: u16 = self.history[..self.count as usize]
            .iter()
            .map(|&s| u16::from(s))
            .sum();
        LINK_ESTIMATE_UNIT * sum / u16::from(self.count)
    }

    pub fn sample_count(&self) -> usize {
        self.count as usize
    }
}
