//! Sliding replay window over packet indices (RFC 3711 §3.3.2).

use super::policy::REPLAY_WINDOW_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplayCheck {
    Fresh,
    Replayed,
    TooOld,
}

/// Bitmap of the last 128 indices, bit 0 being the highest index seen.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReplayWindow {
    highest: Option<u64>,
    window: u128,
}

impl ReplayWindow {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Highest index accepted so far.
    pub(crate) fn highest(&self) -> Option<u64> {
        self.highest
    }

    pub(crate) fn check(&self, index: u64) -> ReplayCheck {
        let Some(highest) = self.highest else {
            return ReplayCheck::Fresh;
        };
        if index > highest {
            return ReplayCheck::Fresh;
        }
        let diff = highest - index;
        if diff >= REPLAY_WINDOW_SIZE {
            return ReplayCheck::TooOld;
        }
        if self.window & (1u128 << diff) != 0 {
            ReplayCheck::Replayed
        } else {
            ReplayCheck::Fresh
        }
    }

    /// Mark `index` as received. Only call after the packet authenticated.
    pub(crate) fn record(&mut self, index: u64) {
        match self.highest {
            None => {
                self.highest = Some(index);
                self.window = 1;
            }
            Some(highest) if index > highest => {
                let diff = index - highest;
                self.window = if diff < REPLAY_WINDOW_SIZE {
                    self.window << diff
                } else {
                    0
                };
                self.window |= 1;
                self.highest = Some(index);
            }
            Some(highest) => {
                let diff = highest - index;
                if diff < REPLAY_WINDOW_SIZE {
                    self.window |= 1u128 << diff;
                }
            }
        }
    }
}
