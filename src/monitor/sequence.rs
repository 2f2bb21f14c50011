use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// How one sequence number was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// First frame seen on the link
    First,
    /// Exactly one ahead of the previous frame
    InOrder,
    /// Same as the previous frame, or already resolved recently
    Duplicate,
    /// Forward jump inside the gap window; the skipped numbers are now pending
    Gap { missing: u8 },
    /// A pending number arrived late
    BadOrder,
    /// Jump beyond the gap window that matched nothing, taken as forward progress
    Ambiguous,
}

impl SequenceOutcome {
    /// Whether the frame suggests loss right before it
    pub fn breaks_streak(&self) -> bool {
        matches!(self, SequenceOutcome::Gap { .. } | SequenceOutcome::Ambiguous)
    }
}

/// Modulo-256 sequence tracking with a bounded window for telling a gap
/// from a late arrival.
///
/// Numbers skipped by a forward jump wait in `pending` until they arrive
/// (bad order) or age out (dropped). Numbers that left `pending` stay in
/// `resolved` for the same lifetime so a stray copy cannot be counted again.
/// A pending entry still present when its number comes round again on the
/// next lap is dropped on the spot.
#[derive(Debug)]
pub struct SequenceTracker {
    gap_window: u8,
    pending_timeout: Duration,
    last: Option<u8>,
    pending: HashMap<u8, Instant>,
    resolved: HashMap<u8, Instant>,
    /// Entries dropped by a later lap, reported by the next purge
    overrun: u64,
}

impl SequenceTracker {
    pub fn new(gap_window: u8, pending_timeout: Duration) -> Self {
        SequenceTracker {
            gap_window,
            pending_timeout,
            last: None,
            pending: HashMap::new(),
            resolved: HashMap::new(),
            overrun: 0,
        }
    }

    /// Last sequence number the tracker advanced to
    pub fn last(&self) -> Option<u8> {
        self.last
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, seq: u8) -> bool {
        self.pending.contains_key(&seq)
    }

    /// Classifies `seq` and updates the window
    pub fn observe(&mut self, seq: u8, now: Instant) -> SequenceOutcome {
        let Some(last) = self.last else {
            self.advance(seq);
            return SequenceOutcome::First;
        };

        let delta = seq.wrapping_sub(last);
        match delta {
            0 => SequenceOutcome::Duplicate,
            1 => {
                self.advance(seq);
                SequenceOutcome::InOrder
            }
            d if d > self.gap_window => {
                if self.pending.remove(&seq).is_some() {
                    self.resolved.insert(seq, now);
                    SequenceOutcome::BadOrder
                } else if self.resolved.contains_key(&seq) {
                    SequenceOutcome::Duplicate
                } else {
                    self.advance(seq);
                    SequenceOutcome::Ambiguous
                }
            }
            d => {
                self.advance(seq);
                for step in 1..d {
                    let skipped = last.wrapping_add(step);
                    self.resolved.remove(&skipped);
                    if self.pending.insert(skipped, now).is_some() {
                        self.overrun += 1;
                    }
                }
                SequenceOutcome::Gap { missing: d - 1 }
            }
        }
    }

    /// Gives up on pending numbers at least `pending_timeout` old.
    ///
    /// Returns how many numbers were dropped since the last call, including
    /// entries overrun by a later lap. Each entry is counted at most once.
    pub fn purge(&mut self, now: Instant) -> u64 {
        let timeout = self.pending_timeout;
        let expired: Vec<u8> = self
            .pending
            .iter()
            .filter(|(_, &since)| now.saturating_duration_since(since) >= timeout)
            .map(|(&seq, _)| seq)
            .collect();
        for seq in &expired {
            self.pending.remove(seq);
            self.resolved.insert(*seq, now);
        }
        self.resolved
            .retain(|_, &mut at| now.saturating_duration_since(at) < timeout);
        expired.len() as u64 + std::mem::take(&mut self.overrun)
    }

    fn advance(&mut self, seq: u8) {
        self.last = Some(seq);
        self.resolved.remove(&seq);
        if self.pending.remove(&seq).is_some() {
            self.overrun += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SequenceTracker {
        SequenceTracker::new(50, Duration::from_secs(3))
    }

    #[test]
    fn test_in_order_and_wraparound() {
        let mut t = tracker();
        let now = Instant::now();
        assert_eq!(t.observe(253, now), SequenceOutcome::First);
        for seq in [254, 255, 0, 1] {
            assert_eq!(t.observe(seq, now), SequenceOutcome::InOrder);
        }
        assert_eq!(t.pending_len(), 0);
        assert_eq!(t.last(), Some(1));
    }

    #[test]
    fn test_gap_then_late_arrival() {
        let mut t = tracker();
        let now = Instant::now();
        t.observe(1, now);
        t.observe(2, now);
        t.observe(3, now);
        assert_eq!(t.observe(50, now), SequenceOutcome::Gap { missing: 46 });
        assert_eq!(t.pending_len(), 46);
        assert_eq!(t.observe(4, now), SequenceOutcome::BadOrder);
        assert_eq!(t.last(), Some(50));
        assert!(!t.is_pending(4));

        // 5..=49 never arrive
        assert_eq!(t.purge(now + Duration::from_millis(2999)), 0);
        assert_eq!(t.purge(now + Duration::from_secs(3)), 45);
        assert_eq!(t.pending_len(), 0);
    }

    #[test]
    fn test_purged_number_not_counted_twice() {
        let mut t = tracker();
        let start = Instant::now();
        t.observe(10, start);
        t.observe(12, start);
        assert!(t.is_pending(11));

        let later = start + Duration::from_secs(3);
        assert_eq!(t.purge(later), 1);
        assert_eq!(t.purge(later), 0);

        // A straggler after the purge is a duplicate, not bad order
        assert_eq!(t.observe(11, later), SequenceOutcome::Duplicate);
        assert_eq!(t.purge(later + Duration::from_secs(10)), 0);
        assert_eq!(t.last(), Some(12));
    }

    #[test]
    fn test_matched_number_repeated_is_duplicate() {
        let mut t = tracker();
        let now = Instant::now();
        t.observe(1, now);
        t.observe(3, now);
        assert_eq!(t.observe(2, now), SequenceOutcome::BadOrder);
        assert_eq!(t.observe(2, now), SequenceOutcome::Duplicate);
        assert_eq!(t.observe(3, now), SequenceOutcome::Duplicate);
        assert_eq!(t.observe(4, now), SequenceOutcome::InOrder);
    }

    #[test]
    fn test_large_jump_is_forward_progress() {
        let mut t = tracker();
        let now = Instant::now();
        t.observe(0, now);
        assert_eq!(t.observe(100, now), SequenceOutcome::Ambiguous);
        assert_eq!(t.last(), Some(100));
        assert_eq!(t.pending_len(), 0);
        assert_eq!(t.observe(101, now), SequenceOutcome::InOrder);
    }

    #[test]
    fn test_gap_across_wraparound() {
        let mut t = tracker();
        let now = Instant::now();
        t.observe(254, now);
        assert_eq!(t.observe(2, now), SequenceOutcome::Gap { missing: 3 });
        assert!(t.is_pending(255));
        assert!(t.is_pending(0));
        assert!(t.is_pending(1));
        assert_eq!(t.observe(0, now), SequenceOutcome::BadOrder);
    }

    #[test]
    fn test_stale_lap_entries_are_overwritten() {
        let mut t = SequenceTracker::new(200, Duration::from_secs(3));
        let now = Instant::now();
        t.observe(0, now);
        t.observe(2, now); // 1 pending
        t.observe(150, now);
        t.observe(255, now);
        // The next lap reaches 1 and 3 again before their entries aged out
        assert_eq!(t.observe(3, now), SequenceOutcome::Gap { missing: 3 });
        assert!(t.is_pending(1));
        assert!(!t.is_pending(3));
        assert_eq!(t.purge(now), 2);
        assert_eq!(t.purge(now), 0);
    }

    #[test]
    fn test_outcome_breaks_streak() {
        assert!(SequenceOutcome::Ambiguous.breaks_streak());
        assert!(SequenceOutcome::Gap { missing: 1 }.breaks_streak());
        assert!(!SequenceOutcome::InOrder.breaks_streak());
        assert!(!SequenceOutcome::BadOrder.breaks_streak());
    }
}
