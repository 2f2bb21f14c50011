use std::time::Duration;

use tokio::time::Instant;

use crate::core::LinkState;

/// State change reported by the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// Silence reached the timeout
    Lost,
    /// Enough consecutive frames arrived; carries the outage length
    Recovered(Duration),
}

/// Up/Outage state machine with recovery hysteresis
#[derive(Debug)]
pub struct OutageDetector {
    /// Silence that starts an outage
    timeout: Duration,
    /// Consecutive frames needed to leave an outage
    hysteresis: u32,
    state: LinkState,
    last_frame_at: Instant,
    outage_started: Option<Instant>,
    recovery_streak: u32,
    total_outage: Duration,
    outage_events: u64,
}

impl OutageDetector {
    /// Creates a detector in `Up`, counting silence from `now`
    pub fn new(timeout: Duration, hysteresis: u32, now: Instant) -> Self {
        OutageDetector {
            timeout,
            hysteresis: hysteresis.max(1),
            state: LinkState::Up,
            last_frame_at: now,
            outage_started: None,
            recovery_streak: 0,
            total_outage: Duration::ZERO,
            outage_events: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn recovery_streak(&self) -> u32 {
        self.recovery_streak
    }

    pub fn outage_events(&self) -> u64 {
        self.outage_events
    }

    /// Closed outage time, excluding an outage still in progress
    pub fn total_outage(&self) -> Duration {
        self.total_outage
    }

    /// Records a frame.
    ///
    /// `interrupted` marks a frame that followed a sequence gap; it resets
    /// the recovery streak instead of extending it. A frame after a silence
    /// of at least the timeout starts a new streak.
    pub fn on_frame(&mut self, now: Instant, interrupted: bool) -> Option<Transition> {
        let silent = now.saturating_duration_since(self.last_frame_at) >= self.timeout;
        self.last_frame_at = now;

        if self.state == LinkState::Up {
            return None;
        }
        if interrupted {
            self.recovery_streak = 0;
            return None;
        }
        if silent {
            self.recovery_streak = 0;
        }
        self.recovery_streak += 1;
        if self.recovery_streak < self.hysteresis {
            return None;
        }

        self.state = LinkState::Up;
        self.recovery_streak = 0;
        let length = self
            .outage_started
            .take()
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default();
        self.total_outage += length;
        Some(Transition::Recovered(length))
    }

    /// Checks for silence; called from the timers
    pub fn check(&mut self, now: Instant) -> Option<Transition> {
        let silent = now.saturating_duration_since(self.last_frame_at) >= self.timeout;
        match self.state {
            LinkState::Up if silent => {
                self.state = LinkState::Outage;
                self.outage_started = Some(now);
                self.outage_events += 1;
                self.recovery_streak = 0;
                Some(Transition::Lost)
            }
            LinkState::Outage if silent => {
                self.recovery_streak = 0;
                None
            }
            _ => None,
        }
    }

    /// Closes an outage still in progress and returns the total outage time.
    ///
    /// Safe to call more than once; an open outage is added exactly once.
    pub fn finalize(&mut self, now: Instant) -> Duration {
        if let Some(start) = self.outage_started.take() {
            self.total_outage += now.saturating_duration_since(start);
        }
        self.total_outage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_silence_starts_outage() {
        let start = Instant::now();
        let mut d = OutageDetector::new(TIMEOUT, 3, start);
        assert_eq!(d.check(start + ms(999)), None);
        assert_eq!(d.state(), LinkState::Up);
        assert_eq!(d.check(start + ms(1000)), Some(Transition::Lost));
        assert_eq!(d.state(), LinkState::Outage);
        assert_eq!(d.outage_events(), 1);
        // Still silent, no second event
        assert_eq!(d.check(start + ms(3000)), None);
        assert_eq!(d.outage_events(), 1);
    }

    #[test]
    fn test_recovery_needs_consecutive_frames() {
        let start = Instant::now();
        let mut d = OutageDetector::new(TIMEOUT, 3, start);
        d.check(start + ms(1000));

        assert_eq!(d.on_frame(start + ms(2000), false), None);
        assert_eq!(d.on_frame(start + ms(2100), false), None);
        assert_eq!(d.recovery_streak(), 2);
        assert_eq!(d.state(), LinkState::Outage);
        assert_eq!(
            d.on_frame(start + ms(2200), false),
            Some(Transition::Recovered(ms(1200)))
        );
        assert_eq!(d.state(), LinkState::Up);
        assert_eq!(d.total_outage(), ms(1200));
    }

    #[test]
    fn test_gap_resets_streak_without_leaving_outage() {
        let start = Instant::now();
        let mut d = OutageDetector::new(TIMEOUT, 3, start);
        d.check(start + ms(1000));
        d.on_frame(start + ms(1500), false);
        d.on_frame(start + ms(1600), false);
        assert_eq!(d.recovery_streak(), 2);

        assert_eq!(d.on_frame(start + ms(1700), true), None);
        assert_eq!(d.recovery_streak(), 0);
        assert_eq!(d.state(), LinkState::Outage);

        d.on_frame(start + ms(1800), false);
        d.on_frame(start + ms(1900), false);
        assert_eq!(
            d.on_frame(start + ms(2000), false),
            Some(Transition::Recovered(ms(1000)))
        );
    }

    #[test]
    fn test_silence_while_recovering_resets_streak() {
        let start = Instant::now();
        let mut d = OutageDetector::new(TIMEOUT, 3, start);
        d.check(start + ms(1000));
        d.on_frame(start + ms(1100), false);
        d.on_frame(start + ms(1200), false);
        assert_eq!(d.recovery_streak(), 2);
        d.check(start + ms(2200));
        assert_eq!(d.recovery_streak(), 0);
        assert_eq!(d.state(), LinkState::Outage);
    }

    #[test]
    fn test_finalize_counts_open_outage_once() {
        let start = Instant::now();
        let mut d = OutageDetector::new(TIMEOUT, 3, start);
        d.check(start + ms(1000));
        assert_eq!(d.finalize(start + ms(4500)), ms(3500));
        assert_eq!(d.finalize(start + ms(9000)), ms(3500));
    }

    #[test]
    fn test_finalize_adds_to_closed_outages() {
        let start = Instant::now();
        let mut d = OutageDetector::new(TIMEOUT, 1, start);
        d.check(start + ms(1000));
        assert_eq!(d.on_frame(start + ms(1200), false), Some(Transition::Recovered(ms(200))));
        assert_eq!(d.check(start + ms(2200)), Some(Transition::Lost));
        assert_eq!(d.outage_events(), 2);
        assert_eq!(d.finalize(start + ms(2800)), ms(800));
    }
}
