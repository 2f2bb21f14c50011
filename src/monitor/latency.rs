use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct OutstandingProbe {
    /// Identifier echoed back by the responder
    ts1: i64,
    sent_at: Instant,
}

/// Round-trip probing with at most one probe in flight
#[derive(Debug)]
pub struct ProbeTracker {
    /// Age at which an unanswered probe is given up
    timeout: Duration,
    outstanding: Option<OutstandingProbe>,
    last_ts1: i64,
    /// RTTs completed in the current second
    second: Vec<f64>,
    rtts: Vec<f64>,
    sent: u64,
    lost: u64,
}

impl ProbeTracker {
    pub fn new(timeout: Duration) -> Self {
        ProbeTracker {
            timeout,
            outstanding: None,
            last_ts1: 0,
            second: Vec::new(),
            rtts: Vec::new(),
            sent: 0,
            lost: 0,
        }
    }

    /// Decides whether to send a probe now.
    ///
    /// Returns the `ts1` to put in the probe, derived from `wall_ns` and kept
    /// strictly increasing. A probe older than the timeout is discarded
    /// unmatched and replaced.
    pub fn poll(&mut self, now: Instant, wall_ns: i64) -> Option<i64> {
        if let Some(probe) = self.outstanding {
            if now.saturating_duration_since(probe.sent_at) < self.timeout {
                return None;
            }
            self.lost += 1;
        }

        let ts1 = wall_ns.max(self.last_ts1.saturating_add(1));
        self.last_ts1 = ts1;
        self.outstanding = Some(OutstandingProbe { ts1, sent_at: now });
        self.sent += 1;
        Some(ts1)
    }

    /// Matches a reply by its echoed `ts1`, returning the RTT in milliseconds
    pub fn on_reply(&mut self, ts1: i64, now: Instant) -> Option<f64> {
        let probe = self.outstanding.filter(|p| p.ts1 == ts1)?;
        self.outstanding = None;
        let rtt = now.saturating_duration_since(probe.sent_at).as_secs_f64() * 1000.0;
        self.second.push(rtt);
        self.rtts.push(rtt);
        Some(rtt)
    }

    /// Takes the RTTs completed this second, oldest first
    pub fn take_samples(&mut self) -> Vec<f64> {
        std::mem::take(&mut self.second)
    }

    pub fn has_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Probes replaced or abandoned without a reply
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Gives up on the probe in flight, if any
    pub fn abandon(&mut self) {
        if self.outstanding.take().is_some() {
            self.lost += 1;
        }
    }

    pub fn mean_ms(&self) -> Option<f64> {
        if self.rtts.is_empty() {
            return None;
        }
        Some(self.rtts.iter().sum::<f64>() / self.rtts.len() as f64)
    }

    pub fn median_ms(&self) -> Option<f64> {
        median(&self.rtts)
    }
}

/// Median of a set of samples, averaging the middle pair for even counts
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
