//! Per-link monitoring
//!
//! `LinkMonitor` holds the sequence, outage and latency state of one link and
//! turns decoded frames into per-second metrics. The async driver in `task`
//! feeds it from a transport and runs its timers.

mod latency;
mod outage;
mod sequence;
mod task;

pub use self::latency::{median, ProbeTracker};
pub use self::outage::{OutageDetector, Transition};
pub use self::sequence::{SequenceOutcome, SequenceTracker};
pub use self::task::{start_monitor, start_with_transport, LinkReport, MonitorHandle};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{LinkState, MetricSnapshot, MonitorConfig, Summary};
use crate::protocol::{Frame, Message, RejectReason, Timesync};

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    received: u64,
    dropped: u64,
    bad_order: u64,
    bytes: u64,
    corrupt_bytes: u64,
}

/// Sequence, outage and latency state of one link.
///
/// Every method takes the current time so the state machine can be driven
/// from timers or from tests without a clock of its own.
#[derive(Debug)]
pub struct LinkMonitor {
    name: String,
    target_system: u8,
    target_component: u8,
    sequence: SequenceTracker,
    outage: OutageDetector,
    probes: ProbeTracker,
    /// Reset at every tick
    second: Counters,
    /// Never reset
    totals: Counters,
    ticks: u64,
}

impl LinkMonitor {
    pub fn new(name: impl Into<String>, config: &MonitorConfig, now: Instant) -> Self {
        LinkMonitor {
            name: name.into(),
            target_system: config.target_system,
            target_component: config.target_component,
            sequence: SequenceTracker::new(config.gap_window, config.pending_timeout),
            outage: OutageDetector::new(config.outage_timeout, config.recovery_hysteresis, now),
            probes: ProbeTracker::new(config.probe_timeout),
            second: Counters::default(),
            totals: Counters::default(),
            ticks: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LinkState {
        self.outage.state()
    }

    /// Whether a frame comes from the monitored system and component
    pub fn is_target(&self, frame: &Frame) -> bool {
        frame.system_id == self.target_system && frame.component_id == self.target_component
    }

    /// Accounts one valid frame of `len` wire bytes.
    ///
    /// Frames from other senders are ignored; returns `None` for them.
    pub fn on_frame(&mut self, frame: &Frame, len: usize, now: Instant) -> Option<SequenceOutcome> {
        if !self.is_target(frame) {
            return None;
        }

        self.drop_expired(now);
        let outcome = self.sequence.observe(frame.seq, now);
        self.second.received += 1;
        self.second.bytes += len as u64;
        if outcome == SequenceOutcome::BadOrder {
            self.second.bad_order += 1;
        }

        match self.outage.on_frame(now, outcome.breaks_streak()) {
            Some(Transition::Recovered(length)) => info!(
                link = %self.name,
                "link recovered after {:.1}s outage",
                length.as_secs_f64()
            ),
            Some(Transition::Lost) | None => {}
        }

        if let Some(Message::Timesync(sync)) = Message::parse(frame) {
            if sync.is_reply() {
                if let Some(rtt) = self.probes.on_reply(sync.ts1, now) {
                    debug!(link = %self.name, rtt_ms = rtt, "probe answered");
                }
            }
        }

        Some(outcome)
    }

    /// Accounts bytes discarded by the decoder
    pub fn on_corrupt(&mut self, len: usize, reason: RejectReason) {
        debug!(link = %self.name, len, %reason, "discarded input");
        self.second.corrupt_bytes += len as u64;
    }

    /// Probe to send now, if any
    pub fn poll_probe(&mut self, now: Instant, wall_ns: i64) -> Option<Timesync> {
        self.check_outage(now);
        let ts1 = self.probes.poll(now, wall_ns)?;
        Some(Timesync::probe(ts1, self.target_system, self.target_component))
    }

    /// Closes the current second and returns its metrics
    pub fn tick(&mut self, now: Instant) -> MetricSnapshot {
        self.drop_expired(now);
        self.check_outage(now);
        self.ticks += 1;

        let second = std::mem::take(&mut self.second);
        let latency_samples_ms = self.probes.take_samples();
        self.totals.received += second.received;
        self.totals.dropped += second.dropped;
        self.totals.bad_order += second.bad_order;
        self.totals.bytes += second.bytes;
        self.totals.corrupt_bytes += second.corrupt_bytes;

        MetricSnapshot {
            elapsed_seconds: self.ticks,
            received: second.received,
            dropped: second.dropped,
            bad_order: second.bad_order,
            bytes: second.bytes,
            corrupt_bytes: second.corrupt_bytes,
            latency_ms: latency_samples_ms.last().copied(),
            latency_samples_ms,
            outage: self.outage.state().is_outage(),
        }
    }

    /// Ends monitoring and returns the cumulative figures.
    ///
    /// Counts from the unfinished second are included and an outage still
    /// in progress is closed at `now`.
    pub fn finalize(&mut self, now: Instant) -> Summary {
        let rest = std::mem::take(&mut self.second);
        let totals = Counters {
            received: self.totals.received + rest.received,
            dropped: self.totals.dropped + rest.dropped,
            bad_order: self.totals.bad_order + rest.bad_order,
            bytes: self.totals.bytes + rest.bytes,
            corrupt_bytes: self.totals.corrupt_bytes + rest.corrupt_bytes,
        };
        self.totals = totals;
        self.probes.abandon();
        let total_outage = self.outage.finalize(now);

        Summary {
            cumulative_received: totals.received,
            cumulative_dropped: totals.dropped,
            cumulative_bad_order: totals.bad_order,
            cumulative_bytes: totals.bytes,
            cumulative_corrupt_bytes: totals.corrupt_bytes,
            total_outage_seconds: total_outage.as_secs_f64(),
            outage_event_count: self.outage.outage_events(),
            elapsed_seconds: self.ticks,
            probes_sent: self.probes.sent(),
            probes_lost: self.probes.lost(),
            latency_mean_ms: self.probes.mean_ms(),
            latency_median_ms: self.probes.median_ms(),
        }
    }

    fn drop_expired(&mut self, now: Instant) {
        let dropped = self.sequence.purge(now);
        if dropped > 0 {
            debug!(link = %self.name, dropped, "pending sequence numbers expired");
            self.second.dropped += dropped;
        }
    }

    fn check_outage(&mut self, now: Instant) {
        if let Some(Transition::Lost) = self.outage.check(now) {
            warn!(link = %self.name, "link outage detected");
        }
    }
}
