use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};
use crate::network::Endpoint;
use crate::protocol::DataStream;

/// Outage state of a single link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    /// Frames are arriving within the outage timeout
    Up,
    /// No frame for at least the outage timeout, and recovery not yet confirmed
    Outage,
}

impl LinkState {
    /// Returns true while the link is in outage
    pub fn is_outage(&self) -> bool {
        matches!(self, LinkState::Outage)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Up => write!(f, "OK"),
            LinkState::Outage => write!(f, "OUTAGE"),
        }
    }
}

/// Metrics for one elapsed second of one link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Tick index, starting at 1 for the first full second
    pub elapsed_seconds: u64,
    /// Frames accepted from the target during this second
    pub received: u64,
    /// Sequence numbers given up on during this second
    pub dropped: u64,
    /// Frames that filled an earlier gap during this second
    pub bad_order: u64,
    /// Wire bytes of accepted frames
    pub bytes: u64,
    /// Bytes discarded while resynchronizing or rejected by checksum/signature
    pub corrupt_bytes: u64,
    /// Latest round-trip time completed this second, `None` if no probe completed
    pub latency_ms: Option<f64>,
    /// Every round-trip time completed this second, oldest first
    #[serde(default)]
    pub latency_samples_ms: Vec<f64>,
    /// Whether the link was in outage when the second closed
    pub outage: bool,
}

/// Cumulative end-of-run figures for one link
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub cumulative_received: u64,
    pub cumulative_dropped: u64,
    pub cumulative_bad_order: u64,
    pub cumulative_bytes: u64,
    pub cumulative_corrupt_bytes: u64,
    /// Total time spent in outage, including an outage still open at shutdown
    pub total_outage_seconds: f64,
    pub outage_event_count: u64,
    pub elapsed_seconds: u64,
    pub probes_sent: u64,
    /// Probes superseded or abandoned without a reply
    pub probes_lost: u64,
    pub latency_mean_ms: Option<f64>,
    pub latency_median_ms: Option<f64>,
}

impl Summary {
    /// Dropped packets as a percentage of received packets
    pub fn drop_percent(&self) -> Option<f64> {
        percent(self.cumulative_dropped, self.cumulative_received)
    }

    /// Bad-order packets as a percentage of received packets
    pub fn bad_order_percent(&self) -> Option<f64> {
        percent(self.cumulative_bad_order, self.cumulative_received)
    }

    /// Outage time as a percentage of the run
    pub fn outage_percent(&self) -> Option<f64> {
        if self.elapsed_seconds == 0 {
            return None;
        }
        Some(self.total_outage_seconds / self.elapsed_seconds as f64 * 100.0)
    }
}

fn percent(part: u64, whole: u64) -> Option<f64> {
    if whole == 0 {
        None
    } else {
        Some(part as f64 / whole as f64 * 100.0)
    }
}

/// Requested stream rates in Hz, 0 leaves a stream untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRates {
    pub raw_sensors: u16,
    pub extended_status: u16,
    pub rc_channels: u16,
    pub position: u16,
    pub extra1: u16,
    pub extra2: u16,
    pub extra3: u16,
}

impl StreamRates {
    /// Same rate for every stream
    pub fn uniform(rate: u16) -> Self {
        StreamRates {
            raw_sensors: rate,
            extended_status: rate,
            rc_channels: rate,
            position: rate,
            extra1: rate,
            extra2: rate,
            extra3: rate,
        }
    }

    /// Streams with a non-zero rate, in request order
    pub fn requests(&self) -> Vec<(DataStream, u16)> {
        [
            (DataStream::RawSensors, self.raw_sensors),
            (DataStream::ExtendedStatus, self.extended_status),
            (DataStream::RcChannels, self.rc_channels),
            (DataStream::Position, self.position),
            (DataStream::Extra1, self.extra1),
            (DataStream::Extra2, self.extra2),
            (DataStream::Extra3, self.extra3),
        ]
        .into_iter()
        .filter(|(_, rate)| *rate > 0)
        .collect()
    }
}

/// MAVLink 2 signing setup for one link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Hashed with SHA-256 into the secret key
    pub passphrase: String,
    /// Link id placed in outgoing signatures
    pub link_id: u8,
    /// Accept unsigned frames while signing is enabled
    #[serde(default)]
    pub allow_unsigned: bool,
}

/// Configuration for one link monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Connection string, e.g. `udpin:0.0.0.0:14550` or `/dev/ttyUSB0:57600`
    pub endpoint: String,
    pub target_system: u8,
    pub target_component: u8,
    pub source_system: u8,
    pub source_component: u8,
    /// Silence that puts the link into outage
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub outage_timeout: Duration,
    /// Consecutive frames needed to leave an outage
    pub recovery_hysteresis: u32,
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub probe_interval: Duration,
    /// Age at which an unanswered probe is abandoned
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub probe_timeout: Duration,
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub heartbeat_interval: Duration,
    /// How long startup waits for the target's first heartbeat
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub heartbeat_wait: Duration,
    /// Lifetime of a missing sequence number before it counts as dropped
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub pending_timeout: Duration,
    /// Largest forward jump still treated as a gap
    pub gap_window: u8,
    pub stream_rates: StreamRates,
    pub signing: Option<SigningConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            endpoint: format!("udpin:0.0.0.0:{}", super::DEFAULT_PORT),
            target_system: 1,
            target_component: 1,
            source_system: super::GCS_SYSTEM_ID,
            source_component: super::GCS_COMPONENT_ID,
            outage_timeout: Duration::from_secs(1),
            recovery_hysteresis: 3,
            probe_interval: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_wait: Duration::from_secs(10),
            pending_timeout: Duration::from_secs(3),
            gap_window: 50,
            stream_rates: StreamRates::default(),
            signing: None,
        }
    }
}

impl MonitorConfig {
    /// Creates a configuration for one endpoint with default thresholds
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        MonitorConfig {
            endpoint: endpoint.into(),
            ..MonitorConfig::default()
        }
    }

    /// Checks the configuration and parses the endpoint
    pub fn validate(&self) -> Result<Endpoint> {
        let endpoint = Endpoint::parse(&self.endpoint)?;

        if self.recovery_hysteresis == 0 {
            return Err(Error::config("recovery hysteresis must be at least 1"));
        }
        for (name, value) in [
            ("outage timeout", self.outage_timeout),
            ("probe interval", self.probe_interval),
            ("probe timeout", self.probe_timeout),
            ("heartbeat interval", self.heartbeat_interval),
            ("heartbeat wait", self.heartbeat_wait),
            ("pending timeout", self.pending_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::config(format!("{} must be positive", name)));
            }
        }
        if self.gap_window == 0 || self.gap_window == u8::MAX {
            return Err(Error::config("gap window must be between 1 and 254"));
        }
        if let Some(signing) = &self.signing {
            if signing.passphrase.is_empty() {
                return Err(Error::config("signing passphrase must not be empty"));
            }
        }

        Ok(endpoint)
    }
}
