//! MAVLink link tester: loss, ordering, latency and outage measurement
//!
//! This library decodes MAVLink streams from UDP, TCP and serial links and
//! tracks, per link, sequence gaps, late arrivals, round-trip latency and
//! outages, producing one metric record per elapsed second.
pub mod core;

pub mod monitor;
pub mod network;
pub mod protocol;
pub mod report;
pub mod tester;
mod util;

// Re-export commonly used items
pub use crate::core::{
    Error, LinkState, MetricSnapshot, MonitorConfig, Result, SigningConfig, StreamRates, Summary,
};
pub use monitor::{start_monitor, LinkMonitor, LinkReport, MonitorHandle};
pub use network::Endpoint;
pub use tester::{LinkTester, TesterConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
