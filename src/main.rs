//! MAVLink link tester
//!
//! Measures packet loss, ordering, latency and outages on one or more
//! MAVLink links at once, writing per-second metrics and a latency
//! histogram for each.
//!
//! # Usage
//!
//! ```bash
//! # Two links to the same autopilot for five minutes
//! mavlink-link-tester udpin:0.0.0.0:14550 /dev/ttyUSB0:57600 \
//!     --system-id 1 --component-id 1 --duration 300
//!
//! # Signed link with individual stream rates
//! mavlink-link-tester tcp:192.168.1.10:5760 --system-id 1 --component-id 1 \
//!     --all-rates -1 --rate-position 10 --signing-passphrase secret
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mavlink_link_tester::{LinkTester, MonitorConfig, SigningConfig, StreamRates, TesterConfig};

/// Test MAVLink telemetry links for loss, ordering, latency and outages
#[derive(Parser, Debug)]
#[command(name = "mavlink-link-tester")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Connection strings, e.g. udpin:0.0.0.0:14550, tcp:127.0.0.1:5760, /dev/ttyUSB0:57600
    #[arg(required = true, value_name = "CONNECTION")]
    connections: Vec<String>,

    /// Target system id (autopilot)
    #[arg(long)]
    system_id: u8,

    /// Target component id (autopilot)
    #[arg(long)]
    component_id: u8,

    /// Test duration in seconds (default: run until Ctrl-C)
    #[arg(long)]
    duration: Option<u64>,

    /// Seconds without a packet before a link is in outage
    #[arg(long, default_value = "1.0")]
    outage_timeout: f64,

    /// Consecutive packets required to leave an outage
    #[arg(long, default_value = "3")]
    recovery_hysteresis: u32,

    /// Directory for metric and histogram files
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Rate in Hz for every stream; negative to use the individual rates
    #[arg(long, default_value = "4", allow_negative_numbers = true)]
    all_rates: i32,

    /// RAW_SENSORS stream rate in Hz
    #[arg(long, default_value = "4")]
    rate_raw_sensors: u16,

    /// EXTENDED_STATUS stream rate in Hz
    #[arg(long, default_value = "4")]
    rate_extended_status: u16,

    /// RC_CHANNELS stream rate in Hz
    #[arg(long, default_value = "4")]
    rate_rc_channels: u16,

    /// POSITION stream rate in Hz
    #[arg(long, default_value = "4")]
    rate_position: u16,

    /// EXTRA1 stream rate in Hz
    #[arg(long, default_value = "4")]
    rate_extra1: u16,

    /// EXTRA2 stream rate in Hz
    #[arg(long, default_value = "4")]
    rate_extra2: u16,

    /// EXTRA3 stream rate in Hz
    #[arg(long, default_value = "4")]
    rate_extra3: u16,

    /// MAVLink 2 signing passphrase, hashed with SHA-256 into the key
    #[arg(long)]
    signing_passphrase: Option<String>,

    /// Link id placed in outgoing signatures
    #[arg(long, default_value = "0")]
    signing_link_id: u8,

    /// Accept unsigned packets while signing is enabled
    #[arg(long)]
    allow_unsigned: bool,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn stream_rates(&self) -> StreamRates {
        if self.all_rates >= 0 {
            return StreamRates::uniform(self.all_rates.min(u16::MAX as i32) as u16);
        }
        StreamRates {
            raw_sensors: self.rate_raw_sensors,
            extended_status: self.rate_extended_status,
            rc_channels: self.rate_rc_channels,
            position: self.rate_position,
            extra1: self.rate_extra1,
            extra2: self.rate_extra2,
            extra3: self.rate_extra3,
        }
    }

    fn into_config(self) -> Result<TesterConfig, String> {
        if !self.outage_timeout.is_finite() || self.outage_timeout <= 0.0 {
            return Err(format!("outage timeout must be positive, got {}", self.outage_timeout));
        }

        let monitor = MonitorConfig {
            target_system: self.system_id,
            target_component: self.component_id,
            outage_timeout: Duration::from_secs_f64(self.outage_timeout),
            recovery_hysteresis: self.recovery_hysteresis,
            stream_rates: self.stream_rates(),
            signing: self.signing_passphrase.clone().map(|passphrase| SigningConfig {
                passphrase,
                link_id: self.signing_link_id,
                allow_unsigned: self.allow_unsigned,
            }),
            ..MonitorConfig::default()
        };

        Ok(TesterConfig {
            endpoints: self.connections,
            monitor,
            duration: self.duration.map(Duration::from_secs),
            output_dir: self.output_dir,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let config = args.into_config()?;
    info!(
        "MAVLink link tester v{}: {} link(s), output in {}",
        mavlink_link_tester::VERSION,
        config.endpoints.len(),
        config.output_dir.display()
    );
    if let Some(duration) = config.duration {
        info!("test duration {}s", duration.as_secs());
    }

    match LinkTester::new(config).run().await {
        Ok(reports) => {
            let failed = reports.iter().filter(|r| r.failure.is_some()).count();
            info!("finished: {} link(s) reported, {} failed", reports.len(), failed);
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            Err(e.into())
        }
    }
}
