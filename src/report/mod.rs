//! Report output
//!
//! Per-second CSV rows, the end-of-run latency histogram and the summary
//! logged for every link.

mod histogram;
mod metrics;

pub use self::histogram::{LatencyHistogram, BIN_WIDTH_MS, OVERFLOW_MS};
pub use self::metrics::MetricsWriter;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::{MetricSnapshot, Result, Summary};
use crate::util::{format_optional, sanitize};

/// Files and running state for one link's reports
pub struct LinkReporter {
    name: String,
    stem: String,
    stamp: String,
    dir: PathBuf,
    metrics: Option<MetricsWriter>,
    histogram: LatencyHistogram,
}

impl LinkReporter {
    /// Opens the metrics CSV for `connection` in `dir`
    pub fn create(dir: &Path, connection: &str, stamp: &str) -> Result<Self> {
        let stem = sanitize(connection);
        let metrics = MetricsWriter::create(dir, &stem, stamp)?;
        info!(link = %connection, path = %metrics.path().display(), "writing metrics");
        Ok(LinkReporter {
            name: connection.to_string(),
            stem,
            stamp: stamp.to_string(),
            dir: dir.to_path_buf(),
            metrics: Some(metrics),
            histogram: LatencyHistogram::new(),
        })
    }

    /// Logs and records one second of metrics.
    ///
    /// A failed CSV write disables the file but keeps the histogram and logs.
    pub fn record(&mut self, snapshot: &MetricSnapshot) {
        info!("{}", status_line(&self.name, snapshot));
        for &rtt in &snapshot.latency_samples_ms {
            self.histogram.add(rtt);
        }
        if let Some(metrics) = self.metrics.as_mut() {
            if let Err(e) = metrics.write(snapshot) {
                warn!(link = %self.name, "metrics file disabled: {}", e);
                self.metrics = None;
            }
        }
    }

    pub fn histogram(&self) -> &LatencyHistogram {
        &self.histogram
    }

    /// Writes the histogram and logs the summary
    pub fn finish(self, summary: &Summary) -> Result<PathBuf> {
        log_summary(&self.name, summary);
        let path = self
            .histogram
            .write(&self.dir, &self.stem, &self.stamp, summary.elapsed_seconds)?;
        info!(link = %self.name, path = %path.display(), "histogram written");
        Ok(path)
    }
}

/// One-line console status for a second of metrics
pub fn status_line(name: &str, snapshot: &MetricSnapshot) -> String {
    let latency = match snapshot.latency_ms {
        Some(ms) => format!("{:>4}ms", ms.round() as u64),
        None => "   N/A".to_string(),
    };
    let state = if snapshot.outage { "OUTAGE" } else { "OK" };
    format!(
        "[{}] {:>4}s | latency {} | pkts {:>3} | drops {:>3} | bad order {:>3} | bytes {:>5} | {}",
        name,
        snapshot.elapsed_seconds,
        latency,
        snapshot.received,
        snapshot.dropped,
        snapshot.bad_order,
        snapshot.bytes,
        state
    )
}

/// Logs the end-of-run figures for one link
pub fn log_summary(name: &str, summary: &Summary) {
    info!("[{}] Final summary:", name);
    info!("  Total packets: {}", summary.cumulative_received);
    match summary.drop_percent() {
        Some(pct) => info!("  Total drops: {} ({:.2}%)", summary.cumulative_dropped, pct),
        None => info!("  Total drops: {}", summary.cumulative_dropped),
    }
    match summary.bad_order_percent() {
        Some(pct) => info!("  Total bad order: {} ({:.2}%)", summary.cumulative_bad_order, pct),
        None => info!("  Total bad order: {}", summary.cumulative_bad_order),
    }
    info!("  Corrupt bytes: {}", summary.cumulative_corrupt_bytes);
    info!("  Mean latency: {}", format_optional(summary.latency_mean_ms, "ms"));
    info!("  Median latency: {}", format_optional(summary.latency_median_ms, "ms"));
    info!(
        "  Probes: {} sent, {} unanswered",
        summary.probes_sent, summary.probes_lost
    );
    info!(
        "  Total outage time: {:.2}s ({}) over {} events",
        summary.total_outage_seconds,
        format_optional(summary.outage_percent(), "%"),
        summary.outage_event_count
    );
}
