use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::{MetricSnapshot, Result};

const HEADER: &str = "elapsed_seconds,received_packets,dropped_packets,latency_ms,bad_order_packets,bytes,corrupt_bytes,link_outage";

/// Per-second metrics CSV for one link, flushed after every row
pub struct MetricsWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl MetricsWriter {
    /// Creates `<dir>/<stem>_metrics_<stamp>.csv` and writes the header
    pub fn create(dir: &Path, stem: &str, stamp: &str) -> Result<Self> {
        let path = dir.join(format!("{}_metrics_{}.csv", stem, stamp));
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "{}", HEADER)?;
        writer.flush()?;
        Ok(MetricsWriter { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row; an absent latency is an empty cell
    pub fn write(&mut self, snapshot: &MetricSnapshot) -> Result<()> {
        let latency = snapshot
            .latency_ms
            .map(|ms| format!("{}", ms.round() as u64))
            .unwrap_or_default();
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{},{}",
            snapshot.elapsed_seconds,
            snapshot.received,
            snapshot.dropped,
            latency,
            snapshot.bad_order,
            snapshot.bytes,
            snapshot.corrupt_bytes,
            snapshot.outage as u8
        )?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(elapsed_seconds: u64, latency_ms: Option<f64>, outage: bool) -> MetricSnapshot {
        MetricSnapshot {
            elapsed_seconds,
            received: 40,
            dropped: 2,
            bad_order: 1,
            bytes: 1800,
            corrupt_bytes: 7,
            latency_ms,
            latency_samples_ms: latency_ms.into_iter().collect(),
            outage,
        }
    }

    #[test]
    fn test_rows_follow_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = MetricsWriter::create(dir.path(), "udpin_0_0_0_0_14550", "20240101_120000").unwrap();
        assert_eq!(
            writer.path().file_name().unwrap(),
            "udpin_0_0_0_0_14550_metrics_20240101_120000.csv"
        );
        writer.write(&snapshot(1, Some(35.4), false)).unwrap();
        writer.write(&snapshot(2, None, true)).unwrap();

        let content = std::fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "1,40,2,35,1,1800,7,0");
        assert_eq!(lines[2], "2,40,2,,1,1800,7,1");
        assert_eq!(lines.len(), 3);
    }
}
