use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::Result;

/// Width of one latency bin in milliseconds
pub const BIN_WIDTH_MS: u32 = 20;

/// Start of the overflow bin; everything at or above it lands there
pub const OVERFLOW_MS: u32 = 2000;

/// Latency distribution of one link
#[derive(Debug, Default, Clone)]
pub struct LatencyHistogram {
    samples: Vec<f64>,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        LatencyHistogram::default()
    }

    /// Records one round-trip time; negative values are skipped
    pub fn add(&mut self, latency_ms: f64) {
        if latency_ms >= 0.0 {
            self.samples.push(latency_ms);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `(bin start, count)` for every bin, overflow last
    pub fn bins(&self) -> Vec<(u32, u64)> {
        let regular = (OVERFLOW_MS / BIN_WIDTH_MS) as usize;
        let mut counts = vec![0u64; regular + 1];
        for &ms in &self.samples {
            let index = ((ms / BIN_WIDTH_MS as f64) as usize).min(regular);
            counts[index] += 1;
        }
        counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| (i as u32 * BIN_WIDTH_MS, count))
            .collect()
    }

    /// Writes `<dir>/<stem>_histogram_<stamp>.csv`
    pub fn write(&self, dir: &Path, stem: &str, stamp: &str, duration_seconds: u64) -> Result<PathBuf> {
        let path = dir.join(format!("{}_histogram_{}.csv", stem, stamp));
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "Total_Test_Duration_Seconds,{}", duration_seconds)?;
        writeln!(writer, "Total_Latency_Samples,{}", self.samples.len())?;
        writeln!(writer)?;
        writeln!(writer, "Latency_Bin_Start_ms,Count")?;
        for (start, count) in self.bins() {
            writeln!(writer, "{},{}", start, count)?;
        }
        writer.flush()?;
        Ok(path)
    }
}
