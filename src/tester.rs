//! Runs one monitor per configured link and writes their reports.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::{Error, MetricSnapshot, MonitorConfig, Result};
use crate::monitor::{start_monitor, LinkReport, MonitorHandle};
use crate::report::LinkReporter;
use crate::util::file_stamp;

/// Snapshots buffered between a monitor and its report writer
const SNAPSHOT_QUEUE: usize = 64;

/// Configuration for a whole test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesterConfig {
    /// One connection string per link
    pub endpoints: Vec<String>,
    /// Settings shared by every link; its `endpoint` is replaced per link
    pub monitor: MonitorConfig,
    /// Stop after this long, or run until interrupted
    #[serde(serialize_with = "crate::core::serde::serialize_opt_duration")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_opt_duration")]
    pub duration: Option<Duration>,
    /// Where metric and histogram files go
    pub output_dir: PathBuf,
}

impl TesterConfig {
    /// Per-link monitor configurations
    pub fn links(&self) -> Vec<MonitorConfig> {
        self.endpoints
            .iter()
            .map(|endpoint| MonitorConfig {
                endpoint: endpoint.clone(),
                ..self.monitor.clone()
            })
            .collect()
    }
}

/// A started link and the task writing its reports
struct RunningLink {
    monitor: MonitorHandle,
    reporter: JoinHandle<LinkReporter>,
}

/// Coordinates the links of one test run
pub struct LinkTester {
    config: TesterConfig,
}

impl LinkTester {
    pub fn new(config: TesterConfig) -> Self {
        LinkTester { config }
    }

    /// Runs until the configured duration elapses, Ctrl-C, or every link fails
    pub async fn run(self) -> Result<Vec<LinkReport>> {
        self.run_until(ctrl_c()).await
    }

    /// Like `run`, with `interrupt` standing in for Ctrl-C
    pub async fn run_until<F>(self, interrupt: F) -> Result<Vec<LinkReport>>
    where
        F: Future<Output = ()>,
    {
        if self.config.endpoints.is_empty() {
            return Err(Error::config("no connections given"));
        }
        std::fs::create_dir_all(&self.config.output_dir)?;
        let stamp = file_stamp(Local::now());

        let starts = self.config.links().into_iter().map(|config| async move {
            let endpoint = config.endpoint.clone();
            let (tx, rx) = mpsc::channel(SNAPSHOT_QUEUE);
            let started = start_monitor(config, tx).await;
            (endpoint, started.map(|handle| (handle, rx)))
        });

        let mut links = Vec::new();
        for (endpoint, started) in join_all(starts).await {
            match started {
                Ok((monitor, snapshots)) => {
                    match LinkReporter::create(&self.config.output_dir, &endpoint, &stamp) {
                        Ok(reporter) => links.push(RunningLink {
                            monitor,
                            reporter: tokio::spawn(report_snapshots(reporter, snapshots)),
                        }),
                        Err(e) => {
                            error!(link = %endpoint, "cannot write reports: {}", e);
                            let _ = monitor.stop().await;
                        }
                    }
                }
                Err(e) => error!(link = %endpoint, "failed to start: {}", e),
            }
        }
        if links.is_empty() {
            return Err(Error::transport("no link could be started"));
        }
        info!("monitoring {} of {} links", links.len(), self.config.endpoints.len());

        let all_ended = join_all(links.iter().map(|link| link.monitor.finished()));
        let deadline = async {
            match self.config.duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = deadline => info!("test duration elapsed"),
            _ = interrupt => info!("interrupted, stopping links"),
            _ = all_ended => warn!("every link has stopped"),
        }

        let (monitors, reporters): (Vec<_>, Vec<_>) = links
            .into_iter()
            .map(|link| (link.monitor, link.reporter))
            .unzip();
        let stopped = join_all(monitors.into_iter().map(|monitor| monitor.stop())).await;

        let mut reports = Vec::new();
        for (stopped, reporter) in stopped.into_iter().zip(reporters) {
            let report = match stopped {
                Ok(report) => report,
                Err(e) => {
                    error!("{}", e);
                    continue;
                }
            };
            match reporter.await {
                Ok(reporter) => {
                    if let Err(e) = reporter.finish(&report.summary) {
                        error!(link = %report.name, "failed to write histogram: {}", e);
                    }
                }
                Err(e) => error!(link = %report.name, "report writer failed: {}", e),
            }
            if let Some(failure) = &report.failure {
                warn!(link = %report.name, "link ended early: {}", failure);
            }
            reports.push(report);
        }
        Ok(reports)
    }
}

/// Drains one link's snapshots into its reporter until the monitor stops
async fn report_snapshots(
    mut reporter: LinkReporter,
    mut snapshots: mpsc::Receiver<MetricSnapshot>,
) -> LinkReporter {
    while let Some(snapshot) = snapshots.recv().await {
        reporter.record(&snapshot);
    }
    reporter
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
