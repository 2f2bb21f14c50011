use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::LinkMonitor;
use crate::core::{Error, MetricSnapshot, MonitorConfig, Result, Summary};
use crate::network::{self, Transport, TransportHandle};
use crate::protocol::message::HEARTBEAT_ID;
use crate::protocol::{Decoded, FrameCodec, Heartbeat, Message, RequestDataStream};
use crate::util::unix_nanos;

const TICK: Duration = Duration::from_secs(1);

/// How a link's monitoring ended
#[derive(Debug, Clone)]
pub struct LinkReport {
    pub name: String,
    pub summary: Summary,
    /// Why the link stopped on its own, `None` after a requested stop
    pub failure: Option<String>,
}

/// Owner side of a running link monitor
pub struct MonitorHandle {
    name: String,
    shutdown: CancellationToken,
    done: CancellationToken,
    task: JoinHandle<LinkReport>,
}

impl MonitorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the monitor has already stopped, e.g. after a transport failure
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once the monitor stops for any reason
    pub async fn finished(&self) {
        self.done.cancelled().await
    }

    /// Stops the link and waits for its final report.
    ///
    /// Timers are gone, the transport is closed and any open outage is
    /// counted by the time this returns.
    pub async fn stop(self) -> Result<LinkReport> {
        self.shutdown.cancel();
        self.task
            .await
            .map_err(|e| Error::invalid_state(format!("{} monitor task failed: {}", self.name, e)))
    }
}

/// Opens the configured endpoint and starts monitoring it.
///
/// Returns once the target's first heartbeat has been seen and stream rates
/// have been requested. One snapshot per elapsed second goes to `snapshots`.
pub async fn start_monitor(
    config: MonitorConfig,
    snapshots: mpsc::Sender<MetricSnapshot>,
) -> Result<MonitorHandle> {
    let endpoint = config.validate()?;
    let codec = codec_for(&config);
    let transport = network::open(&endpoint, codec);
    start_with_transport(config, transport, snapshots).await
}

/// Starts monitoring over an already built transport
pub async fn start_with_transport(
    config: MonitorConfig,
    transport: Box<dyn Transport>,
    snapshots: mpsc::Sender<MetricSnapshot>,
) -> Result<MonitorHandle> {
    config.validate()?;
    let name = config.endpoint.clone();
    let mut encoder = codec_for(&config);
    let (transport, mut events) = TransportHandle::start(transport);
    info!(link = %name, transport = %transport.name(), "waiting for heartbeat");

    let startup = async {
        await_heartbeat(&config, &transport, &mut events, &mut encoder).await?;
        request_streams(&config, &transport, &mut encoder).await
    };
    if let Err(e) = startup.await {
        drop(events);
        // A transport that died explains the failure better than the timeout
        return Err(match transport.close().await {
            Err(closed) => closed,
            Ok(()) => e,
        });
    }
    info!(link = %name, "heartbeat received, monitoring");

    let shutdown = CancellationToken::new();
    let done = CancellationToken::new();
    let link = LinkTask {
        name: name.clone(),
        config,
        transport,
        events,
        encoder,
        snapshots,
        shutdown: shutdown.clone(),
        done: done.clone(),
    };
    let task = tokio::spawn(link.run());

    Ok(MonitorHandle {
        name,
        shutdown,
        done,
        task,
    })
}

fn codec_for(config: &MonitorConfig) -> FrameCodec {
    FrameCodec::new(config.source_system, config.source_component)
        .with_signing(config.signing.as_ref())
}

/// Waits for a HEARTBEAT from the target.
///
/// Client transports announce themselves while waiting; server transports
/// cannot reply before the peer has spoken.
async fn await_heartbeat(
    config: &MonitorConfig,
    transport: &TransportHandle,
    events: &mut mpsc::Receiver<Decoded>,
    encoder: &mut FrameCodec,
) -> Result<()> {
    let deadline = Instant::now() + config.heartbeat_wait;
    let announce = !transport.is_server();
    let mut beats = interval(config.heartbeat_interval);
    beats.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => {
                return Err(Error::timeout(format!(
                    "no heartbeat from system {} component {} within {:.1}s",
                    config.target_system,
                    config.target_component,
                    config.heartbeat_wait.as_secs_f64()
                )));
            }
            _ = beats.tick(), if announce => {
                let bytes = encoder.encode_message(&Message::Heartbeat(Heartbeat::ground_station()))?;
                transport.send(bytes).await?;
            }
            event = events.recv() => match event {
                Some(Decoded::Frame { frame, .. }) => {
                    if frame.message_id == HEARTBEAT_ID
                        && frame.system_id == config.target_system
                        && frame.component_id == config.target_component
                    {
                        return Ok(());
                    }
                }
                Some(Decoded::Corrupt { .. }) => {}
                None => return Err(Error::transport("transport closed before the first heartbeat")),
            },
        }
    }
}

async fn request_streams(
    config: &MonitorConfig,
    transport: &TransportHandle,
    encoder: &mut FrameCodec,
) -> Result<()> {
    for (stream, rate_hz) in config.stream_rates.requests() {
        let request = Message::RequestDataStream(RequestDataStream {
            target_system: config.target_system,
            target_component: config.target_component,
            stream,
            rate_hz,
            start: true,
        });
        transport.send(encoder.encode_message(&request)?).await?;
        debug!(link = %config.endpoint, stream = stream.name(), rate_hz, "requested stream");
    }
    Ok(())
}

/// Everything one running link owns
struct LinkTask {
    name: String,
    config: MonitorConfig,
    transport: TransportHandle,
    events: mpsc::Receiver<Decoded>,
    encoder: FrameCodec,
    snapshots: mpsc::Sender<MetricSnapshot>,
    shutdown: CancellationToken,
    done: CancellationToken,
}

impl LinkTask {
    async fn run(mut self) -> LinkReport {
        let _done = self.done.clone().drop_guard();
        let start = Instant::now();
        let mut monitor = LinkMonitor::new(self.name.clone(), &self.config, start);

        let mut ticks = interval_at(start + TICK, TICK);
        let mut probes = interval(self.config.probe_interval);
        probes.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeats = interval(self.config.heartbeat_interval);
        heartbeats.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let failure = loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break None,

                _ = ticks.tick() => {
                    let snapshot = monitor.tick(Instant::now());
                    tokio::select! {
                        biased;

                        _ = self.shutdown.cancelled() => break None,
                        sent = self.snapshots.send(snapshot) => {
                            if sent.is_err() {
                                debug!(link = %self.name, "snapshot receiver gone");
                            }
                        }
                    }
                }

                _ = probes.tick() => {
                    if let Some(probe) = monitor.poll_probe(Instant::now(), unix_nanos()) {
                        if let Err(e) = self.send(&Message::Timesync(probe)).await {
                            break Some(e.to_string());
                        }
                    }
                }

                _ = heartbeats.tick() => {
                    if let Err(e) = self.send(&Message::Heartbeat(Heartbeat::ground_station())).await {
                        break Some(e.to_string());
                    }
                }

                event = self.events.recv() => match event {
                    Some(Decoded::Frame { frame, len }) => {
                        monitor.on_frame(&frame, len, Instant::now());
                    }
                    Some(Decoded::Corrupt { len, reason }) => monitor.on_corrupt(len, reason),
                    None => break Some("transport stopped".to_string()),
                },
            }
        };

        let stopped_at = Instant::now();
        drop(self.events);
        let failure = match self.transport.close().await {
            Err(e) => Some(e.to_string()),
            Ok(()) => failure,
        };
        let summary = monitor.finalize(stopped_at);

        match &failure {
            Some(reason) => error!(link = %self.name, "link failed: {}", reason),
            None => info!(link = %self.name, "link stopped"),
        }
        LinkReport {
            name: self.name,
            summary,
            failure,
        }
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        let bytes = self.encoder.encode_message(message)?;
        self.transport.send(bytes).await
    }
}
