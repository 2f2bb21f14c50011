use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{Error, Result};
use crate::protocol::Decoded;

/// Decoded units waiting for the monitor
const EVENT_QUEUE: usize = 256;

/// Encoded frames waiting to be written
const OUTBOUND_QUEUE: usize = 32;

/// Channels a running transport works with
pub struct TransportIo {
    /// Frames and discarded spans, in arrival order
    pub events: mpsc::Sender<Decoded>,
    /// Encoded frames to write to the peer
    pub outbound: mpsc::Receiver<Bytes>,
    /// Cancelled when the owner closes the transport
    pub shutdown: CancellationToken,
}

/// A byte or datagram source that yields decoded frames.
///
/// `run` owns the I/O resources for the lifetime of the link. It returns
/// `Ok(())` when shut down or when its owner goes away, and an error when the
/// underlying connection fails.
pub trait Transport: Send + 'static {
    /// Human-readable name of the peer or device
    fn describe(&self) -> String;

    /// Whether the transport waits for the peer to speak first
    fn is_server(&self) -> bool;

    fn run(self: Box<Self>, io: TransportIo) -> BoxFuture<'static, Result<()>>;
}

/// Hands one decoded unit to the monitor.
///
/// Returns `false` once the monitor is gone or shutdown has begun; a full
/// queue never keeps the transport from seeing cancellation.
pub(crate) async fn deliver(
    events: &mpsc::Sender<Decoded>,
    shutdown: &CancellationToken,
    item: Decoded,
) -> bool {
    tokio::select! {
        biased;

        _ = shutdown.cancelled() => false,
        sent = events.send(item) => sent.is_ok(),
    }
}

/// Owner side of a started transport
pub struct TransportHandle {
    name: String,
    server: bool,
    outbound: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl TransportHandle {
    /// Spawns the transport and returns its handle and event stream
    pub fn start(transport: Box<dyn Transport>) -> (Self, mpsc::Receiver<Decoded>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let shutdown = CancellationToken::new();

        let name = transport.describe();
        let server = transport.is_server();
        let task = tokio::spawn(transport.run(TransportIo {
            events: event_tx,
            outbound: outbound_rx,
            shutdown: shutdown.clone(),
        }));

        let handle = TransportHandle {
            name,
            server,
            outbound: outbound_tx,
            shutdown,
            task,
        };
        (handle, event_rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_server(&self) -> bool {
        self.server
    }

    /// Queues encoded bytes for the peer
    pub async fn send(&self, bytes: Bytes) -> Result<()> {
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| Error::transport(format!("{} is closed", self.name)))
    }

    /// Stops the transport and reports how it ended
    pub async fn close(self) -> Result<()> {
        let TransportHandle {
            name,
            outbound,
            shutdown,
            task,
            ..
        } = self;
        drop(outbound);
        shutdown.cancel();
        let result = task
            .await
            .map_err(|e| Error::transport(format!("{} task failed: {}", name, e)))?;
        debug!(transport = %name, "closed");
        result
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport for driving a monitor from a script.

    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// One scripted step
    #[derive(Debug, Clone)]
    pub enum Step {
        Deliver(Decoded),
        Sleep(Duration),
        /// End the transport with a failure
        Fail(String),
    }

    /// Plays a script, records everything written to it, then idles until closed
    pub struct ScriptedTransport {
        pub steps: Vec<Step>,
        pub sent: Arc<Mutex<Vec<Bytes>>>,
        pub server: bool,
    }

    impl ScriptedTransport {
        pub fn new(steps: Vec<Step>) -> (Self, Arc<Mutex<Vec<Bytes>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let transport = ScriptedTransport {
                steps,
                sent: sent.clone(),
                server: false,
            };
            (transport, sent)
        }
    }

    impl Transport for ScriptedTransport {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn is_server(&self) -> bool {
            self.server
        }

        fn run(self: Box<Self>, io: TransportIo) -> BoxFuture<'static, Result<()>> {
            Box::pin(async move {
                let TransportIo {
                    events,
                    mut outbound,
                    shutdown,
                } = io;
                let sent = self.sent.clone();
                let recorder = async move {
                    while let Some(bytes) = outbound.recv().await {
                        if let Ok(mut log) = sent.lock() {
                            log.push(bytes);
                        }
                    }
                };
                let script = async move {
                    for step in self.steps {
                        match step {
                            Step::Deliver(item) => {
                                if !deliver(&events, &shutdown, item).await {
                                    return Ok(());
                                }
                            }
                            Step::Sleep(d) => tokio::time::sleep(d).await,
                            Step::Fail(reason) => return Err(Error::transport(reason)),
                        }
                    }
                    shutdown.cancelled().await;
                    Ok(())
                };
                tokio::select! {
                    result = script => result,
                    _ = recorder => Ok(()),
                }
            })
        }
    }
}
