use std::io::{self, Read, Write};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use serialport::SerialPort;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{deliver, Transport, TransportIo};
use crate::core::{Error, Result};
use crate::protocol::{FrameCodec, MAX_FRAME_SIZE};

/// Read timeout of the blocking port, bounds how long shutdown waits for the reader
const READ_TIMEOUT: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 1024;

/// Serial device carrying a MAVLink byte stream
pub struct SerialTransport {
    path: String,
    baud: u32,
    codec: FrameCodec,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud: u32, codec: FrameCodec) -> Self {
        SerialTransport {
            path: path.into(),
            baud,
            codec,
        }
    }

    async fn serve(mut self, io: TransportIo) -> Result<()> {
        let name = self.describe();
        let port = serialport::new(&self.path, self.baud)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| Error::transport(format!("failed to open {}: {}", self.path, e)))?;
        let writer = port
            .try_clone()
            .map_err(|e| Error::transport(format!("failed to clone {}: {}", self.path, e)))?;
        info!(transport = %name, "serial port open");

        let TransportIo {
            events,
            outbound,
            shutdown,
        } = io;

        // Both blocking halves report into one channel; the reader stops on
        // cancellation, the writer once the outbound sender is dropped
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<io::Result<Bytes>>(64);
        let stop = CancellationToken::new();
        let reader = {
            let chunk_tx = chunk_tx.clone();
            let stop = stop.clone();
            tokio::task::spawn_blocking(move || read_port(port, chunk_tx, stop))
        };
        tokio::task::spawn_blocking(move || write_port(writer, outbound, chunk_tx));

        let mut buf = BytesMut::with_capacity(MAX_FRAME_SIZE + READ_CHUNK);
        let result = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break Ok(()),

                chunk = chunk_rx.recv() => match chunk {
                    Some(Ok(bytes)) => {
                        buf.extend_from_slice(&bytes);
                        let mut stopped = false;
                        while let Some(item) = self.codec.decode(&mut buf)? {
                            if !deliver(&events, &shutdown, item).await {
                                stopped = true;
                                break;
                            }
                        }
                        if stopped {
                            break Ok(());
                        }
                    }
                    Some(Err(e)) => break Err(Error::from(e)),
                    None => break Err(Error::transport("serial port threads exited")),
                },
            }
        };

        // The reader may be parked on a full channel
        stop.cancel();
        drop(chunk_rx);
        if let Err(e) = reader.await {
            warn!(transport = %name, "serial reader did not exit cleanly: {}", e);
        }
        debug!(transport = %name, "serial port closed");
        result
    }
}

impl Transport for SerialTransport {
    fn describe(&self) -> String {
        format!("{}:{}", self.path, self.baud)
    }

    fn is_server(&self) -> bool {
        false
    }

    fn run(self: Box<Self>, io: TransportIo) -> BoxFuture<'static, Result<()>> {
        Box::pin(self.serve(io))
    }
}

fn read_port(
    mut port: Box<dyn SerialPort>,
    chunks: mpsc::Sender<io::Result<Bytes>>,
    stop: CancellationToken,
) {
    let mut buf = [0u8; READ_CHUNK];
    while !stop.is_cancelled() {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                if chunks.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = chunks.blocking_send(Err(e));
                return;
            }
        }
    }
}

fn write_port(
    mut port: Box<dyn SerialPort>,
    mut outbound: mpsc::Receiver<Bytes>,
    errors: mpsc::Sender<io::Result<Bytes>>,
) {
    while let Some(bytes) = outbound.blocking_recv() {
        if let Err(e) = port.write_all(&bytes).and_then(|_| port.flush()) {
            let _ = errors.blocking_send(Err(e));
            return;
        }
    }
}
