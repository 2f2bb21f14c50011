use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tracing::info;

use super::connection::{deliver, Transport, TransportIo};
use super::udp::resolve;
use crate::core::{Error, Result};
use crate::protocol::FrameCodec;

/// Byte-stream transport over TCP, dialing out or serving one connection
pub struct TcpTransport {
    host: String,
    port: u16,
    server: bool,
    codec: FrameCodec,
}

impl TcpTransport {
    pub fn client(host: impl Into<String>, port: u16, codec: FrameCodec) -> Self {
        TcpTransport {
            host: host.into(),
            port,
            server: false,
            codec,
        }
    }

    pub fn server(bind: impl Into<String>, port: u16, codec: FrameCodec) -> Self {
        TcpTransport {
            host: bind.into(),
            port,
            server: true,
            codec,
        }
    }

    async fn serve(self, io: TransportIo) -> Result<()> {
        let name = self.describe();
        let addr = resolve(&self.host, self.port).await?;

        let stream = if self.server {
            let listener = TcpListener::bind(addr).await?;
            info!(transport = %name, "waiting for a connection");
            tokio::select! {
                _ = io.shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    info!(transport = %name, peer = %peer, "accepted connection");
                    stream
                }
            }
        } else {
            let stream = tokio::select! {
                _ = io.shutdown.cancelled() => return Ok(()),
                connected = TcpStream::connect(addr) => connected?,
            };
            info!(transport = %name, "connected");
            stream
        };
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        pump_stream(reader, writer, self.codec, io).await
    }
}

impl Transport for TcpTransport {
    fn describe(&self) -> String {
        let kind = if self.server { "tcpin" } else { "tcp" };
        format!("{}:{}:{}", kind, self.host, self.port)
    }

    fn is_server(&self) -> bool {
        self.server
    }

    fn run(self: Box<Self>, io: TransportIo) -> BoxFuture<'static, Result<()>> {
        Box::pin(self.serve(io))
    }
}

/// Moves bytes between a stream and the monitor.
///
/// Reads accumulate in the framed reader's buffer, so a frame split across
/// reads is completed by a later one. End of stream is a failure: the peer
/// went away while the link was being monitored.
pub(crate) async fn pump_stream<R, W>(
    reader: R,
    mut writer: W,
    codec: FrameCodec,
    io: TransportIo,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let TransportIo {
        events,
        mut outbound,
        shutdown,
    } = io;
    let mut frames = FramedRead::new(reader, codec);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            out = outbound.recv() => {
                let Some(bytes) = out else { break };
                writer.write_all(&bytes).await?;
            }

            item = frames.next() => match item {
                Some(Ok(decoded)) => {
                    if !deliver(&events, &shutdown, decoded).await {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Err(Error::transport("connection closed by peer")),
            },
        }
    }

    writer.shutdown().await.ok();
    Ok(())
}
