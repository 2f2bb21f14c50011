use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use futures::future::BoxFuture;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::connection::{deliver, Transport, TransportIo};
use crate::core::{Error, Result};
use crate::protocol::{Decoded, FrameCodec, MAX_DATAGRAM_SIZE};

/// Datagram transport in client or server mode
pub struct UdpTransport {
    host: String,
    port: u16,
    server: bool,
    codec: FrameCodec,
}

impl UdpTransport {
    /// Sends to a fixed `host:port`
    pub fn client(host: impl Into<String>, port: u16, codec: FrameCodec) -> Self {
        UdpTransport {
            host: host.into(),
            port,
            server: false,
            codec,
        }
    }

    /// Binds `addr:port` and answers whoever speaks first
    pub fn server(bind: impl Into<String>, port: u16, codec: FrameCodec) -> Self {
        UdpTransport {
            host: bind.into(),
            port,
            server: true,
            codec,
        }
    }

    async fn open_socket(&self) -> Result<UdpSocket> {
        let addr = resolve(&self.host, self.port).await?;
        if self.server {
            bind_reusable(addr)
        } else {
            let local: SocketAddr = if addr.is_ipv4() {
                ([0, 0, 0, 0], 0).into()
            } else {
                ([0u16; 8], 0).into()
            };
            let socket = UdpSocket::bind(local).await?;
            socket.connect(addr).await?;
            Ok(socket)
        }
    }

    async fn serve(mut self, io: TransportIo) -> Result<()> {
        let socket = self.open_socket().await?;
        let name = self.describe();
        info!(transport = %name, local = ?socket.local_addr().ok(), "udp socket ready");

        let TransportIo {
            events,
            mut outbound,
            shutdown,
        } = io;
        let mut peer: Option<SocketAddr> = None;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return Ok(()),

                out = outbound.recv() => {
                    let Some(bytes) = out else { return Ok(()) };
                    if !self.server {
                        socket.send(&bytes).await?;
                    } else if let Some(addr) = peer {
                        socket.send_to(&bytes, addr).await?;
                    } else {
                        debug!(transport = %name, "no peer yet, dropping {} bytes", bytes.len());
                    }
                }

                received = socket.recv_from(&mut buf) => {
                    let (n, from) = match received {
                        Ok(r) => r,
                        // ICMP unreachable on a connected socket: the peer is not up yet
                        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                            trace!(transport = %name, "peer unreachable");
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };
                    if self.server && peer.is_none() {
                        info!(transport = %name, peer = %from, "latched reply address");
                        peer = Some(from);
                    }
                    if !deliver_datagram(&mut self.codec, &buf[..n], &events, &shutdown).await? {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl Transport for UdpTransport {
    fn describe(&self) -> String {
        let kind = if self.server { "udpin" } else { "udpout" };
        format!("{}:{}:{}", kind, self.host, self.port)
    }

    fn is_server(&self) -> bool {
        self.server
    }

    fn run(self: Box<Self>, io: TransportIo) -> BoxFuture<'static, Result<()>> {
        Box::pin(self.serve(io))
    }
}

/// Decodes every frame in one datagram.
///
/// A datagram is self-contained, so a trailing partial frame is reported as
/// corrupt instead of being kept for the next read. Returns `false` once the
/// receiving side is gone or shutdown has begun.
pub(crate) async fn deliver_datagram(
    codec: &mut FrameCodec,
    datagram: &[u8],
    events: &mpsc::Sender<Decoded>,
    shutdown: &CancellationToken,
) -> Result<bool> {
    let mut data = BytesMut::from(datagram);
    while let Some(item) = codec.decode_eof(&mut data)? {
        if !deliver(events, shutdown, item).await {
            return Ok(false);
        }
    }
    Ok(true)
}

pub(crate) async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| Error::config(format!("could not resolve {}:{}", host, port)))
}

fn bind_reusable(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connection::TransportHandle;
    use crate::protocol::{Frame, Heartbeat, Message, RejectReason, Version};
    use std::time::Duration;

    fn heartbeat(seq: u8) -> bytes::Bytes {
        let message = Message::Heartbeat(Heartbeat::ground_station());
        Frame::new(Version::V2, seq, 1, 1, message.id(), &message.payload())
            .unwrap()
            .to_bytes()
    }

    #[tokio::test]
    async fn test_datagram_with_several_frames() {
        let mut datagram = heartbeat(1).to_vec();
        datagram.extend_from_slice(&heartbeat(2));
        datagram.extend_from_slice(&heartbeat(3)[..5]);

        let (tx, mut rx) = mpsc::channel(8);
        let mut codec = FrameCodec::new(255, 0);
        assert!(deliver_datagram(&mut codec, &datagram, &tx, &CancellationToken::new()).await.unwrap());
        drop(tx);

        let mut seqs = Vec::new();
        let mut corrupt = 0;
        while let Some(item) = rx.recv().await {
            match item {
                Decoded::Frame { frame, .. } => seqs.push(frame.seq),
                Decoded::Corrupt { len, reason } => {
                    assert_eq!(reason, RejectReason::Truncated);
                    corrupt += len;
                }
            }
        }
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(corrupt, 5);
    }

    #[tokio::test]
    async fn test_server_latches_first_sender() {
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let transport = UdpTransport::server("127.0.0.1", port, FrameCodec::new(255, 0));
        let (handle, mut events) = TransportHandle::start(Box::new(transport));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(&heartbeat(7), ("127.0.0.1", port)).await.unwrap();

        match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Some(Decoded::Frame { frame, len })) => {
                assert_eq!(frame.seq, 7);
                assert_eq!(len, heartbeat(7).len());
            }
            other => panic!("unexpected {:?}", other),
        }

        handle.send(heartbeat(8)).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], &heartbeat(8)[..]);

        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_with_unread_events() {
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let transport = UdpTransport::server("127.0.0.1", port, FrameCodec::new(255, 0));
        let (handle, _events) = TransportHandle::start(Box::new(transport));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for n in 0..300u32 {
            peer.send_to(&heartbeat(n as u8), ("127.0.0.1", port)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let closed = tokio::time::timeout(Duration::from_secs(3), handle.close()).await;
        assert!(matches!(closed, Ok(Ok(()))));
    }
}
