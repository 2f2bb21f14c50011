//! Link transports
//!
//! This module opens the UDP, TCP or serial connection behind a link and
//! turns the bytes it carries into decoded frames for the monitor.

mod connection;
mod endpoint;
mod serial;
mod tcp;
mod udp;

pub use self::connection::{Transport, TransportHandle, TransportIo};
pub use self::endpoint::Endpoint;
pub use self::serial::SerialTransport;
pub use self::tcp::TcpTransport;
pub use self::udp::UdpTransport;

#[cfg(test)]
pub(crate) use self::connection::testing;

use crate::protocol::FrameCodec;

/// Builds the transport for an endpoint, using `codec` for framing
pub fn open(endpoint: &Endpoint, codec: FrameCodec) -> Box<dyn Transport> {
    match endpoint {
        Endpoint::UdpClient { host, port } => Box::new(UdpTransport::client(host.clone(), *port, codec)),
        Endpoint::UdpServer { bind, port } => Box::new(UdpTransport::server(bind.clone(), *port, codec)),
        Endpoint::TcpClient { host, port } => Box::new(TcpTransport::client(host.clone(), *port, codec)),
        Endpoint::TcpServer { bind, port } => Box::new(TcpTransport::server(bind.clone(), *port, codec)),
        Endpoint::Serial { path, baud } => Box::new(SerialTransport::new(path.clone(), *baud, codec)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_matches_endpoint_kind() {
        for (spec, server) in [
            ("udpout:127.0.0.1:14550", false),
            ("udpin:0.0.0.0:14550", true),
            ("tcp:127.0.0.1:5760", false),
            ("tcpin:0.0.0.0:5760", true),
            ("/dev/ttyUSB0:57600", false),
        ] {
            let endpoint = Endpoint::parse(spec).unwrap();
            let transport = open(&endpoint, FrameCodec::new(255, 0));
            assert_eq!(transport.is_server(), server, "{}", spec);
            assert_eq!(transport.describe(), spec);
        }
    }
}
