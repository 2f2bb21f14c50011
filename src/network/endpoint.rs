use std::fmt;

use crate::core::{Error, Result};

/// Where a link connects to, parsed from a connection string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `udpout:host:port`, sends to a fixed address
    UdpClient { host: String, port: u16 },
    /// `udpin:addr:port` or `udp:addr:port`, replies to the first sender
    UdpServer { bind: String, port: u16 },
    /// `tcp:host:port`
    TcpClient { host: String, port: u16 },
    /// `tcpin:addr:port`, serves the first accepted connection
    TcpServer { bind: String, port: u16 },
    /// `/dev/ttyUSB0:57600` or `COM3:57600`
    Serial { path: String, baud: u32 },
}

impl Endpoint {
    /// Parses a connection string
    pub fn parse(connection: &str) -> Result<Self> {
        let parts: Vec<&str> = connection.split(':').collect();

        if connection.starts_with("/dev/") || connection.to_ascii_uppercase().starts_with("COM") {
            if parts.len() != 2 || parts[0].is_empty() {
                return Err(Error::config(format!(
                    "invalid serial format '{}', expected <device>:<baud>",
                    connection
                )));
            }
            let baud = parts[1].parse::<u32>().map_err(|_| {
                Error::config(format!("invalid baud rate '{}' in '{}'", parts[1], connection))
            })?;
            if baud == 0 {
                return Err(Error::config(format!("baud rate must be positive in '{}'", connection)));
            }
            return Ok(Endpoint::Serial {
                path: parts[0].to_string(),
                baud,
            });
        }

        if parts.len() != 3 {
            return Err(Error::config(format!(
                "invalid connection string '{}', expected <kind>:<host>:<port>",
                connection
            )));
        }
        let host = parts[1].to_string();
        if host.is_empty() {
            return Err(Error::config(format!("missing host in '{}'", connection)));
        }
        let port = parts[2]
            .parse::<u16>()
            .map_err(|_| Error::config(format!("invalid port '{}' in '{}'", parts[2], connection)))?;

        match parts[0] {
            "udpout" => Ok(Endpoint::UdpClient { host, port }),
            "udpin" | "udp" => Ok(Endpoint::UdpServer { bind: host, port }),
            "tcp" => Ok(Endpoint::TcpClient { host, port }),
            "tcpin" => Ok(Endpoint::TcpServer { bind: host, port }),
            other => Err(Error::config(format!(
                "unsupported connection type '{}' in '{}'",
                other, connection
            ))),
        }
    }

    /// Server endpoints learn their peer from inbound traffic
    pub fn is_server(&self) -> bool {
        matches!(self, Endpoint::UdpServer { .. } | Endpoint::TcpServer { .. })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::UdpClient { host, port } => write!(f, "udpout:{}:{}", host, port),
            Endpoint::UdpServer { bind, port } => write!(f, "udpin:{}:{}", bind, port),
            Endpoint::TcpClient { host, port } => write!(f, "tcp:{}:{}", host, port),
            Endpoint::TcpServer { bind, port } => write!(f, "tcpin:{}:{}", bind, port),
            Endpoint::Serial { path, baud } => write!(f, "{}:{}", path, baud),
        }
    }
}
