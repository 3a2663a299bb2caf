use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use oic_core::types::{DEFAULT_PORT, MULTICAST_GROUP};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{info, warn};

use crate::adapter::{TransportAdapter, TransportHealthSnapshot};

/// Largest datagram read in one `recv`.
const RECV_BUFFER_LEN: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct UdpAdapterConfig {
    pub bind_addr: Ipv4Addr,
    pub port: u16,
    pub multicast_group: Ipv4Addr,
    /// Port multicast datagrams are sent to.
    pub multicast_port: u16,
    pub join_multicast: bool,
}

impl Default for UdpAdapterConfig {
    fn default() -> Self {
        Self {
            bind_addr: Ipv4Addr::UNSPECIFIED,
            port: DEFAULT_PORT,
            multicast_group: MULTICAST_GROUP.parse().unwrap_or(Ipv4Addr::new(224, 0, 1, 187)),
            multicast_port: DEFAULT_PORT,
            join_multicast: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum UdpAdapterError {
    #[error("bind failed: {0}")]
    Bind(io::Error),
    #[error("invalid host address: {0}")]
    InvalidHost(String),
    #[error("send failed: {0}")]
    Send(io::Error),
}

/// Non-blocking UDP adapter joined to the OIC multicast group.
///
/// Hosts are `ip:port` strings.
#[derive(Debug)]
pub struct UdpAdapter {
    socket: UdpSocket,
    local_host: String,
    multicast_addr: SocketAddr,
    buf: Vec<u8>,
    health: TransportHealthSnapshot,
}

impl UdpAdapter {
    pub fn bind(config: &UdpAdapterConfig) -> Result<Self, UdpAdapterError> {
        let socket = bind_shared(SocketAddrV4::new(config.bind_addr, config.port))
            .map_err(UdpAdapterError::Bind)?;
        if config.join_multicast {
            socket
                .join_multicast_v4(&config.multicast_group, &Ipv4Addr::UNSPECIFIED)
                .map_err(UdpAdapterError::Bind)?;
            socket.set_multicast_loop_v4(true).map_err(UdpAdapterError::Bind)?;
        }
        let local_addr = socket.local_addr().map_err(UdpAdapterError::Bind)?;
        info!(addr = %local_addr, group = %config.multicast_group, "udp adapter bound");
        Ok(Self {
            socket,
            local_host: local_addr.to_string(),
            multicast_addr: SocketAddr::V4(SocketAddrV4::new(
                config.multicast_group,
                config.multicast_port,
            )),
            buf: vec![0_u8; RECV_BUFFER_LEN],
            health: TransportHealthSnapshot::default(),
        })
    }

    fn send_to(&mut self, addr: SocketAddr, bytes: &[u8]) -> Result<(), UdpAdapterError> {
        match self.socket.send_to(bytes, addr) {
            Ok(_) => {
                self.health.outbound_send_ok += 1;
                Ok(())
            }
            Err(err) => {
                self.health.outbound_send_err += 1;
                self.health.last_error = Some(err.to_string());
                Err(UdpAdapterError::Send(err))
            }
        }
    }
}

// SO_REUSEADDR so several OIC stacks on one host can share the well-known port.
fn bind_shared(addr: SocketAddrV4) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(addr).into())?;
    Ok(socket.into())
}

impl TransportAdapter for UdpAdapter {
    type Error = UdpAdapterError;

    fn local_host(&self) -> &str {
        &self.local_host
    }

    fn send(&mut self, host: &str, bytes: &[u8]) -> Result<(), Self::Error> {
        let addr: SocketAddr = host
            .parse()
            .map_err(|_| UdpAdapterError::InvalidHost(host.to_string()))?;
        self.send_to(addr, bytes)
    }

    fn multicast(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        let addr = self.multicast_addr;
        self.send_to(addr, bytes)
    }

    fn recv(&mut self) -> Option<(String, Vec<u8>)> {
        match self.socket.recv_from(&mut self.buf) {
            Ok((len, from)) => {
                self.health.inbound_received += 1;
                Some((from.to_string(), self.buf[..len].to_vec()))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
            Err(err) => {
                warn!(error = %err, "udp recv failed");
                self.health.inbound_dropped += 1;
                self.health.last_error = Some(err.to_string());
                None
            }
        }
    }

    fn max_payload_hint(&self) -> Option<usize> {
        Some(RECV_BUFFER_LEN)
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        self.health.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::{UdpAdapter, UdpAdapterConfig, UdpAdapterError};
    use crate::adapter::TransportAdapter;

    fn loopback_config() -> UdpAdapterConfig {
        UdpAdapterConfig {
            bind_addr: Ipv4Addr::LOCALHOST,
            port: 0,
            join_multicast: false,
            ..UdpAdapterConfig::default()
        }
    }

    #[test]
    fn loopback_unicast_round_trip() {
        let mut a = UdpAdapter::bind(&loopback_config()).expect("bind a");
        let mut b = UdpAdapter::bind(&loopback_config()).expect("bind b");
        let b_host = b.local_host().to_string();

        a.send(&b_host, &[1, 2, 3]).expect("send should succeed");
        let mut received = None;
        for _ in 0..200 {
            if let Some(msg) = b.recv() {
                received = Some(msg);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (from, bytes) = received.expect("datagram should arrive");
        assert_eq!(from, a.local_host());
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn two_servers_share_a_fixed_port() {
        let ephemeral = UdpAdapter::bind(&loopback_config()).expect("bind ephemeral");
        let port = ephemeral
            .local_host()
            .rsplit(':')
            .next()
            .and_then(|port| port.parse::<u16>().ok())
            .expect("local host carries a port");
        drop(ephemeral);

        let config = UdpAdapterConfig {
            port,
            ..loopback_config()
        };
        let first = UdpAdapter::bind(&config).expect("first server should bind");
        let second = UdpAdapter::bind(&config).expect("second server should bind the same port");
        assert_eq!(first.local_host(), second.local_host());
    }

    #[test]
    fn invalid_host_is_rejected() {
        let mut a = UdpAdapter::bind(&loopback_config()).expect("bind a");
        let err = a.send("not-an-address", &[1]).expect_err("bad host should fail");
        assert!(matches!(err, UdpAdapterError::InvalidHost(_)));
    }
}
