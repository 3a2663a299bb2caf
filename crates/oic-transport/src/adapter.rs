use std::collections::VecDeque;
use std::fmt;

/// Coarse per-adapter transport health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHealthSnapshot {
    pub outbound_queued: u64,
    pub outbound_send_ok: u64,
    pub outbound_send_err: u64,
    pub inbound_received: u64,
    pub inbound_dropped: u64,
    pub last_error: Option<String>,
}

/// Where an outbound datagram was addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Host(String),
    Multicast,
}

/// Byte-oriented transport contract used by the OIC node runtime.
///
/// Hosts are opaque strings; a reply goes back to the host a datagram was
/// received from.
pub trait TransportAdapter {
    /// Transport-specific send error.
    type Error: fmt::Display;

    /// Address other hosts use to reach this adapter.
    fn local_host(&self) -> &str;

    /// Attempts best-effort delivery of a byte payload to one host.
    fn send(&mut self, host: &str, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Attempts best-effort delivery to every host in the multicast group.
    fn multicast(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Returns the next inbound payload and its sending host.
    fn recv(&mut self) -> Option<(String, Vec<u8>)>;

    /// Optional maximum datagram size.
    fn max_payload_hint(&self) -> Option<usize> {
        None
    }

    /// Best-effort transport health counters.
    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot::default()
    }
}

/// In-memory adapter for tests: captures outbound sends and replays queued
/// inbound traffic.
#[derive(Debug, Clone)]
pub struct InMemoryAdapter {
    host: String,
    inbound: VecDeque<(String, Vec<u8>)>,
    outbound: Vec<(Destination, Vec<u8>)>,
    drop_outbound: bool,
    send_ok: u64,
    send_err: u64,
    recv_ok: u64,
}

impl InMemoryAdapter {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            drop_outbound: false,
            send_ok: 0,
            send_err: 0,
            recv_ok: 0,
        }
    }

    /// Queues bytes as inbound traffic from `host`.
    pub fn enqueue_inbound(&mut self, host: impl Into<String>, bytes: Vec<u8>) {
        self.inbound.push_back((host.into(), bytes));
    }

    /// Drains and returns all outbound sends captured so far.
    pub fn take_outbound(&mut self) -> Vec<(Destination, Vec<u8>)> {
        std::mem::take(&mut self.outbound)
    }

    /// If enabled, outbound sends are dropped (best-effort loss simulation).
    pub fn set_drop_outbound(&mut self, drop_outbound: bool) {
        self.drop_outbound = drop_outbound;
    }

    fn capture(&mut self, destination: Destination, bytes: &[u8]) {
        if self.drop_outbound {
            self.send_err += 1;
            return;
        }
        self.outbound.push((destination, bytes.to_vec()));
        self.send_ok += 1;
    }
}

impl Default for InMemoryAdapter {
    fn default() -> Self {
        Self::new("local")
    }
}

/// Routes captured outbound messages from one in-memory adapter into
/// another adapter's inbound queue, tagged with the sender's host.
///
/// Multicast sends and sends addressed to the receiver's host are moved;
/// anything addressed elsewhere is discarded. Returns the number moved.
pub fn route_in_memory_outbound(
    from_adapter: &mut InMemoryAdapter,
    to_adapter: &mut InMemoryAdapter,
) -> usize {
    let from_host = from_adapter.host.clone();
    let mut moved = 0;
    for (destination, bytes) in from_adapter.take_outbound() {
        let deliver = match &destination {
            Destination::Multicast => true,
            Destination::Host(host) => *host == to_adapter.host,
        };
        if deliver {
            to_adapter.enqueue_inbound(from_host.clone(), bytes);
            moved += 1;
        }
    }
    moved
}

impl TransportAdapter for InMemoryAdapter {
    type Error = &'static str;

    fn local_host(&self) -> &str {
        &self.host
    }

    fn send(&mut self, host: &str, bytes: &[u8]) -> Result<(), Self::Error> {
        self.capture(Destination::Host(host.to_string()), bytes);
        Ok(())
    }

    fn multicast(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.capture(Destination::Multicast, bytes);
        Ok(())
    }

    fn recv(&mut self) -> Option<(String, Vec<u8>)> {
        let msg = self.inbound.pop_front();
        if msg.is_some() {
            self.recv_ok += 1;
        }
        msg
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot {
            outbound_queued: self.outbound.len() as u64,
            outbound_send_ok: self.send_ok,
            outbound_send_err: self.send_err,
            inbound_received: self.recv_ok,
            inbound_dropped: 0,
            last_error: None,
        }
    }
}
