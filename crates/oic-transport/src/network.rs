use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::adapter::{TransportAdapter, TransportHealthSnapshot};

type Inbox = VecDeque<(String, Vec<u8>)>;

/// Shared in-process hub routing datagrams between named hosts.
///
/// Each endpoint owns one inbox; multicast reaches every other endpoint.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inboxes: Arc<Mutex<HashMap<String, Inbox>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new endpoint named `host`; an existing inbox with that
    /// name is reset.
    pub fn endpoint(&self, host: impl Into<String>) -> MemoryEndpoint {
        let host = host.into();
        if let Ok(mut inboxes) = self.inboxes.lock() {
            inboxes.insert(host.clone(), VecDeque::new());
        }
        MemoryEndpoint {
            host,
            network: self.clone(),
            drop_outbound: false,
            health: TransportHealthSnapshot::default(),
        }
    }

    /// Hosts currently attached.
    pub fn hosts(&self) -> Vec<String> {
        self.inboxes
            .lock()
            .map(|inboxes| inboxes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn detach(&self, host: &str) {
        if let Ok(mut inboxes) = self.inboxes.lock() {
            inboxes.remove(host);
        }
    }
}

/// One host attached to a `MemoryNetwork`. Dropping it detaches the host.
#[derive(Debug)]
pub struct MemoryEndpoint {
    host: String,
    network: MemoryNetwork,
    drop_outbound: bool,
    health: TransportHealthSnapshot,
}

impl MemoryEndpoint {
    /// If enabled, outbound sends are silently dropped.
    pub fn set_drop_outbound(&mut self, drop_outbound: bool) {
        self.drop_outbound = drop_outbound;
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.network.detach(&self.host);
    }
}

impl TransportAdapter for MemoryEndpoint {
    type Error = &'static str;

    fn local_host(&self) -> &str {
        &self.host
    }

    fn send(&mut self, host: &str, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.drop_outbound {
            self.health.outbound_send_err += 1;
            return Ok(());
        }
        let mut inboxes = self
            .network
            .inboxes
            .lock()
            .map_err(|_| "network lock poisoned")?;
        match inboxes.get_mut(host) {
            Some(inbox) => {
                inbox.push_back((self.host.clone(), bytes.to_vec()));
                self.health.outbound_send_ok += 1;
            }
            None => {
                // Datagram semantics: unknown hosts swallow the send.
                debug!(from = %self.host, to = %host, "memory network: unknown host");
                self.health.outbound_send_err += 1;
            }
        }
        Ok(())
    }

    fn multicast(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.drop_outbound {
            self.health.outbound_send_err += 1;
            return Ok(());
        }
        let mut inboxes = self
            .network
            .inboxes
            .lock()
            .map_err(|_| "network lock poisoned")?;
        for (host, inbox) in inboxes.iter_mut() {
            if *host != self.host {
                inbox.push_back((self.host.clone(), bytes.to_vec()));
            }
        }
        self.health.outbound_send_ok += 1;
        Ok(())
    }

    fn recv(&mut self) -> Option<(String, Vec<u8>)> {
        let mut inboxes = self.network.inboxes.lock().ok()?;
        let msg = inboxes.get_mut(&self.host)?.pop_front();
        if msg.is_some() {
            self.health.inbound_received += 1;
        }
        msg
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        self.health.clone()
    }
}
