use std::time::Duration;

use oic_core::{ModeType, QualityOfService};

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Which half of the stack this platform runs.
    pub mode: ModeType,
    /// QoS applied to outbound requests that don't pick their own.
    pub qos: QualityOfService,
    /// How often the worker drains the transport and runs timers.
    pub tick_interval: Duration,
    /// Time a unicast or multicast request waits for its first reply.
    pub request_timeout: Duration,
    /// Lifetime of a discovery query; answers arriving later are dropped.
    pub discovery_ttl: Duration,
    /// Slack added to a presence TTL before a subscriber reports timeout.
    pub presence_grace: Duration,
    /// Window in which a repeated (host, token) request is dropped.
    pub duplicate_window: Duration,
    /// First wait before a confirmable request is sent again; doubles per attempt.
    pub retransmit_interval: Duration,
    /// Re-sends of one confirmable request before it is left to time out.
    pub max_retransmits: u32,
    /// Confirmable notifications an observer may leave unacknowledged
    /// before it is dropped.
    pub max_unacked_notifications: u32,
    /// Observers accepted per resource.
    pub max_observers: usize,
    /// Seed for the device id advertised in discovery; random when unset.
    pub device_seed: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            mode: ModeType::Both,
            qos: QualityOfService::Low,
            tick_interval: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
            discovery_ttl: Duration::from_secs(5),
            presence_grace: Duration::from_secs(5),
            duplicate_window: Duration::from_secs(30),
            retransmit_interval: Duration::from_secs(2),
            max_retransmits: 4,
            max_unacked_notifications: 3,
            max_observers: usize::from(u8::MAX),
            device_seed: None,
        }
    }
}

impl PlatformConfig {
    pub fn request_timeout_ms(&self) -> u64 {
        duration_ms(self.request_timeout)
    }

    pub fn discovery_ttl_ms(&self) -> u64 {
        duration_ms(self.discovery_ttl)
    }

    pub fn presence_grace_ms(&self) -> u64 {
        duration_ms(self.presence_grace)
    }

    pub fn duplicate_window_ms(&self) -> u64 {
        duration_ms(self.duplicate_window)
    }

    /// Wait after the `attempt`-th send of a confirmable request.
    pub fn retransmit_backoff_ms(&self, attempt: u32) -> u64 {
        duration_ms(self.retransmit_interval).saturating_mul(1_u64 << attempt.min(16))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
