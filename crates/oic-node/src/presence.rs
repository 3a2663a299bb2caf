use std::collections::HashMap;

use oic_codec::message::{MessageV1, PresenceMessage};
use oic_core::query::is_valid_identifier;
use oic_core::types::{DEFAULT_PRESENCE_TTL_SECS, MAX_PRESENCE_TTL_SECS};
use oic_core::{OicError, PresenceStatus, PresenceTrigger};
use oic_transport::adapter::TransportAdapter;
use tracing::{debug, info, warn};

use crate::client::require_client;
use crate::outbound::send_message;
use crate::server::require_server;
use crate::state::{NodeEvent, NodeState, PresenceAdvertiser, PresenceSubscription, PresenceTrack};

/// Liveness change reported to a presence subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub status: PresenceStatus,
    pub nonce: u32,
    pub host: String,
}

/// 0 selects the default TTL; values above the maximum are capped.
pub fn clamp_ttl(ttl_secs: u32) -> u32 {
    match ttl_secs {
        0 => DEFAULT_PRESENCE_TTL_SECS,
        ttl => ttl.min(MAX_PRESENCE_TTL_SECS),
    }
}

fn refresh_interval_ms(ttl_secs: u32) -> u64 {
    u64::from(ttl_secs) * 1_000 / 2
}

fn multicast_presence<A: TransportAdapter>(adapter: &mut A, presence: PresenceMessage) {
    if let Err(err) = send_message(adapter, None, &MessageV1::presence(presence)) {
        warn!(error = %err, "presence announcement not sent");
    }
}

/// Starts advertising presence and announces it right away.
pub fn start_presence<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    ttl_secs: u32,
    now_ms: u64,
) -> Result<(), OicError> {
    require_server(node)?;
    let ttl_secs = clamp_ttl(ttl_secs);
    node.server.presence = Some(PresenceAdvertiser {
        ttl_secs,
        next_refresh_ms: now_ms,
    });
    info!(ttl_secs, "presence started");
    announce(node, adapter, now_ms, PresenceTrigger::Create, None);
    Ok(())
}

/// Announces a zero TTL and stops periodic refreshes.
pub fn stop_presence<A: TransportAdapter>(node: &mut NodeState, adapter: &mut A) -> Result<(), OicError> {
    require_server(node)?;
    if node.server.presence.take().is_none() {
        return Ok(());
    }
    node.server.presence_nonce = node.server.presence_nonce.wrapping_add(1);
    info!(nonce = node.server.presence_nonce, "presence stopped");
    multicast_presence(
        adapter,
        PresenceMessage {
            nonce: node.server.presence_nonce,
            ttl_secs: 0,
            resource_type: None,
            trigger: PresenceTrigger::Delete,
        },
    );
    Ok(())
}

/// Announces a change under a new nonce. No-op while presence is off.
pub(crate) fn announce<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    now_ms: u64,
    trigger: PresenceTrigger,
    resource_type: Option<String>,
) {
    let Some(advertiser) = node.server.presence.as_mut() else {
        return;
    };
    advertiser.next_refresh_ms = now_ms.saturating_add(refresh_interval_ms(advertiser.ttl_secs));
    let ttl_secs = advertiser.ttl_secs;
    node.server.presence_nonce = node.server.presence_nonce.wrapping_add(1);
    debug!(nonce = node.server.presence_nonce, ?trigger, "presence announced");
    multicast_presence(
        adapter,
        PresenceMessage {
            nonce: node.server.presence_nonce,
            ttl_secs,
            resource_type,
            trigger,
        },
    );
}

/// Re-sends the current nonce every half TTL so subscribers stay alive.
pub fn refresh_presence<A: TransportAdapter>(node: &mut NodeState, adapter: &mut A, now_ms: u64) -> bool {
    let Some(advertiser) = node.server.presence.as_mut() else {
        return false;
    };
    if advertiser.next_refresh_ms > now_ms {
        return false;
    }
    advertiser.next_refresh_ms = now_ms.saturating_add(refresh_interval_ms(advertiser.ttl_secs));
    let ttl_secs = advertiser.ttl_secs;
    multicast_presence(
        adapter,
        PresenceMessage {
            nonce: node.server.presence_nonce,
            ttl_secs,
            resource_type: None,
            trigger: PresenceTrigger::Change,
        },
    );
    true
}

/// Subscribes to announcements from `host` (any host when empty),
/// optionally only those tagged with `resource_type`.
pub fn subscribe_presence(
    node: &mut NodeState,
    host: &str,
    resource_type: Option<&str>,
) -> Result<u64, OicError> {
    require_client(node)?;
    if resource_type.is_some_and(|rt| !is_valid_identifier(rt)) {
        return Err(OicError::InvalidParam("presence resource type"));
    }
    let id = node.client.next_presence_id;
    node.client.next_presence_id += 1;
    node.client.presence.insert(
        id,
        PresenceSubscription {
            host: (!host.is_empty()).then(|| host.to_string()),
            resource_type: resource_type.map(str::to_string),
            tracks: HashMap::new(),
        },
    );
    debug!(subscription = id, host = %host, "presence subscribed");
    Ok(id)
}

pub fn unsubscribe_presence(node: &mut NodeState, subscription: u64) -> bool {
    node.client.presence.remove(&subscription).is_some()
}

/// Applies one announcement from `from` to every matching subscription.
pub fn handle_presence(node: &mut NodeState, from: &str, message: PresenceMessage, now_ms: u64) -> usize {
    let expires_ms = now_ms
        .saturating_add(u64::from(message.ttl_secs) * 1_000)
        .saturating_add(node.config.presence_grace_ms());
    let mut events = Vec::new();
    for (id, subscription) in node.client.presence.iter_mut() {
        if subscription.host.as_deref().is_some_and(|host| host != from) {
            continue;
        }
        let status = if message.ttl_secs == 0 {
            subscription.tracks.remove(from);
            PresenceStatus::Stopped
        } else {
            match subscription.tracks.get_mut(from) {
                Some(track) if message.nonce == track.nonce => {
                    track.expires_ms = expires_ms;
                    continue;
                }
                Some(track) if message.nonce < track.nonce => PresenceStatus::DoNotHandle,
                _ => {
                    subscription.tracks.insert(
                        from.to_string(),
                        PresenceTrack {
                            nonce: message.nonce,
                            expires_ms,
                        },
                    );
                    PresenceStatus::Ok
                }
            }
        };
        let filtered_out = match (&subscription.resource_type, &message.resource_type) {
            (Some(wanted), Some(announced)) => wanted != announced,
            _ => false,
        };
        if filtered_out {
            continue;
        }
        events.push(NodeEvent::Presence {
            subscription: *id,
            event: PresenceEvent {
                status,
                nonce: message.nonce,
                host: from.to_string(),
            },
        });
    }
    let delivered = events.len();
    node.events.extend(events);
    delivered
}

/// Reports TIMEOUT for servers silent past their TTL plus grace.
pub fn expire_presence(node: &mut NodeState, now_ms: u64) -> usize {
    let mut events = Vec::new();
    for (id, subscription) in node.client.presence.iter_mut() {
        subscription.tracks.retain(|host, track| {
            if track.expires_ms > now_ms {
                return true;
            }
            debug!(subscription = *id, host = %host, "presence timed out");
            events.push(NodeEvent::Presence {
                subscription: *id,
                event: PresenceEvent {
                    status: PresenceStatus::Timeout,
                    nonce: track.nonce,
                    host: host.clone(),
                },
            });
            false
        });
    }
    let expired = events.len();
    node.events.extend(events);
    expired
}
