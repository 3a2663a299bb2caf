use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use oic_codec::message::{MessageV1, ResponseMessage};
use oic_core::{
    ConnectivityType, ObservationId, ObserveAction, QualityOfService, Representation,
    ResourceProperty, Token,
};

use crate::client::{ObserveNotification, RemoteResource, Reply, RequestError};
use crate::config::PlatformConfig;
use crate::handler::EntityHandler;
use crate::presence::PresenceEvent;

/// Opaque id of a resource registered on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u64);

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One remote observer of a local resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observer {
    pub id: ObservationId,
    pub host: String,
    /// Token of the registering request; notifications reuse it.
    pub token: Token,
    pub qos: QualityOfService,
    /// Confirmable notifications sent since the last ack.
    pub unacked: u32,
}

pub struct ResourceEntry {
    pub uri: String,
    pub resource_types: Vec<String>,
    pub interfaces: Vec<String>,
    pub properties: ResourceProperty,
    pub observers: Vec<Observer>,
    /// Last observe sequence number issued for this resource.
    pub sequence: u32,
    pub handler: EntityHandler,
}

impl fmt::Debug for ResourceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceEntry")
            .field("uri", &self.uri)
            .field("resource_types", &self.resource_types)
            .field("interfaces", &self.interfaces)
            .field("properties", &self.properties)
            .field("observers", &self.observers)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Key under which an answered request is remembered for duplicate drops.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnsweredRequest {
    pub host: String,
    pub token: Token,
    pub observe: Option<ObserveAction>,
}

/// Duplicate window of one answered request. Confirmable requests keep
/// their response so a retransmission gets it again.
#[derive(Debug, Clone, PartialEq)]
pub struct AnsweredEntry {
    pub closes_ms: u64,
    pub response: Option<ResponseMessage>,
}

/// Local presence advertisement state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceAdvertiser {
    pub ttl_secs: u32,
    /// Next periodic re-announcement.
    pub next_refresh_ms: u64,
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub resources: BTreeMap<ResourceHandle, ResourceEntry>,
    pub next_handle: u64,
    /// Id advertised in discovery links and on `/oic/d`.
    pub device_id: String,
    pub device_info: Option<Representation>,
    pub platform_info: Option<Representation>,
    /// Answered requests and the time their duplicate window closes.
    pub answered: HashMap<AnsweredRequest, AnsweredEntry>,
    pub presence: Option<PresenceAdvertiser>,
    /// Last presence nonce announced; bumped on every change.
    pub presence_nonce: u32,
}

impl ServerState {
    pub fn find_by_uri(&self, uri: &str) -> Option<ResourceHandle> {
        self.resources
            .iter()
            .find(|(_, entry)| entry.uri == uri)
            .map(|(handle, _)| *handle)
    }
}

/// Copy of a confirmable request kept for re-sending.
#[derive(Debug, Clone, PartialEq)]
pub struct Retransmit {
    pub message: MessageV1,
    /// Re-sends so far.
    pub attempts: u32,
    pub next_ms: u64,
}

/// Unicast or multicast request waiting for its reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    /// `None` when the request went to the multicast group.
    pub host: Option<String>,
    pub uri: String,
    pub deadline_ms: u64,
    /// Set for confirmable unicast requests.
    pub retransmit: Option<Retransmit>,
}

/// Client-side observation of a remote resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub host: String,
    pub uri: String,
    /// Sequence of the last delivered notification.
    pub last_sequence: Option<u32>,
    /// Registration reply deadline; cleared once the server confirms.
    pub register_deadline_ms: Option<u64>,
    /// Confirmable registration still unanswered.
    pub retransmit: Option<Retransmit>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryQuery {
    pub host: Option<String>,
    pub connectivity: ConnectivityType,
    pub deadline_ms: u64,
    /// (server host, resource uri) pairs already reported.
    pub seen: HashSet<(String, String)>,
}

/// Liveness bookkeeping for one announcing server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceTrack {
    pub nonce: u32,
    pub expires_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSubscription {
    /// Only announcements from this host; any host when `None`.
    pub host: Option<String>,
    pub resource_type: Option<String>,
    pub tracks: HashMap<String, PresenceTrack>,
}

#[derive(Debug, Default)]
pub struct ClientState {
    pub next_token: u64,
    pub pending: HashMap<Token, PendingRequest>,
    pub observations: HashMap<Token, Observation>,
    pub discoveries: HashMap<Token, DiscoveryQuery>,
    pub presence: BTreeMap<u64, PresenceSubscription>,
    pub next_presence_id: u64,
}

/// Outcome produced by the state machines for the caller side to route.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    RequestCompleted {
        token: Token,
        result: Result<Reply, RequestError>,
    },
    Observe {
        token: Token,
        result: Result<ObserveNotification, RequestError>,
        /// No further notifications follow for this token.
        terminal: bool,
    },
    ResourceFound {
        token: Token,
        resource: RemoteResource,
    },
    DiscoveryExpired {
        token: Token,
    },
    Presence {
        subscription: u64,
        event: PresenceEvent,
    },
}

/// All protocol state of one node.
#[derive(Debug, Default)]
pub struct NodeState {
    pub config: PlatformConfig,
    pub server: ServerState,
    pub client: ClientState,
    /// Events not yet collected by `take_events`.
    pub events: Vec<NodeEvent>,
}

impl NodeState {
    pub fn new(config: PlatformConfig, device_id: impl Into<String>) -> Self {
        Self {
            config,
            server: ServerState {
                next_handle: 1,
                device_id: device_id.into(),
                ..ServerState::default()
            },
            client: ClientState {
                next_token: 1,
                next_presence_id: 1,
                ..ClientState::default()
            },
            events: Vec::new(),
        }
    }

    pub fn take_events(&mut self) -> Vec<NodeEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn push_event(&mut self, event: NodeEvent) {
        self.events.push(event);
    }
}
