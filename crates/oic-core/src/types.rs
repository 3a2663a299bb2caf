use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::OicError;

/// Resource discovery endpoint.
pub const WELL_KNOWN_URI: &str = "/oic/res";
/// Device information endpoint.
pub const DEVICE_URI: &str = "/oic/d";
/// Platform information endpoint.
pub const PLATFORM_URI: &str = "/oic/p";
/// Presence advertisement endpoint.
pub const PRESENCE_URI: &str = "/oic/ad";

pub const PRESENCE_RESOURCE_TYPE: &str = "oic.wk.ad";
pub const DEVICE_RESOURCE_TYPE: &str = "oic.wk.d";
pub const PLATFORM_RESOURCE_TYPE: &str = "oic.wk.p";

pub const DEFAULT_INTERFACE: &str = "oic.if.baseline";

pub const DEFAULT_PRESENCE_TTL_SECS: u32 = 60;
pub const MAX_PRESENCE_TTL_SECS: u32 = 60 * 60 * 24;

pub const DEFAULT_PORT: u16 = 5683;
pub const MULTICAST_GROUP: &str = "224.0.1.187";

/// First observe sequence number handed out for a resource.
pub const SEQUENCE_OFFSET: u32 = 2;
/// Observe sequence numbers are 24 bits wide.
pub const MAX_SEQUENCE_NUMBER: u32 = 0x00FF_FFFF;

/// Request/response correlation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Token(pub u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Server-assigned observer id, unique per resource.
pub type ObservationId = u8;

/// Bitwise-combinable resource properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResourceProperty(pub u8);

impl ResourceProperty {
    pub const NONE: Self = Self(0);
    pub const DISCOVERABLE: Self = Self(1 << 0);
    pub const OBSERVABLE: Self = Self(1 << 1);
    pub const ACTIVE: Self = Self(1 << 2);
    pub const SLOW: Self = Self(1 << 3);
    pub const SECURE: Self = Self(1 << 4);
    pub const EXPLICIT_DISCOVERABLE: Self = Self(1 << 5);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ResourceProperty {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Transport adapter and IP flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ConnectivityType(pub u32);

impl ConnectivityType {
    pub const DEFAULT: Self = Self(0);
    pub const ADAPTER_IP: Self = Self(1 << 16);
    pub const ADAPTER_GATT_BTLE: Self = Self(1 << 17);
    pub const ADAPTER_RFCOMM_BTEDR: Self = Self(1 << 18);
    pub const ADAPTER_REMOTE_ACCESS: Self = Self(1 << 19);
    pub const FLAG_SECURE: Self = Self(1 << 4);
    pub const IP_USE_V6: Self = Self(1 << 5);
    pub const IP_USE_V4: Self = Self(1 << 6);

    pub const SCOPE_INTERFACE: Self = Self(0x1);
    pub const SCOPE_LINK: Self = Self(0x2);
    pub const SCOPE_REALM: Self = Self(0x3);
    pub const SCOPE_ADMIN: Self = Self(0x4);
    pub const SCOPE_SITE: Self = Self(0x5);
    pub const SCOPE_ORG: Self = Self(0x8);
    pub const SCOPE_GLOBAL: Self = Self(0xE);

    const SCOPE_MASK: u32 = 0xF;
    const KNOWN_MASK: u32 = Self::SCOPE_MASK | (0x7 << 4) | (0xF << 16);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// IPv6 multicast scope nibble, 0 when unset.
    pub fn scope(self) -> u32 {
        self.0 & Self::SCOPE_MASK
    }

    /// Rejects unknown bits and the reserved scope value 0xF.
    pub fn validate(self) -> Result<(), OicError> {
        if self.0 & !Self::KNOWN_MASK != 0 {
            return Err(OicError::InvalidParam("unknown connectivity flags"));
        }
        if self.scope() == Self::SCOPE_MASK {
            return Err(OicError::InvalidParam("reserved ipv6 scope"));
        }
        Ok(())
    }
}

impl BitOr for ConnectivityType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Orthogonal flags describing why an entity handler is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HandlerFlags(pub u8);

impl HandlerFlags {
    pub const INIT: Self = Self(1 << 0);
    pub const REQUEST: Self = Self(1 << 1);
    pub const OBSERVER: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for HandlerFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObserveAction {
    Register,
    Deregister,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObservationInfo {
    pub action: ObserveAction,
    pub observer_id: ObservationId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualityOfService {
    #[default]
    Low,
    Medium,
    High,
    NaQos,
}

impl QualityOfService {
    /// High QoS is retransmitted until answered and its notifications acked.
    pub fn is_confirmable(self) -> bool {
        self == QualityOfService::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeType {
    Server,
    Client,
    #[default]
    Both,
}

impl ModeType {
    pub fn serves(self) -> bool {
        matches!(self, ModeType::Server | ModeType::Both)
    }

    pub fn queries(self) -> bool {
        matches!(self, ModeType::Client | ModeType::Both)
    }
}

/// CoAP-style response code packed as `class << 5 | detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseCode(pub u8);

impl ResponseCode {
    pub const CREATED: Self = Self::new(2, 1);
    pub const DELETED: Self = Self::new(2, 2);
    pub const VALID: Self = Self::new(2, 3);
    pub const CHANGED: Self = Self::new(2, 4);
    pub const CONTENT: Self = Self::new(2, 5);
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    pub const UNAUTHORIZED: Self = Self::new(4, 1);
    pub const BAD_OPTION: Self = Self::new(4, 2);
    pub const FORBIDDEN: Self = Self::new(4, 3);
    pub const NOT_FOUND: Self = Self::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);
    pub const SERVICE_UNAVAILABLE: Self = Self::new(5, 3);
    pub const GATEWAY_TIMEOUT: Self = Self::new(5, 4);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self((class << 5) | (detail & 0x1f))
    }

    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    pub fn is_success(self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// Outcome reported by an entity handler for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntityHandlerResult {
    #[default]
    Ok,
    Error,
    ResourceCreated,
    ResourceDeleted,
    Slow,
    Forbidden,
    ResourceNotFound,
}

impl EntityHandlerResult {
    /// Response code sent on the wire for this result.
    pub fn response_code(self, method: Method) -> ResponseCode {
        match self {
            EntityHandlerResult::Ok => match method {
                Method::Get => ResponseCode::CONTENT,
                Method::Put | Method::Post | Method::Delete => ResponseCode::CHANGED,
            },
            EntityHandlerResult::ResourceCreated => ResponseCode::CREATED,
            EntityHandlerResult::ResourceDeleted => ResponseCode::DELETED,
            EntityHandlerResult::Slow => ResponseCode::CONTENT,
            EntityHandlerResult::Error => ResponseCode::BAD_REQUEST,
            EntityHandlerResult::Forbidden => ResponseCode::UNAUTHORIZED,
            EntityHandlerResult::ResourceNotFound => ResponseCode::NOT_FOUND,
        }
    }
}

/// Stack-level result codes carried as a response's numeric error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StackResult {
    Ok = 0,
    ResourceCreated = 1,
    ResourceDeleted = 2,
    Continue = 3,
    InvalidUri = 20,
    InvalidQuery = 21,
    InvalidMethod = 25,
    InvalidParam = 26,
    CommError = 29,
    Timeout = 30,
    NoResource = 33,
    ResourceError = 34,
    SlowResource = 35,
    DuplicateRequest = 36,
    NoObservers = 37,
    ObserverNotFound = 38,
    InvalidOption = 40,
    MalformedResponse = 41,
    UnauthorizedReq = 46,
    PresenceStopped = 128,
    PresenceTimeout = 129,
    PresenceDoNotHandle = 131,
    Error = 255,
}

impl StackResult {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Maps a wire response code to the stack result a client reports.
    pub fn from_response_code(code: ResponseCode) -> Self {
        match code {
            ResponseCode::CREATED => StackResult::ResourceCreated,
            ResponseCode::DELETED => StackResult::ResourceDeleted,
            ResponseCode::CHANGED | ResponseCode::CONTENT | ResponseCode::VALID => StackResult::Ok,
            ResponseCode::BAD_REQUEST => StackResult::InvalidQuery,
            ResponseCode::UNAUTHORIZED | ResponseCode::FORBIDDEN => StackResult::UnauthorizedReq,
            ResponseCode::BAD_OPTION => StackResult::InvalidOption,
            ResponseCode::NOT_FOUND => StackResult::NoResource,
            ResponseCode::METHOD_NOT_ALLOWED => StackResult::InvalidMethod,
            ResponseCode::GATEWAY_TIMEOUT => StackResult::Timeout,
            _ => StackResult::Error,
        }
    }
}

/// Reason a presence announcement was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceTrigger {
    Create,
    Change,
    Delete,
}

/// Liveness transition reported to presence subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceStatus {
    Ok,
    Stopped,
    Timeout,
    DoNotHandle,
}

impl PresenceStatus {
    pub fn stack_result(self) -> StackResult {
        match self {
            PresenceStatus::Ok => StackResult::Ok,
            PresenceStatus::Stopped => StackResult::PresenceStopped,
            PresenceStatus::Timeout => StackResult::PresenceTimeout,
            PresenceStatus::DoNotHandle => StackResult::PresenceDoNotHandle,
        }
    }
}

/// Next observe sequence number after `current`. The 24-bit maximum itself
/// is never issued; the counter wraps to just past the offset instead.
pub fn next_sequence(current: u32) -> u32 {
    let next = current.saturating_add(1);
    if next >= MAX_SEQUENCE_NUMBER {
        SEQUENCE_OFFSET + 1
    } else {
        next
    }
}

/// True when `candidate` is newer than `last` under 24-bit serial arithmetic.
pub fn sequence_is_newer(candidate: u32, last: u32) -> bool {
    const HALF: u32 = 1 << 23;
    let candidate = candidate & MAX_SEQUENCE_NUMBER;
    let last = last & MAX_SEQUENCE_NUMBER;
    (last < candidate && candidate - last < HALF) || (last > candidate && last - candidate > HALF)
}
