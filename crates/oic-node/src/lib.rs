//! OIC node runtime: server registry, observe bookkeeping, client request
//! correlation, discovery and presence, driven by a step pump.
//!
//! The protocol state machines are synchronous functions over `NodeState`
//! with an explicit millisecond clock; `platform::Platform` runs them on a
//! tokio worker and exposes futures and streams to callers.

pub mod client;
pub mod config;
pub mod discovery;
pub mod handler;
pub mod info;
pub mod observe;
pub mod outbound;
pub mod platform;
pub mod presence;
pub mod runtime;
pub mod server;
pub mod state;

pub use client::{ObserveNotification, RemoteResource, Reply, RequestError};
pub use config::PlatformConfig;
pub use handler::{EntityHandler, Request, Response};
pub use info::{DeviceInfo, PlatformInfo};
pub use platform::{Completion, DiscoveryStream, ObserveStream, Platform, PlatformStats, PresenceStream};
pub use presence::PresenceEvent;
pub use state::{NodeState, ResourceHandle};
