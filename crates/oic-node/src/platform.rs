use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use oic_core::hash::derive_device_id;
use oic_core::query::is_valid_identifier;
use oic_core::types::{DEVICE_URI, PLATFORM_URI};
use oic_core::{ConnectivityType, Method, ObservationId, OicError, QueryParams, Representation, Token};
use oic_transport::adapter::{TransportAdapter, TransportHealthSnapshot};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::client::{
    cancel_observe, send_request, start_observe, validate_observe_request, ObserveNotification,
    OutboundRequest, RemoteResource, Reply, RequestError,
};
use crate::config::PlatformConfig;
use crate::discovery::{cancel_discovery, find_resource, parse_discovery_uri};
use crate::handler::{Request, Response};
use crate::info::{DeviceInfo, PlatformInfo};
use crate::observe::{notify_all_observers, notify_list_of_observers};
use crate::presence::{
    start_presence, stop_presence, subscribe_presence, unsubscribe_presence, PresenceEvent,
};
use crate::runtime::{pump_until_idle, tick, RuntimeStats};
use crate::server::{
    bind_interface_to_resource, bind_type_to_resource, register_resource, set_device_info,
    set_platform_info, unregister_resource, ResourceSpec,
};
use crate::state::{NodeEvent, NodeState, ResourceHandle};

type OicReply<T> = oneshot::Sender<Result<T, OicError>>;
type ObserveSender = mpsc::UnboundedSender<Result<ObserveNotification, RequestError>>;
type DiscoverySender = mpsc::UnboundedSender<Result<RemoteResource, RequestError>>;

enum Command {
    Register {
        spec: ResourceSpec,
        handler: crate::handler::EntityHandler,
        reply: OicReply<ResourceHandle>,
    },
    Unregister {
        handle: ResourceHandle,
        reply: OicReply<()>,
    },
    BindType {
        handle: ResourceHandle,
        resource_type: String,
        reply: OicReply<()>,
    },
    BindInterface {
        handle: ResourceHandle,
        interface: String,
        reply: OicReply<()>,
    },
    NotifyAll {
        handle: ResourceHandle,
        reply: OicReply<usize>,
    },
    NotifyList {
        handle: ResourceHandle,
        observer_ids: Vec<ObservationId>,
        response: Response,
        reply: OicReply<usize>,
    },
    SetDeviceInfo {
        info: DeviceInfo,
        reply: OicReply<()>,
    },
    SetPlatformInfo {
        info: PlatformInfo,
        reply: OicReply<()>,
    },
    StartPresence {
        ttl_secs: u32,
        reply: OicReply<()>,
    },
    StopPresence {
        reply: OicReply<()>,
    },
    Request {
        request: OutboundRequest,
        reply: oneshot::Sender<Result<Reply, RequestError>>,
    },
    Observe {
        stream: u64,
        request: OutboundRequest,
        events: ObserveSender,
    },
    CancelObserve {
        stream: u64,
    },
    Find {
        stream: u64,
        host: String,
        resource_uri: String,
        connectivity: ConnectivityType,
        events: DiscoverySender,
    },
    CancelFind {
        stream: u64,
    },
    SubscribePresence {
        stream: u64,
        host: String,
        resource_type: Option<String>,
        events: mpsc::UnboundedSender<PresenceEvent>,
    },
    UnsubscribePresence {
        stream: u64,
    },
    Stats {
        reply: oneshot::Sender<PlatformStats>,
    },
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Command")
    }
}

/// Counters reported by `Platform::stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformStats {
    pub runtime: RuntimeStats,
    pub transport: TransportHealthSnapshot,
}

/// Future resolving to the outcome of one client request.
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T, RequestError>>,
}

impl<T> Future for Completion<T> {
    type Output = Result<T, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RequestError::Cancelled)))
    }
}

/// Notifications of one observation, in sequence order.
#[derive(Debug)]
pub struct ObserveStream {
    id: u64,
    events: mpsc::UnboundedReceiver<Result<ObserveNotification, RequestError>>,
    commands: mpsc::UnboundedSender<Command>,
    cancelled: bool,
}

impl ObserveStream {
    /// Next notification; `None` once the observation has ended.
    pub async fn next(&mut self) -> Option<Result<ObserveNotification, RequestError>> {
        self.events.recv().await
    }

    /// Deregisters the observation. Notifications already queued can still
    /// be read.
    pub fn cancel(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            let _ = self.commands.send(Command::CancelObserve { stream: self.id });
        }
        self.events.close();
    }
}

impl Drop for ObserveStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Resources answering one discovery query; ends when the query expires
/// or after an error.
#[derive(Debug)]
pub struct DiscoveryStream {
    id: u64,
    events: mpsc::UnboundedReceiver<Result<RemoteResource, RequestError>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl DiscoveryStream {
    pub async fn next(&mut self) -> Option<Result<RemoteResource, RequestError>> {
        self.events.recv().await
    }
}

impl Drop for DiscoveryStream {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::CancelFind { stream: self.id });
    }
}

#[derive(Debug)]
pub struct PresenceStream {
    id: u64,
    events: mpsc::UnboundedReceiver<PresenceEvent>,
    commands: mpsc::UnboundedSender<Command>,
}

impl PresenceStream {
    pub async fn next(&mut self) -> Option<PresenceEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(&mut self) {
        let _ = self
            .commands
            .send(Command::UnsubscribePresence { stream: self.id });
        self.events.close();
    }
}

impl Drop for PresenceStream {
    fn drop(&mut self) {
        let _ = self
            .commands
            .send(Command::UnsubscribePresence { stream: self.id });
    }
}

#[derive(Default)]
struct Routes {
    requests: HashMap<Token, oneshot::Sender<Result<Reply, RequestError>>>,
    observes: HashMap<Token, ObserveSender>,
    observe_streams: HashMap<u64, Token>,
    discoveries: HashMap<Token, DiscoverySender>,
    discovery_streams: HashMap<u64, Token>,
    presence: HashMap<u64, mpsc::UnboundedSender<PresenceEvent>>,
    presence_streams: HashMap<u64, u64>,
}

impl Routes {
    fn forget_observe(&mut self, token: Token) {
        self.observes.remove(&token);
        self.observe_streams.retain(|_, t| *t != token);
    }

    fn forget_discovery(&mut self, token: Token) {
        self.discoveries.remove(&token);
        self.discovery_streams.retain(|_, t| *t != token);
    }

    fn forget_presence(&mut self, subscription: u64) {
        self.presence.remove(&subscription);
        self.presence_streams.retain(|_, s| *s != subscription);
    }
}

/// Owns the node state and transport; runs on one tokio task.
struct Worker<A> {
    node: NodeState,
    adapter: A,
    routes: Routes,
    stats: RuntimeStats,
    epoch: Instant,
}

impl<A: TransportAdapter> Worker<A> {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn apply(&mut self, command: Command) {
        let now_ms = self.now_ms();
        let node = &mut self.node;
        let adapter = &mut self.adapter;
        match command {
            Command::Register { spec, handler, reply } => {
                let _ = reply.send(register_resource(node, adapter, spec, handler, now_ms));
            }
            Command::Unregister { handle, reply } => {
                let _ = reply.send(unregister_resource(node, adapter, handle, now_ms));
            }
            Command::BindType {
                handle,
                resource_type,
                reply,
            } => {
                let _ = reply.send(bind_type_to_resource(
                    node,
                    adapter,
                    handle,
                    &resource_type,
                    now_ms,
                ));
            }
            Command::BindInterface {
                handle,
                interface,
                reply,
            } => {
                let _ = reply.send(bind_interface_to_resource(
                    node, adapter, handle, &interface, now_ms,
                ));
            }
            Command::NotifyAll { handle, reply } => {
                let _ = reply.send(notify_all_observers(node, adapter, handle));
            }
            Command::NotifyList {
                handle,
                observer_ids,
                response,
                reply,
            } => {
                let _ = reply.send(notify_list_of_observers(
                    node,
                    adapter,
                    handle,
                    &observer_ids,
                    &response,
                ));
            }
            Command::SetDeviceInfo { info, reply } => {
                let _ = reply.send(set_device_info(node, &info));
            }
            Command::SetPlatformInfo { info, reply } => {
                let _ = reply.send(set_platform_info(node, &info));
            }
            Command::StartPresence { ttl_secs, reply } => {
                let _ = reply.send(start_presence(node, adapter, ttl_secs, now_ms));
            }
            Command::StopPresence { reply } => {
                let _ = reply.send(stop_presence(node, adapter));
            }
            Command::Request { request, reply } => match send_request(node, adapter, request, now_ms) {
                Ok(token) => {
                    self.routes.requests.insert(token, reply);
                }
                Err(err) => {
                    debug!(error = %err, "request rejected by worker");
                    let _ = reply.send(Err(err.into()));
                }
            },
            Command::Observe {
                stream,
                request,
                events,
            } => match start_observe(node, adapter, request, now_ms) {
                Ok(token) => {
                    self.routes.observes.insert(token, events);
                    self.routes.observe_streams.insert(stream, token);
                }
                Err(err) => {
                    debug!(error = %err, "observe rejected by worker");
                    let _ = events.send(Err(err.into()));
                }
            },
            Command::CancelObserve { stream } => {
                if let Some(token) = self.routes.observe_streams.remove(&stream) {
                    self.routes.observes.remove(&token);
                    let _ = cancel_observe(node, adapter, token);
                }
            }
            Command::Find {
                stream,
                host,
                resource_uri,
                connectivity,
                events,
            } => match find_resource(node, adapter, &host, &resource_uri, connectivity, now_ms) {
                Ok(token) => {
                    self.routes.discoveries.insert(token, events);
                    self.routes.discovery_streams.insert(stream, token);
                }
                Err(err) => {
                    debug!(error = %err, "discovery rejected by worker");
                    let _ = events.send(Err(err.into()));
                }
            },
            Command::CancelFind { stream } => {
                if let Some(token) = self.routes.discovery_streams.remove(&stream) {
                    self.routes.discoveries.remove(&token);
                    cancel_discovery(node, token);
                }
            }
            Command::SubscribePresence {
                stream,
                host,
                resource_type,
                events,
            } => match subscribe_presence(node, &host, resource_type.as_deref()) {
                Ok(subscription) => {
                    self.routes.presence.insert(subscription, events);
                    self.routes.presence_streams.insert(stream, subscription);
                }
                Err(err) => debug!(error = %err, "presence subscription rejected by worker"),
            },
            Command::UnsubscribePresence { stream } => {
                if let Some(subscription) = self.routes.presence_streams.remove(&stream) {
                    self.routes.presence.remove(&subscription);
                    unsubscribe_presence(node, subscription);
                }
            }
            Command::Stats { reply } => {
                let _ = reply.send(PlatformStats {
                    runtime: self.stats,
                    transport: adapter.health_snapshot(),
                });
            }
            Command::Shutdown => {}
        }
    }

    fn step(&mut self) {
        let now_ms = self.now_ms();
        pump_until_idle(&mut self.node, &mut self.adapter, now_ms, &mut self.stats);
        self.stats.retransmissions += tick(&mut self.node, &mut self.adapter, now_ms);
    }

    fn route_events(&mut self) {
        for event in self.node.take_events() {
            match event {
                NodeEvent::RequestCompleted { token, result } => {
                    if let Some(reply) = self.routes.requests.remove(&token) {
                        let _ = reply.send(result);
                    }
                }
                NodeEvent::Observe {
                    token,
                    result,
                    terminal,
                } => {
                    let Some(events) = self.routes.observes.get(&token) else {
                        continue;
                    };
                    let delivered = events.send(result).is_ok();
                    if terminal || !delivered {
                        self.routes.forget_observe(token);
                    }
                    if !delivered {
                        let _ = cancel_observe(&mut self.node, &mut self.adapter, token);
                    }
                }
                NodeEvent::ResourceFound { token, resource } => {
                    let Some(events) = self.routes.discoveries.get(&token) else {
                        continue;
                    };
                    if events.send(Ok(resource)).is_err() {
                        self.routes.forget_discovery(token);
                        cancel_discovery(&mut self.node, token);
                    }
                }
                NodeEvent::DiscoveryExpired { token } => self.routes.forget_discovery(token),
                NodeEvent::Presence {
                    subscription,
                    event,
                } => {
                    let Some(events) = self.routes.presence.get(&subscription) else {
                        continue;
                    };
                    if events.send(event).is_err() {
                        self.routes.forget_presence(subscription);
                        unsubscribe_presence(&mut self.node, subscription);
                    }
                }
            }
        }
    }
}

async fn run_worker<A: TransportAdapter>(
    mut worker: Worker<A>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let period = worker.node.config.tick_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => worker.apply(command),
            },
            _ = ticker.tick() => worker.step(),
        }
        worker.route_events();
    }
    info!(stats = ?worker.stats, "platform worker stopped");
}

fn wall_clock_nonce() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| u32::try_from(elapsed.as_secs()).ok())
        .unwrap_or(0)
}

/// Handle to a running OIC node.
///
/// `start` spawns the worker owning all protocol state on the current tokio
/// runtime. Dropping the platform stops the worker; outstanding completions
/// then resolve to `RequestError::Cancelled` and streams end.
#[derive(Debug)]
pub struct Platform {
    config: PlatformConfig,
    local_host: String,
    commands: mpsc::UnboundedSender<Command>,
    next_stream: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl Platform {
    pub fn start<A>(config: PlatformConfig, adapter: A) -> Result<Self, OicError>
    where
        A: TransportAdapter + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| OicError::InvalidMode("platform needs a tokio runtime"))?;
        let mut rng = rand::thread_rng();
        let seed = config
            .device_seed
            .clone()
            .unwrap_or_else(|| format!("{:016x}", rng.gen::<u64>()));
        let mut node = NodeState::new(config.clone(), derive_device_id(&seed));
        node.client.next_token = rng.gen_range(1..=u64::from(u32::MAX));
        node.server.presence_nonce = wall_clock_nonce();

        let local_host = adapter.local_host().to_string();
        info!(host = %local_host, mode = ?config.mode, device = %node.server.device_id, "platform started");
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            node,
            adapter,
            routes: Routes::default(),
            stats: RuntimeStats::default(),
            epoch: Instant::now(),
        };
        let worker = runtime.spawn(run_worker(worker, rx));
        Ok(Self {
            config,
            local_host,
            commands,
            next_stream: AtomicU64::new(1),
            worker: Some(worker),
        })
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Host other nodes use to reach this platform.
    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    fn require_server(&self) -> Result<(), OicError> {
        if self.config.mode.serves() {
            Ok(())
        } else {
            Err(OicError::InvalidMode("server operations need server or both mode"))
        }
    }

    fn require_client(&self) -> Result<(), OicError> {
        if self.config.mode.queries() {
            Ok(())
        } else {
            Err(OicError::InvalidMode("client operations need client or both mode"))
        }
    }

    fn stream_id(&self) -> u64 {
        self.next_stream.fetch_add(1, Ordering::Relaxed)
    }

    async fn call<T>(&self, command: impl FnOnce(OicReply<T>) -> Command) -> Result<T, OicError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| OicError::InvalidMode("platform stopped"))?;
        rx.await
            .map_err(|_| OicError::InvalidMode("platform stopped"))?
    }

    pub async fn register_resource<H>(&self, spec: ResourceSpec, handler: H) -> Result<ResourceHandle, OicError>
    where
        H: FnMut(&Request) -> Option<Response> + Send + 'static,
    {
        self.require_server()?;
        self.call(|reply| Command::Register {
            spec,
            handler: Box::new(handler),
            reply,
        })
        .await
    }

    pub async fn unregister_resource(&self, handle: ResourceHandle) -> Result<(), OicError> {
        self.require_server()?;
        self.call(|reply| Command::Unregister { handle, reply }).await
    }

    pub async fn bind_type_to_resource(&self, handle: ResourceHandle, resource_type: &str) -> Result<(), OicError> {
        self.require_server()?;
        let resource_type = resource_type.to_string();
        self.call(|reply| Command::BindType {
            handle,
            resource_type,
            reply,
        })
        .await
    }

    pub async fn bind_interface_to_resource(&self, handle: ResourceHandle, interface: &str) -> Result<(), OicError> {
        self.require_server()?;
        let interface = interface.to_string();
        self.call(|reply| Command::BindInterface {
            handle,
            interface,
            reply,
        })
        .await
    }

    /// Re-runs the resource's handler for each observer; returns how many
    /// notifications went out.
    pub async fn notify_all_observers(&self, handle: ResourceHandle) -> Result<usize, OicError> {
        self.require_server()?;
        self.call(|reply| Command::NotifyAll { handle, reply }).await
    }

    pub async fn notify_list_of_observers(
        &self,
        handle: ResourceHandle,
        observer_ids: Vec<ObservationId>,
        response: Response,
    ) -> Result<usize, OicError> {
        self.require_server()?;
        self.call(|reply| Command::NotifyList {
            handle,
            observer_ids,
            response,
            reply,
        })
        .await
    }

    pub async fn set_device_info(&self, info: DeviceInfo) -> Result<(), OicError> {
        self.require_server()?;
        info.validate()?;
        self.call(|reply| Command::SetDeviceInfo { info, reply }).await
    }

    pub async fn set_platform_info(&self, info: PlatformInfo) -> Result<(), OicError> {
        self.require_server()?;
        info.validate()?;
        self.call(|reply| Command::SetPlatformInfo { info, reply }).await
    }

    /// Starts presence announcements; a TTL of 0 selects the default.
    pub async fn start_presence(&self, ttl_secs: u32) -> Result<(), OicError> {
        self.require_server()?;
        self.call(|reply| Command::StartPresence { ttl_secs, reply }).await
    }

    pub async fn stop_presence(&self) -> Result<(), OicError> {
        self.require_server()?;
        self.call(|reply| Command::StopPresence { reply }).await
    }

    /// Sends one request. Invalid input fails here; everything that happens
    /// on the network resolves through the completion.
    pub fn request(&self, request: OutboundRequest) -> Result<Completion<Reply>, OicError> {
        self.require_client()?;
        request.validate()?;
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Request { request, reply });
        Ok(Completion { rx })
    }

    pub fn get_resource(&self, resource: &RemoteResource, query: QueryParams) -> Result<Completion<Reply>, OicError> {
        self.request(resource.request(Method::Get).with_query(query))
    }

    pub fn put_resource(
        &self,
        resource: &RemoteResource,
        representation: Representation,
        query: QueryParams,
    ) -> Result<Completion<Reply>, OicError> {
        self.request(
            resource
                .request(Method::Put)
                .with_query(query)
                .with_payload(representation),
        )
    }

    pub fn post_resource(
        &self,
        resource: &RemoteResource,
        representation: Representation,
        query: QueryParams,
    ) -> Result<Completion<Reply>, OicError> {
        self.request(
            resource
                .request(Method::Post)
                .with_query(query)
                .with_payload(representation),
        )
    }

    pub fn delete_resource(&self, resource: &RemoteResource) -> Result<Completion<Reply>, OicError> {
        self.request(resource.request(Method::Delete))
    }

    /// Registers an observation described by a GET `request`.
    pub fn observe(&self, request: OutboundRequest) -> Result<ObserveStream, OicError> {
        self.require_client()?;
        validate_observe_request(&request)?;
        let stream = self.stream_id();
        let (events, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(Command::Observe {
            stream,
            request,
            events,
        });
        Ok(ObserveStream {
            id: stream,
            events: rx,
            commands: self.commands.clone(),
            cancelled: false,
        })
    }

    pub fn observe_resource(&self, resource: &RemoteResource, query: QueryParams) -> Result<ObserveStream, OicError> {
        self.observe(resource.request(Method::Get).with_query(query))
    }

    /// Discovers resources on `host`, or on every reachable server when
    /// `host` is empty.
    pub fn find_resource(
        &self,
        host: &str,
        resource_uri: &str,
        connectivity: ConnectivityType,
    ) -> Result<DiscoveryStream, OicError> {
        self.require_client()?;
        connectivity.validate()?;
        parse_discovery_uri(resource_uri)?;
        let stream = self.stream_id();
        let (events, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(Command::Find {
            stream,
            host: host.to_string(),
            resource_uri: resource_uri.to_string(),
            connectivity,
            events,
        });
        Ok(DiscoveryStream {
            id: stream,
            events: rx,
            commands: self.commands.clone(),
        })
    }

    pub fn get_device_info(&self, host: &str) -> Result<Completion<Reply>, OicError> {
        self.request(OutboundRequest::new(host, Method::Get, DEVICE_URI))
    }

    pub fn get_platform_info(&self, host: &str) -> Result<Completion<Reply>, OicError> {
        self.request(OutboundRequest::new(host, Method::Get, PLATFORM_URI))
    }

    pub fn subscribe_presence(&self, host: &str, resource_type: Option<&str>) -> Result<PresenceStream, OicError> {
        self.require_client()?;
        if resource_type.is_some_and(|rt| !is_valid_identifier(rt)) {
            return Err(OicError::InvalidParam("presence resource type"));
        }
        let stream = self.stream_id();
        let (events, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(Command::SubscribePresence {
            stream,
            host: host.to_string(),
            resource_type: resource_type.map(str::to_string),
            events,
        });
        Ok(PresenceStream {
            id: stream,
            events: rx,
            commands: self.commands.clone(),
        })
    }

    /// Counters of the worker's pump and transport.
    pub async fn stats(&self) -> Result<PlatformStats, OicError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .map_err(|_| OicError::InvalidMode("platform stopped"))?;
        rx.await.map_err(|_| OicError::InvalidMode("platform stopped"))
    }

    /// Stops the worker and waits for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}
