use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use oic_core::{
    ConnectivityType, EntityHandlerResult, Method, ModeType, OicError, QueryParams,
    Representation, ResourceProperty,
};
use oic_node::client::RequestError;
use oic_node::server::ResourceSpec;
use oic_node::{DeviceInfo, Platform, Request, Response};
use oic_transport::udp::{UdpAdapter, UdpAdapterError};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use thiserror::Error;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

mod config;
mod logger;

use crate::config::DemoConfig;

const LIGHT_URI: &str = "/a/light";
const LIGHT_TYPE: &str = "core.light";
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a dimmable light at /a/light
    Server,
    /// Discover a light, read it, set it and observe it
    Client {
        /// Unicast discovery target (ip:port); multicast when omitted
        #[arg(long)]
        host: Option<String>,
    },
}

#[derive(Debug, Error)]
enum DemoError {
    #[error("transport: {0}")]
    Transport(#[from] UdpAdapterError),
    #[error(transparent)]
    Oic(#[from] OicError),
    #[error("request failed: {0}")]
    Request(#[from] RequestError),
    #[error("no light answered discovery")]
    NothingFound,
}

#[derive(Debug)]
struct Light {
    on: AtomicBool,
    power: AtomicI64,
}

impl Light {
    fn representation(&self) -> Representation {
        let mut rep = Representation::new();
        rep.set_uri(LIGHT_URI);
        rep.set_value("state", self.on.load(Ordering::Relaxed));
        rep.set_value("power", self.power.load(Ordering::Relaxed));
        rep
    }
}

fn light_handler(light: Arc<Light>) -> impl FnMut(&Request) -> Option<Response> + Send + 'static {
    move |request: &Request| {
        match request.method {
            Method::Get => {}
            Method::Put | Method::Post => {
                let Some(payload) = &request.payload else {
                    return Some(Response::to(request).with_result(EntityHandlerResult::Error));
                };
                if let Ok(power) = payload.get_value::<i64>("power") {
                    light.power.store(power, Ordering::Relaxed);
                }
                if let Ok(on) = payload.get_value::<bool>("state") {
                    light.on.store(on, Ordering::Relaxed);
                }
                info!(host = %request.host, "light set remotely");
            }
            _ => return Some(Response::to(request).with_result(EntityHandlerResult::Forbidden)),
        }
        Some(Response::to(request).with_representation(light.representation()))
    }
}

async fn run_server(config: DemoConfig, shutdown: Arc<AtomicBool>) -> Result<(), DemoError> {
    let adapter = UdpAdapter::bind(&config.udp_config(ModeType::Server))?;
    let platform = Platform::start(config.platform_config(ModeType::Server), adapter)?;
    platform
        .set_device_info(DeviceInfo::new(config.device_name.clone()))
        .await?;

    let light = Arc::new(Light {
        on: AtomicBool::new(true),
        power: AtomicI64::new(0),
    });
    let handle = platform
        .register_resource(
            ResourceSpec::new(
                LIGHT_URI,
                LIGHT_TYPE,
                ResourceProperty::DISCOVERABLE | ResourceProperty::OBSERVABLE,
            ),
            light_handler(Arc::clone(&light)),
        )
        .await?;
    platform.start_presence(config.presence_ttl_secs()).await?;
    info!(host = %platform.local_host(), resource = %handle, "light server running");

    let mut ticker = interval(SHUTDOWN_POLL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next_update = Instant::now() + config.update_interval;
    while !shutdown.load(Ordering::Relaxed) {
        ticker.tick().await;
        if Instant::now() < next_update {
            continue;
        }
        next_update += config.update_interval;

        let power = (light.power.load(Ordering::Relaxed) + 10) % 110;
        light.power.store(power, Ordering::Relaxed);
        match platform.notify_all_observers(handle).await {
            Ok(sent) => info!(power, sent, "light updated"),
            Err(OicError::NoObservers) => debug!(power, "light updated, nobody observing"),
            Err(err) => warn!(error = %err, "notify failed"),
        }
    }

    info!("light server stopping");
    platform.stop_presence().await?;
    platform.unregister_resource(handle).await?;
    platform.shutdown().await;
    Ok(())
}

async fn run_client(
    config: DemoConfig,
    host: Option<String>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), DemoError> {
    let adapter = UdpAdapter::bind(&config.udp_config(ModeType::Client))?;
    let platform = Platform::start(config.platform_config(ModeType::Client), adapter)?;

    let mut found = platform.find_resource(
        host.as_deref().unwrap_or(""),
        &format!("/oic/res?rt={LIGHT_TYPE}"),
        ConnectivityType::DEFAULT,
    )?;
    let light = found.next().await.ok_or(DemoError::NothingFound)??;
    drop(found);
    info!(host = %light.host, uri = %light.uri, id = %light.unique_id(), "found light");

    let reply = platform.get_resource(&light, QueryParams::new())?.await?;
    info!(
        power = %reply.representation.value_to_string("power"),
        state = %reply.representation.value_to_string("state"),
        "light read"
    );

    let mut rep = Representation::new();
    rep.set_value("state", true);
    rep.set_value("power", 50);
    let reply = platform.put_resource(&light, rep, QueryParams::new())?.await?;
    info!(code = %reply.code, "light set");

    match platform.get_device_info(&light.host)?.await {
        Ok(info) => info!(name = %info.representation.value_to_string("n"), "device info"),
        Err(err) => warn!(error = %err, "device info unavailable"),
    }

    if light.is_observable() {
        let mut stream = platform.observe_resource(&light, QueryParams::new())?;
        let deadline = Instant::now() + config.observe_for;
        while !shutdown.load(Ordering::Relaxed) && Instant::now() < deadline {
            tokio::select! {
                notification = stream.next() => match notification {
                    Some(Ok(notification)) => info!(
                        sequence = ?notification.sequence,
                        power = %notification.reply.representation.value_to_string("power"),
                        "light notification"
                    ),
                    Some(Err(err)) => {
                        warn!(error = %err, "observation ended");
                        break;
                    }
                    None => break,
                },
                _ = sleep(SHUTDOWN_POLL) => {}
            }
        }
        stream.cancel();
    }

    platform.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    logger::init();

    let cli = Cli::parse();

    let config = match DemoConfig::new(cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err}");
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(err) = flag::register(signal, Arc::clone(&shutdown)) {
            warn!(signal, error = %err, "signal handler not installed");
        }
    }

    let result = match cli.command {
        Commands::Server => run_server(config, shutdown).await,
        Commands::Client { host } => run_client(config, host, shutdown).await,
    };
    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::{light_handler, Cli, Commands, Light, LIGHT_URI};
    use clap::Parser;
    use oic_core::{HandlerFlags, Method, QueryParams, Representation, ResponseCode, Token};
    use oic_node::{Request, ResourceHandle};
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Arc;

    fn request(method: Method, payload: Option<Representation>) -> Request {
        Request {
            flags: HandlerFlags::REQUEST,
            method,
            query: QueryParams::new(),
            header_options: Vec::new(),
            resource: ResourceHandle(1),
            token: Token(7),
            host: "peer".into(),
            payload,
            observation: None,
        }
    }

    fn light() -> Arc<Light> {
        Arc::new(Light {
            on: AtomicBool::new(false),
            power: AtomicI64::new(10),
        })
    }

    #[test]
    fn get_returns_current_state() {
        let light = light();
        let mut handler = light_handler(Arc::clone(&light));
        let response = handler(&request(Method::Get, None)).expect("get should be answered");
        assert_eq!(response.representation.uri(), LIGHT_URI);
        assert_eq!(response.representation.get_value::<i64>("power").expect("power"), 10);
        assert!(!response.representation.get_value::<bool>("state").expect("state"));
    }

    #[test]
    fn put_updates_light() {
        let light = light();
        let mut handler = light_handler(Arc::clone(&light));
        let mut rep = Representation::new();
        rep.set_value("power", 90);
        rep.set_value("state", true);
        let response = handler(&request(Method::Put, Some(rep))).expect("put should be answered");
        assert_eq!(response.response_code(Method::Put), ResponseCode::CHANGED);
        assert_eq!(light.power.load(Ordering::Relaxed), 90);
        assert!(light.on.load(Ordering::Relaxed));
    }

    #[test]
    fn delete_is_forbidden() {
        let mut handler = light_handler(light());
        let response = handler(&request(Method::Delete, None)).expect("delete should be answered");
        assert_eq!(response.response_code(Method::Delete), ResponseCode::UNAUTHORIZED);
    }

    #[test]
    fn cli_parses_client_host() {
        let cli = Cli::try_parse_from(["oic-demo", "client", "--host", "192.168.1.4:5683"])
            .expect("cli should parse");
        match cli.command {
            Commands::Client { host } => assert_eq!(host.as_deref(), Some("192.168.1.4:5683")),
            Commands::Server => panic!("expected client"),
        }
    }
}
