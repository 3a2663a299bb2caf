use config::{Config, ConfigError, Environment, File};
use oic_core::{ModeType, QualityOfService};
use oic_node::PlatformConfig;
use oic_transport::udp::UdpAdapterConfig;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct DemoConfig {
    pub bind_addr: Ipv4Addr,
    pub port: u16,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    pub join_multicast: bool,
    pub device_name: String,
    pub device_seed: Option<String>,
    /// Send High QoS: requests are retransmitted and notifications acked.
    pub confirmable: bool,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub discovery_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub presence_ttl: Duration,
    /// How often the demo light changes its power level.
    #[serde(with = "humantime_serde")]
    pub update_interval: Duration,
    /// How long the client keeps an observation open.
    #[serde(with = "humantime_serde")]
    pub observe_for: Duration,
}

impl DemoConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("bind_addr", "0.0.0.0")?
            .set_default("port", 5683)?
            .set_default("multicast_group", "224.0.1.187")?
            .set_default("multicast_port", 5683)?
            .set_default("join_multicast", true)?
            .set_default("device_name", "oic-demo")?
            .set_default("device_seed", None::<String>)?
            .set_default("confirmable", false)?
            .set_default("tick_interval", "10ms")?
            .set_default("request_timeout", "5s")?
            .set_default("discovery_ttl", "3s")?
            .set_default("presence_ttl", "60s")?
            .set_default("update_interval", "2s")?
            .set_default("observe_for", "10s")?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix("OIC_DEMO").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    pub fn platform_config(&self, mode: ModeType) -> PlatformConfig {
        PlatformConfig {
            mode,
            qos: if self.confirmable {
                QualityOfService::High
            } else {
                QualityOfService::Low
            },
            tick_interval: self.tick_interval,
            request_timeout: self.request_timeout,
            discovery_ttl: self.discovery_ttl,
            device_seed: self.device_seed.clone(),
            ..PlatformConfig::default()
        }
    }

    /// Client sockets bind an ephemeral port so they can share a host with
    /// a server.
    pub fn udp_config(&self, mode: ModeType) -> UdpAdapterConfig {
        UdpAdapterConfig {
            bind_addr: self.bind_addr,
            port: if mode == ModeType::Client { 0 } else { self.port },
            multicast_group: self.multicast_group,
            multicast_port: self.multicast_port,
            join_multicast: self.join_multicast && mode != ModeType::Client,
        }
    }

    pub fn presence_ttl_secs(&self) -> u32 {
        u32::try_from(self.presence_ttl.as_secs()).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;

    fn with_env<F>(vars: &[(&str, &str)], test: F)
    where
        F: FnOnce(),
    {
        let mut old = Vec::new();
        for (k, v) in vars {
            old.push((k.to_string(), env::var(k).ok()));
            env::set_var(k, v);
        }

        test();

        for (k, maybe_old) in old {
            match maybe_old {
                Some(val) => env::set_var(k, val),
                None => env::remove_var(k),
            }
        }
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = DemoConfig::new(None).expect("failed to build config");

        assert_eq!(cfg.port, 5683);
        assert_eq!(cfg.multicast_group, Ipv4Addr::new(224, 0, 1, 187));
        assert_eq!(cfg.tick_interval, Duration::from_millis(10));
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.presence_ttl_secs(), 60);
        assert!(cfg.device_seed.is_none());
    }

    #[test]
    fn env_vars_override_defaults() {
        with_env(
            &[
                ("OIC_DEMO_DEVICE_NAME", "porch"),
                ("OIC_DEMO_DISCOVERY_TTL", "750ms"),
                ("OIC_DEMO_CONFIRMABLE", "true"),
            ],
            || {
                let cfg = DemoConfig::new(None).expect("failed to build config");
                assert_eq!(cfg.device_name, "porch");
                assert_eq!(cfg.discovery_ttl, Duration::from_millis(750));
                let platform = cfg.platform_config(ModeType::Both);
                assert_eq!(platform.qos, QualityOfService::High);
                assert_eq!(platform.discovery_ttl, Duration::from_millis(750));
            },
        );
    }

    #[test]
    fn toml_file_is_read() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(file, "port = 6000\nupdate_interval = \"500ms\"").expect("write config");

        let cfg = DemoConfig::new(Some(file.path().to_path_buf())).expect("failed to build config");
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.update_interval, Duration::from_millis(500));
    }

    #[test]
    fn client_binds_ephemeral_port_without_joining_group() {
        let cfg = DemoConfig::new(None).expect("failed to build config");
        let udp = cfg.udp_config(ModeType::Client);
        assert_eq!(udp.port, 0);
        assert!(!udp.join_multicast);
        assert_eq!(cfg.udp_config(ModeType::Server).port, 5683);
    }
}
