use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Env var holding the tracing filter directives.
pub const LOG_ENV: &str = "OIC_LOG";

fn filter_from(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Installs the global subscriber; malformed `OIC_LOG` falls back to `info`.
pub fn init() {
    let filter = filter_from(std::env::var(LOG_ENV).ok());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

#[cfg(test)]
mod tests {
    use super::filter_from;

    #[test]
    fn missing_directives_default_to_info() {
        assert_eq!(filter_from(None).to_string(), "info");
        assert_eq!(
            filter_from(Some("oic_node=debug".into())).to_string(),
            "oic_node=debug"
        );
    }
}
