use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "echorpc=info,echo_server=info,echo_client=info";

/// Installs the global fmt subscriber, honouring `RUST_LOG`
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    fmt().with_env_filter(filter).init();
}
