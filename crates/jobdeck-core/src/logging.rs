use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive, e.g. `jobdeck_core=debug`.
pub const LOG_ENV: &str = "JOBDECK_LOG";

/// Installs a global fmt subscriber filtered by `JOBDECK_LOG`, falling back to
/// `default_directive`. Returns false if a global subscriber already exists.
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
