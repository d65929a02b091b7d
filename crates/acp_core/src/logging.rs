use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the process-wide tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise `default_directive` (e.g. `"info"`).
/// Returns `false` when a subscriber was already installed, so embedding applications and
/// tests can call this more than once.
pub fn init(default_directive: &str) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
