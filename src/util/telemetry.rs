//! Telemetry helpers for structured logging.

use tracing_subscriber::EnvFilter;

/// Default filter used when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVE: &str = "prometheus_scout=info,scoutd=info";

/// Install a default env-based subscriber unless the host already set one.
///
/// `RUST_LOG` wins when present; otherwise [`DEFAULT_DIRECTIVE`] applies.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
