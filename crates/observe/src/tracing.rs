use {
    std::sync::Once,
    tracing_subscriber::{EnvFilter, fmt},
};

static INITIALIZED: Once = Once::new();

/// Initializes the global tracing subscriber exactly once.
///
/// `env_filter` is the default directive set; the `RUST_LOG` environment
/// variable takes precedence when set. Calling this a second time is a no-op
/// so tests can initialize freely.
pub fn initialize(env_filter: &str) {
    INITIALIZED.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(env_filter));
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}
