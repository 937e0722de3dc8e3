use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber driven by `RUST_LOG` (default `book_exchange=info`).
/// Calling it again once a subscriber is set is a no-op.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("book_exchange=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
