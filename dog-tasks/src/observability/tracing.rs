/// Install a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` if a subscriber was already installed.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Same as [`init_tracing`] but emitting JSON lines
#[cfg(feature = "tracing-basic")]
pub fn init_json_tracing() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
