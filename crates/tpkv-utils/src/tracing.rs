/// Installs the global subscriber: pretty format, RFC 3339 UTC timestamps,
/// `RUST_LOG` filtering with an `info` default.
pub fn setup_tracing() {
    use tracing_subscriber::fmt::time::UtcTime;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .finish()
        .init();
}
