use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from
/// `default_level` (e.g. "info", "pulse_engine=debug,warn"). `json`
/// selects machine-readable output for fleet log shippers; the default
/// human format keeps file/line context for local debugging.
///
/// Safe to call multiple times (e.g. in tests) -- subsequent calls are
/// no-ops.
pub fn init_logging(service_name: &str, default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true);

    if json {
        builder.json().try_init().ok();
    } else {
        builder.try_init().ok();
    }

    tracing::info!(
        service = service_name,
        json,
        "logging initialised"
    );
}
