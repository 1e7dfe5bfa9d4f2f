//! Provisioning logs as one JSON object per line.
//!
//! Request spans carry the `x-request-id`, so every Exchange or Graph call a
//! provisioning request makes can be found by that id.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// HTTP client internals that drown out provisioning events at `debug`.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "h2", "rustls", "reqwest"];

/// Appends `target=warn` for each quiet target the filter does not mention.
fn filter_directive(filter: &str) -> String {
    let mut directive = filter.trim().to_string();
    for target in QUIET_TARGETS {
        let named = directive
            .split(',')
            .any(|d| d.trim().split('=').next() == Some(*target));
        if !named {
            if !directive.is_empty() {
                directive.push(',');
            }
            directive.push_str(target);
            directive.push_str("=warn");
        }
    }
    directive
}

/// Installs the JSON subscriber for the service.
///
/// `RUST_LOG` in the process environment wins over `filter` (the configured
/// level). An unparsable filter stops the process before the listener binds.
pub fn init_logging(filter: &str) {
    let directive = filter_directive(filter);
    let filter_layer =
        match EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directive)) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("FATAL: Invalid log filter '{directive}': {e}");
                std::process::exit(1);
            }
        };

    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter_layer)
        .init();

    tracing::info!(filter = %directive, "Provisioner logging ready");
}

#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}
