use std::io::{self, IsTerminal};
use std::sync::OnceLock;

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::TelemetryError;

static TRACING_INITIALISED: OnceLock<Result<(), TelemetryError>> = OnceLock::new();

/// Initialises structured logging and OpenTelemetry tracing support.
///
/// `RUST_LOG` takes precedence over `default_level`. Only the first call in a
/// process has any effect.
pub(crate) fn initialise_tracing(
    service_name: &str,
    default_level: LevelFilter,
) -> Result<(), &'static TelemetryError> {
    TRACING_INITIALISED
        .get_or_init(|| initialise_tracing_once(service_name, default_level))
        .as_ref()
        .copied()
}

fn initialise_tracing_once(
    service_name: &str,
    default_level: LevelFilter,
) -> Result<(), TelemetryError> {
    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder().build();
    let tracer = tracer_provider.tracer(service_name.to_owned());
    global::set_tracer_provider(tracer_provider);

    let log_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(service_name, default_level)));

    if io::stderr().is_terminal() {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(io::stderr)
                    .with_filter(log_filter),
            )
            .with(OpenTelemetryLayer::new(tracer))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(io::stderr)
                    .with_filter(log_filter),
            )
            .with(OpenTelemetryLayer::new(tracer))
            .try_init()?;
    }

    Ok(())
}

/// Applies the chosen level to this crate and keeps dependencies at `warn`.
fn default_directive(service_name: &str, level: LevelFilter) -> String {
    format!(
        "warn,{service_name}={}",
        level.to_string().to_ascii_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(LevelFilter::INFO, "warn,pepperoni=info")]
    #[case(LevelFilter::DEBUG, "warn,pepperoni=debug")]
    fn default_directive_scopes_level_to_crate(
        #[case] level: LevelFilter,
        #[case] expected: &str,
    ) {
        assert_eq!(expected, default_directive("pepperoni", level));
    }
}
