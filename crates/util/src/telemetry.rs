use metrics::describe_counter;
use std::{fmt as stdfmt, sync::OnceLock};
use tracing_subscriber::{
    fmt::{self as tracing_fmt, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::{ClientConfig, Environment};

#[derive(Debug)]
pub enum TelemetryError {
    Tracing(tracing_subscriber::util::TryInitError),
}

impl stdfmt::Display for TelemetryError {
    fn fmt(&self, f: &mut stdfmt::Formatter<'_>) -> stdfmt::Result {
        match self {
            Self::Tracing(err) => write!(f, "failed to initialize tracing: {err}"),
        }
    }
}

impl std::error::Error for TelemetryError {}

impl From<tracing_subscriber::util::TryInitError> for TelemetryError {
    fn from(value: tracing_subscriber::util::TryInitError) -> Self {
        Self::Tracing(value)
    }
}

static TRACING_INIT: OnceLock<()> = OnceLock::new();
static METRICS_DESCRIBED: OnceLock<()> = OnceLock::new();

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Installs the global tracing subscriber. Calling it more than once is a no-op.
pub fn init_tracing(config: &ClientConfig) -> Result<(), TelemetryError> {
    if TRACING_INIT.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match config.environment {
        Environment::Development | Environment::Test => {
            let fmt_layer = tracing_fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_timer(UtcTime::rfc_3339())
                .event_format(tracing_fmt::format().pretty());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
        Environment::Production => {
            let fmt_layer = tracing_fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_timer(UtcTime::rfc_3339())
                .json();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    TRACING_INIT.set(()).ok();
    tracing::info!(
        stage = "telemetry",
        env = %config.environment.as_str(),
        version = BUILD_VERSION,
        "tracing initialized"
    );
    Ok(())
}

/// Registers descriptions for the counters emitted by the client.
///
/// The library never installs a recorder; hosts that do should call this once
/// after installing theirs.
pub fn describe_metrics() {
    METRICS_DESCRIBED.get_or_init(|| {
        describe_counter!(
            "helix_token_refresh_total",
            "Count of successful credential refreshes, labelled by kind and trigger"
        );
        describe_counter!(
            "helix_token_refresh_failures_total",
            "Count of credential refreshes rejected by the token issuer, labelled by kind"
        );
        describe_counter!(
            "helix_auth_retry_total",
            "Count of requests resent after a 401 authentication challenge"
        );
        describe_counter!(
            "webhook_invalid_signature_total",
            "Count of webhook callbacks rejected due to invalid signatures"
        );
    });
}
