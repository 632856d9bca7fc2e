use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metrics::{
    EXTERNAL_CHANGE_TOTAL, LOAD_FAILED_TOTAL, LOAD_TOTAL, STALE_LOAD_DISCARDED_TOTAL,
    SUBSCRIBERS, WRITE_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            LOAD_TOTAL,
            Unit::Count,
            "Total number of backend reads issued for unloaded keys."
        );
        describe_counter!(
            STALE_LOAD_DISCARDED_TOTAL,
            Unit::Count,
            "Total number of load results discarded because a write superseded them."
        );
        describe_counter!(
            LOAD_FAILED_TOTAL,
            Unit::Count,
            "Total number of backend reads that failed."
        );
        describe_counter!(
            WRITE_TOTAL,
            Unit::Count,
            "Total number of local writes applied to the cache."
        );
        describe_counter!(
            EXTERNAL_CHANGE_TOTAL,
            Unit::Count,
            "Total number of change notifications delivered to other contexts."
        );
        describe_gauge!(
            SUBSCRIBERS,
            Unit::Count,
            "Current number of registered key subscribers."
        );
    });
}
