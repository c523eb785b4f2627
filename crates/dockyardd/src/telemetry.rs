//! Structured telemetry initialisation for the daemon.
//!
//! Lifecycle events on the health target stay visible at `info` whatever the
//! configured filter, unless the filter names that target itself.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::{Directive, ParseError};
use tracing_subscriber::fmt;

use dockyard_config::{DaemonConfig, LogFormat};

use crate::health::HEALTH_TARGET;

static TELEMETRY: OnceCell<TelemetryHandle> = OnceCell::new();

/// Describes the subscriber installed by [`initialise`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryHandle {
    filter: String,
    format: LogFormat,
}

impl TelemetryHandle {
    /// Effective filter, including the lifecycle directive.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Output format.
    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured log filter expression does not parse.
    #[error("invalid log filter '{expression}': {source}")]
    Filter {
        /// Expression as configured.
        expression: String,
        /// Parse failure.
        #[source]
        source: ParseError,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber on first use.
///
/// Later calls return the handle of the subscriber already installed and
/// ignore `config`.
pub fn initialise(config: &DaemonConfig) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY
        .get_or_try_init(|| install_subscriber(config))
        .cloned()
}

fn install_subscriber(config: &DaemonConfig) -> Result<TelemetryHandle, TelemetryError> {
    let filter = build_filter(config.log_filter())?;
    let handle = TelemetryHandle {
        filter: filter.to_string(),
        format: config.log_format(),
    };

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };
    let subscriber: Box<dyn Subscriber + Send + Sync> = match handle.format {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    Ok(handle)
}

/// Parses `expression` and keeps health events at `info`.
fn build_filter(expression: &str) -> Result<EnvFilter, TelemetryError> {
    let invalid = |source| TelemetryError::Filter {
        expression: expression.to_owned(),
        source,
    };
    let filter = EnvFilter::builder().parse(expression).map_err(invalid)?;
    if names_health_target(expression) {
        return Ok(filter);
    }
    let lifecycle: Directive = format!("{HEALTH_TARGET}=info").parse().map_err(invalid)?;
    Ok(filter.add_directive(lifecycle))
}

fn names_health_target(expression: &str) -> bool {
    expression
        .split(',')
        .any(|directive| directive.trim().starts_with(HEALTH_TARGET))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("warn")]
    #[case("dockyardd=debug,dockyard_engine=warn")]
    fn lifecycle_events_survive_quiet_filters(#[case] expression: &str) {
        let filter = build_filter(expression).expect("filter parses");
        assert!(
            filter.to_string().contains(&format!("{HEALTH_TARGET}=info")),
            "{filter}"
        );
    }

    #[test]
    fn explicit_health_directive_wins() {
        let expression = format!("info,{HEALTH_TARGET}=error");
        let filter = build_filter(&expression).expect("filter parses");
        let rendered = filter.to_string();
        assert!(rendered.contains(&format!("{HEALTH_TARGET}=error")), "{rendered}");
        assert!(!rendered.contains(&format!("{HEALTH_TARGET}=info")), "{rendered}");
    }

    #[test]
    fn invalid_filter_names_the_expression() {
        let error = build_filter("dockyardd=loud").expect_err("unknown level");
        assert!(matches!(
            &error,
            TelemetryError::Filter { expression, .. } if expression == "dockyardd=loud"
        ));
        assert!(error.to_string().starts_with("invalid log filter 'dockyardd=loud'"));
    }
}
