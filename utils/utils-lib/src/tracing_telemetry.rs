use crate::constants::RUST_LOG_SILENCE_DEFAULTS;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Fmt Layer for console output.
pub enum FmtLayer {
    /// Output traces to stdout.
    Stdout,
    /// Output traces to stderr.
    Stderr,
    /// Don't output traces to console.
    None,
}

/// Tracing telemetry style.
#[derive(Debug, Clone, Copy, strum_macros::EnumString, strum_macros::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum FmtStyle {
    /// Compact style.
    Compact,
    /// Pretty Style.
    Pretty,
    /// JSON Style.
    Json,
}

/// Build the log filter from `RUST_LOG`, defaulting to `info`, with the noisy
/// dependencies silenced unless explicitly overridden.
pub fn rust_log_filter() -> EnvFilter {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let directives = format!("{RUST_LOG_SILENCE_DEFAULTS},{rust_log}");
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Tracing telemetry builder.
pub struct TracingTelemetry {
    writer: FmtLayer,
    style: FmtStyle,
    colours: bool,
}

impl TracingTelemetry {
    /// Tracing telemetry default builder.
    pub fn builder() -> Self {
        Self {
            writer: FmtLayer::Stdout,
            style: FmtStyle::Pretty,
            colours: true,
        }
    }
    /// Specify writer stream.
    pub fn with_writer(self, writer: FmtLayer) -> TracingTelemetry {
        TracingTelemetry { writer, ..self }
    }
    /// Specify style.
    pub fn with_style(self, style: FmtStyle) -> TracingTelemetry {
        TracingTelemetry { style, ..self }
    }
    /// Specify whether colour is needed or not.
    pub fn with_colours(self, colours: bool) -> TracingTelemetry {
        TracingTelemetry { colours, ..self }
    }

    /// Initialize the telemetry instance.
    /// Does nothing if a global subscriber has already been installed.
    pub fn init(self, service_name: &str) {
        let stdout = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(self.colours);
        let stderr = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(self.colours);

        let subscriber = Registry::default().with(rust_log_filter());

        let result = match (self.writer, self.style) {
            (FmtLayer::Stderr, FmtStyle::Compact) => subscriber.with(stderr.compact()).try_init(),
            (FmtLayer::Stdout, FmtStyle::Compact) => subscriber.with(stdout.compact()).try_init(),
            (FmtLayer::Stderr, FmtStyle::Pretty) => subscriber.with(stderr.pretty()).try_init(),
            (FmtLayer::Stdout, FmtStyle::Pretty) => subscriber.with(stdout.pretty()).try_init(),
            (FmtLayer::Stdout, FmtStyle::Json) => subscriber.with(stdout.json()).try_init(),
            (FmtLayer::Stderr, FmtStyle::Json) => subscriber.with(stderr.json()).try_init(),
            (FmtLayer::None, _) => subscriber.try_init(),
        };
        match result {
            Ok(()) => tracing::debug!(service = service_name, "Tracing initialised"),
            Err(error) => tracing::debug!(%error, "Tracing already initialised"),
        }
    }
}
