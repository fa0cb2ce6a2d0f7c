use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// The scheduler scans every second; keep per-statement sqlx logs out of info
const QUIET_DIRECTIVES: &str = "sqlx::query=warn";

/// Initialize structured logging.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = parse_log_level(&config.level)?;
    let filter = default_filter(log_level);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&filter))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            let json_layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true)
                .with_line_number(true);
            registry.with(json_layer).try_init()?;
        }
        "pretty" => {
            let pretty_layer = fmt::layer().pretty().with_target(true).with_file(false);
            registry.with(pretty_layer).try_init()?;
        }
        other => return Err(anyhow::anyhow!("Invalid log format: {other}")),
    }

    Ok(())
}

fn default_filter(level: Level) -> String {
    format!("{},{QUIET_DIRECTIVES}", level.as_str().to_lowercase())
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

/// Correlation id attached to request and scheduler spans
#[must_use]
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
