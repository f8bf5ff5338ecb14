//! Tracing subscriber bootstrap.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines with targets.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `default_directive`.
///
/// Returns `false` when a global subscriber was already installed, which
/// leaves that subscriber in place.
///
/// # Errors
///
/// Fails when `default_directive` is not a valid filter directive.
pub fn init_tracing(format: LogFormat, default_directive: &str) -> anyhow::Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)?,
    };
    let json = format == LogFormat::Json;

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_target(true)))
        .with((!json).then(|| fmt::layer().with_target(true)))
        .try_init()
        .is_ok();
    if !installed {
        tracing::debug!("global tracing subscriber already set, keeping it");
    }
    Ok(installed)
}
