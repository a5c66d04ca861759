//! Log subscriber bootstrap for binaries and examples embedding the client.

use pacer_core::{ConfigError, PacerResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "PACER_LOG";

/// Install a global fmt subscriber filtered by `PACER_LOG`.
///
/// `default_directive` applies when the variable is unset. Returns `false`
/// when a global subscriber was already installed.
pub fn init_tracing(default_directive: &str, json: bool) -> PacerResult<bool> {
    let env_filter = build_filter(std::env::var(LOG_ENV).ok().as_deref(), default_directive)?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::debug!(json, "Tracing initialized");
    }
    Ok(installed)
}

fn build_filter(from_env: Option<&str>, default_directive: &str) -> PacerResult<EnvFilter> {
    let (source, directives) = match from_env.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) => (LOG_ENV, directives),
        None => ("default_directive", default_directive),
    };
    EnvFilter::try_new(directives).map_err(|e| {
        ConfigError::InvalidValue {
            field: source.to_string(),
            value: directives.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
