//! Subscriber setup for binaries built on enclave.
//!
//! The library crates only emit `tracing` events. A binary that wants them
//! on stderr calls [`init`] once at startup (requires the
//! `tracing-subscriber` feature); otherwise it installs its own subscriber.
//!
//! | Variable             | Values                                  | Default |
//! |----------------------|-----------------------------------------|---------|
//! | `ENCLAVE_LOG_LEVEL`  | `trace`, `debug`, `info`, `warn`, `error` | `warn`  |
//! | `ENCLAVE_LOG_FORMAT` | `json`, `pretty`, `compact`             | `json`  |
//! | `ENCLAVE_DEBUG`      | `true`, `1`, `yes`                      | off     |
//!
//! `ENCLAVE_DEBUG` raises the default level to `debug`. Nothing is installed
//! unless one of `ENCLAVE_LOG_LEVEL` or `ENCLAVE_DEBUG` is set.

use std::env;
use std::str::FromStr;
use std::sync::Once;

use tracing::Level;

const LEVEL_VAR: &str = "ENCLAVE_LOG_LEVEL";
const FORMAT_VAR: &str = "ENCLAVE_LOG_FORMAT";
const DEBUG_VAR: &str = "ENCLAVE_DEBUG";

/// Crates whose events pass the filter.
const TARGETS: [&str; 5] = [
    "enclave",
    "enclave_schema",
    "enclave_tenant",
    "enclave_postgres",
    "enclave_cli",
];

static INIT: Once = Once::new();

/// Event rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line, human oriented.
    Pretty,
    /// One short line per event.
    Compact,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "compact" => Self::Compact,
            _ => Self::Json,
        }
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    /// Most verbose level emitted.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Whether the environment asked for logging at all.
    pub requested: bool,
}

impl LogSettings {
    /// Read the `ENCLAVE_*` variables.
    pub fn from_env() -> Self {
        Self::resolve(|key| env::var(key).ok())
    }

    /// Resolve settings from an arbitrary variable lookup.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let debug = lookup(DEBUG_VAR).is_some_and(|v| is_truthy(&v));
        let explicit = lookup(LEVEL_VAR);
        let fallback = if debug { Level::DEBUG } else { Level::WARN };
        Self {
            level: explicit
                .as_deref()
                .and_then(|v| Level::from_str(v).ok())
                .unwrap_or(fallback),
            format: lookup(FORMAT_VAR)
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            requested: debug || explicit.is_some(),
        }
    }

    /// `EnvFilter` directives for every enclave crate at this level.
    pub fn directives(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

/// Install a subscriber if the environment asks for one.
pub fn init() {
    let settings = LogSettings::from_env();
    if settings.requested {
        install(settings);
    }
}

/// Install a subscriber at `level`, overriding `ENCLAVE_LOG_LEVEL`.
///
/// An unrecognized level installs at `warn`.
pub fn init_with_level(level: &str) {
    let mut settings = LogSettings::from_env();
    settings.level = Level::from_str(level).unwrap_or(Level::WARN);
    install(settings);
}

/// Only the first call in a process takes effect.
fn install(settings: LogSettings) {
    INIT.call_once(|| {
        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let filter = EnvFilter::try_new(settings.directives())
                .unwrap_or_else(|_| EnvFilter::new("warn"));
            let layer = match settings.format {
                LogFormat::Json => fmt::layer().json().boxed(),
                LogFormat::Pretty => fmt::layer().pretty().boxed(),
                LogFormat::Compact => fmt::layer().compact().boxed(),
            };
            if tracing_subscriber::registry()
                .with(layer)
                .with(filter)
                .try_init()
                .is_ok()
            {
                tracing::info!(
                    level = %settings.level,
                    format = ?settings.format,
                    "Enclave logging initialized"
                );
            }
        }

        #[cfg(not(feature = "tracing-subscriber"))]
        let _ = settings;
    });
}
