//! `tracing` subscriber setup for the agent binaries.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose events follow the configured level. Everything else
/// (HTTP client internals) is held at `warn`.
const AGENT_TARGETS: [&str; 4] = ["pwa_common", "pwa_net", "pwa_sw", "pwa_harness"];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON, for piping into log tooling.
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Level for the agent crates.
    pub level: Level,
    pub format: LogFormat,
    /// `EnvFilter` directives overriding both `level` and `RUST_LOG`.
    pub directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            directives: None,
        }
    }
}

impl LogConfig {
    /// Level from a `-v` count: none = info, one = debug, more = trace.
    pub fn from_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            level,
            ..Self::default()
        }
    }

    /// Filter directives derived from `level`.
    pub fn default_directives(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        let mut directives = vec!["warn".to_string()];
        directives.extend(AGENT_TARGETS.iter().map(|t| format!("{t}={level}")));
        directives.join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.default_directives());
        match &self.directives {
            Some(custom) => EnvFilter::try_new(custom).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_logging(config: &LogConfig) -> bool {
    let registry = tracing_subscriber::registry().with(config.env_filter());
    let verbose = config.level == Level::TRACE;

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_file(verbose).with_line_number(verbose))
            .try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    result.is_ok()
}
