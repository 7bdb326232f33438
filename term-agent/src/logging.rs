//! Logging configuration for interrogations.
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the application. [`setup::init_logging`] is provided for binaries and
//! examples that want a ready-made one.

use tracing::Level;

/// Controls how chatty an interrogation is.
///
/// The flags gate the more expensive events (per-step details, rendered SQL)
/// so that production runs pay nothing for them.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level for agent components
    pub base_level: Level,
    /// Whether to log per-step evaluation details
    pub log_step_details: bool,
    /// Whether to log data source resolution
    pub log_data_operations: bool,
    /// Whether to log the SQL sent to remote databases
    pub log_sql: bool,
    /// Maximum length for logged field values
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: Level::INFO,
            log_step_details: false,
            log_data_operations: true,
            log_sql: false,
            max_field_length: 256,
        }
    }
}

impl LogConfig {
    /// Creates a verbose configuration suitable for debugging.
    pub fn verbose() -> Self {
        Self {
            base_level: Level::DEBUG,
            log_step_details: true,
            log_data_operations: true,
            log_sql: true,
            max_field_length: 1024,
        }
    }

    /// Creates a minimal configuration for production.
    pub fn production() -> Self {
        Self {
            base_level: Level::WARN,
            log_step_details: false,
            log_data_operations: false,
            log_sql: false,
            max_field_length: 128,
        }
    }
}

/// Logs step evaluation details when enabled in the [`LogConfig`].
#[macro_export]
macro_rules! log_step {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_step_details {
            tracing::debug!($($arg)*);
        }
    };
}

/// Logs data source operations when enabled in the [`LogConfig`].
#[macro_export]
macro_rules! log_data_op {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_data_operations {
            tracing::info!($($arg)*);
        }
    };
}

/// Logs rendered SQL when enabled in the [`LogConfig`].
#[macro_export]
macro_rules! log_sql {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_sql {
            tracing::debug!($($arg)*);
        }
    };
}

/// Truncates a string to at most `max_length` bytes, on a char boundary.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Subscriber setup for applications.
pub mod setup {
    use tracing::Level;

    /// Configuration for [`init_logging`].
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for everything else
        pub level: Level,
        /// Log level for the `term_agent` target
        pub agent_level: Level,
        /// Whether to emit JSON lines
        pub json_format: bool,
        /// Explicit filter directive, overrides the two levels
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                agent_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// JSON output, warnings only outside the agent.
        pub fn production() -> Self {
            Self {
                level: Level::WARN,
                agent_level: Level::INFO,
                json_format: true,
                env_filter: None,
            }
        }

        /// Human-readable output at debug level.
        pub fn development() -> Self {
            Self {
                level: Level::DEBUG,
                agent_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }

        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        pub fn with_agent_level(mut self, level: Level) -> Self {
            self.agent_level = level;
            self
        }

        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Builds the filter directive string.
        pub fn env_filter(&self) -> String {
            match &self.env_filter {
                Some(filter) => filter.clone(),
                None => format!(
                    "{},term_agent={}",
                    self.level.as_str().to_lowercase(),
                    self.agent_level.as_str().to_lowercase()
                ),
            }
        }
    }

    /// Installs a global `tracing` subscriber.
    ///
    /// `RUST_LOG` takes precedence over the configured filter. Fails if a
    /// global subscriber is already installed.
    ///
    /// ```rust,no_run
    /// use term_agent::logging::setup::{init_logging, LoggingConfig};
    ///
    /// init_logging(LoggingConfig::development().with_json_format(true)).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(config.env_filter()))?;

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}
