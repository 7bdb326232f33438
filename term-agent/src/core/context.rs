//! Runtime configuration for interrogations.
//!
//! [`AgentConfig`] carries the DataFusion execution settings used for every
//! in-memory table, the step concurrency bound, and the logging knobs.

use crate::logging::LogConfig;
use crate::prelude::*;
use datafusion::execution::context::{SessionConfig, SessionContext};
use datafusion::execution::memory_pool::{FairSpillPool, MemoryPool};
use datafusion::execution::runtime_env::RuntimeEnvBuilder;
use std::sync::Arc;
use tracing::instrument;

/// Configuration of an [`Agent`](crate::core::Agent).
///
/// # Examples
///
/// ```rust
/// use term_agent::core::AgentConfig;
///
/// let config = AgentConfig {
///     max_concurrency: 4,
///     batch_size: 16384,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Batch size for DataFusion execution and file loading
    pub batch_size: usize,
    /// Target number of partitions for DataFusion execution
    pub target_partitions: usize,
    /// Memory limit for one step's DataFusion session, in bytes
    pub max_memory: usize,
    /// Maximum number of steps evaluated at the same time
    pub max_concurrency: usize,
    /// Logging behavior
    pub log: LogConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            batch_size: 8192,
            target_partitions: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4),
            max_memory: 2 * 1024 * 1024 * 1024, // 2GB
            max_concurrency: 1,
            log: LogConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Rejects zero-sized settings.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("target_partitions", self.target_partitions),
            ("max_memory", self.max_memory),
            ("max_concurrency", self.max_concurrency),
        ] {
            if value == 0 {
                return Err(TermError::Configuration(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    /// Builds a fresh DataFusion session with these settings.
    ///
    /// Each step gets its own session so that tables registered for one step
    /// never leak into another.
    #[instrument(skip(self), fields(batch_size = self.batch_size, max_memory = self.max_memory))]
    pub fn session_context(&self) -> Result<SessionContext> {
        let session_config = SessionConfig::new()
            .with_batch_size(self.batch_size)
            .with_target_partitions(self.target_partitions);

        let memory_pool = Arc::new(FairSpillPool::new(self.max_memory)) as Arc<dyn MemoryPool>;

        let runtime_env = RuntimeEnvBuilder::new()
            .with_memory_pool(memory_pool)
            .with_temp_file_path(std::env::temp_dir())
            .build()
            .map(Arc::new)?;

        Ok(SessionContext::new_with_config_rt(session_config, runtime_env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.batch_size, 8192);
        assert_eq!(config.max_concurrency, 1);
        assert!(config.target_partitions >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = AgentConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TermError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_session_context_uses_batch_size() {
        let config = AgentConfig {
            batch_size: 1024,
            ..Default::default()
        };
        let ctx = config.session_context().unwrap();
        assert_eq!(ctx.state().config().batch_size(), 1024);
    }
}
