//! Configuration for Tabula
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use crate::error::{Result, TableError};

/// Main configuration shared by tables, writers and journals
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Lock Configuration
    // -------------------------------------------------------------------------
    /// How a writer waits for active readers to leave a memory table
    pub write_wait: WriteWaitPolicy,

    // -------------------------------------------------------------------------
    // Background Writer Configuration
    // -------------------------------------------------------------------------
    /// Batching and retry behaviour of the table writer
    pub writer: WriterConfig,

    // -------------------------------------------------------------------------
    // Journal Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the table journal
    pub journal_sync: JournalSyncStrategy,
}

/// Wait policy for writers blocked by active readers.
///
/// The writer spin-yields for at most `spin_timeout`, releasing the gate
/// between attempts. Afterwards (or immediately, when `None`) it blocks on
/// the gate until the last reader leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteWaitPolicy {
    pub spin_timeout: Option<Duration>,
}

impl WriteWaitPolicy {
    /// Skip the spin phase entirely
    pub fn blocking() -> Self {
        Self { spin_timeout: None }
    }

    /// Spin for up to `timeout` before blocking
    pub fn spin(timeout: Duration) -> Self {
        Self {
            spin_timeout: Some(timeout),
        }
    }
}

impl Default for WriteWaitPolicy {
    fn default() -> Self {
        Self::spin(Duration::from_millis(100))
    }
}

/// Table writer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    /// Max transactions committed to the target per batch
    pub batch_size: usize,

    /// How long the worker sleeps on an empty log before re-checking (milliseconds)
    pub idle_wait_ms: u64,

    /// Delay before retrying after a transient commit failure (milliseconds)
    pub retry_delay_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            idle_wait_ms: 100,
            retry_delay_ms: 500,
        }
    }
}

/// Journal sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalSyncStrategy {
    /// fsync after every record (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced records (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            write_wait: WriteWaitPolicy::default(),
            writer: WriterConfig::default(),
            journal_sync: JournalSyncStrategy::EveryNEntries { count: 100 },
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the writer and journal cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.writer.batch_size == 0 {
            return Err(TableError::Config(
                "writer batch size must be at least 1".to_string(),
            ));
        }
        if let JournalSyncStrategy::EveryNEntries { count: 0 } = self.journal_sync {
            return Err(TableError::Config(
                "journal sync count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the writer wait policy used by memory tables
    pub fn write_wait(mut self, policy: WriteWaitPolicy) -> Self {
        self.config.write_wait = policy;
        self
    }

    /// Set the max batch size committed by the table writer
    pub fn writer_batch_size(mut self, size: usize) -> Self {
        self.config.writer.batch_size = size;
        self
    }

    /// Set the idle wait of the table writer (in milliseconds)
    pub fn writer_idle_wait_ms(mut self, ms: u64) -> Self {
        self.config.writer.idle_wait_ms = ms;
        self
    }

    /// Set the retry delay after a transient failure (in milliseconds)
    pub fn writer_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.writer.retry_delay_ms = ms;
        self
    }

    /// Set the journal sync strategy
    pub fn journal_sync(mut self, strategy: JournalSyncStrategy) -> Self {
        self.config.journal_sync = strategy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.write_wait.spin_timeout,
            Some(Duration::from_millis(100))
        );
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = Config::builder().writer_batch_size(0).build();
        assert!(matches!(config.validate(), Err(TableError::Config(_))));
    }

    #[test]
    fn test_zero_sync_count_rejected() {
        let config = Config::builder()
            .journal_sync(JournalSyncStrategy::EveryNEntries { count: 0 })
            .build();
        assert!(matches!(config.validate(), Err(TableError::Config(_))));
    }
}
