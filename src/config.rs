//! Configuration for the shared background worker pool.
//!
//! This module provides:
//! - A pool configuration type with sensible defaults
//! - Layered loading (defaults + environment overrides)
//! - Validation for guardrail invariants
//!
//! Note: There is no config-file parsing; configuration is programmatic
//! with environment overrides only.

use core::fmt;

/// Environment variable overriding the worker cap.
const POOL_THREADS_ENV: &str = "STRAND_POOL_THREADS";

/// Configuration for the shared worker pool that runs scheduler loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of worker threads the pool may create.
    ///
    /// Workers are created lazily as run loops are handed off; a worker
    /// that unwinds on a propagated fault is replaced. Run loops never
    /// block a worker while idle (they exit and are respawned on demand),
    /// so a small cap cannot deadlock the scheduler.
    pub max_threads: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        Self {
            max_threads: parallelism.max(2),
        }
    }
}

impl PoolConfig {
    /// Returns the default configuration with environment overrides applied.
    ///
    /// `STRAND_POOL_THREADS` overrides the worker cap; unparsable values
    /// are ignored in favor of the default.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(threads) = std::env::var(POOL_THREADS_ENV)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            config.max_threads = threads;
        }
        config
    }

    /// Validates the configuration for basic sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::InvalidMaxThreads);
        }
        Ok(())
    }

    /// Returns the validated configuration, falling back to defaults when
    /// the environment produced an invalid value.
    #[must_use]
    pub fn from_env_validated() -> Self {
        let config = Self::from_env();
        if config.validate().is_ok() {
            config
        } else {
            Self::default()
        }
    }
}

/// Validation error for [`PoolConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The worker cap must be at least one.
    InvalidMaxThreads,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMaxThreads => write!(f, "pool worker cap must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}
