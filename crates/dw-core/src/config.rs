//! Configuration structures for the driftwatch pipeline.
//!
//! This module provides configuration types for each layer of the watch
//! pipeline:
//!
//! - [`BufferConfig`] - Per-path buffering (idle flush timeout, batch cap)
//! - [`RetryConfig`] - Watch registration retry policy
//! - [`DamperConfig`] - Cross-path quiescence window
//! - [`Config`] - Root configuration combining all settings
//!
//! All configuration types implement [`Default`] with the values the
//! pipeline was tuned for, and deserialize with `#[serde(default)]` so
//! partial configuration files work.

use std::time::Duration;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a per-path event buffer.
///
/// Controls when a buffering watcher flushes its accumulated events to
/// the batch callback.
///
/// # Examples
///
/// ```
/// use dw_core::BufferConfig;
///
/// let config = BufferConfig::default();
/// assert_eq!(config.flush_timeout_ms, 1000);
/// assert_eq!(config.max_events, 100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum idle time in milliseconds before a non-empty buffer is
    /// flushed.
    ///
    /// The buffer is checked at a tenth of this interval, so delivery
    /// lags the deadline by at most `flush_timeout_ms / 10`.
    pub flush_timeout_ms: u64,

    /// Hard cap on batch size.
    ///
    /// A buffer that exceeds this count is flushed early, in chunks of
    /// at most `max_events` each.
    pub max_events: usize,
}

impl BufferConfig {
    /// The idle flush timeout as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// The interval at which the buffer monitor wakes up to check the
    /// flush conditions (a tenth of the flush timeout, never less than
    /// 1ms so the monitor cannot busy-spin on tiny timeouts).
    #[inline]
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        let ms = self.flush_timeout_ms / 10;
        Duration::from_millis(if ms == 0 { 1 } else { ms })
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_timeout_ms: 1000,
            max_events: 100,
        }
    }
}

/// Retry policy for watch registration.
///
/// A watched directory may not exist yet, or may disappear while being
/// watched. Registration is retried at a fixed interval rather than
/// with exponential backoff.
///
/// # Examples
///
/// ```
/// use dw_core::RetryConfig;
///
/// let config = RetryConfig::default();
/// assert_eq!(config.missing_path_ms, 10_000);
/// assert_eq!(config.after_error_ms, Some(10_000));
///
/// // No-recovery policy: the worker terminates on an unexpected error.
/// let strict = RetryConfig { after_error_ms: None, ..RetryConfig::default() };
/// assert!(strict.after_error().is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// How long to wait, in milliseconds, before retrying registration
    /// when the watched directory does not exist.
    pub missing_path_ms: u64,

    /// How long to wait, in milliseconds, before re-registering after an
    /// unexpected watch error.
    ///
    /// `None` selects the no-recovery policy: the worker for that path
    /// terminates and the path is considered fatally stopped.
    pub after_error_ms: Option<u64>,
}

impl RetryConfig {
    /// The missing-path retry interval as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn missing_path(&self) -> Duration {
        Duration::from_millis(self.missing_path_ms)
    }

    /// The after-error retry interval, if recovery is enabled.
    #[inline]
    #[must_use]
    pub fn after_error(&self) -> Option<Duration> {
        self.after_error_ms.map(Duration::from_millis)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            missing_path_ms: 10_000,
            after_error_ms: Some(10_000),
        }
    }
}

/// Configuration for the cross-path damper.
///
/// The damper withholds the final callback until the whole watched set
/// has been quiet for the configured window.
///
/// # Examples
///
/// ```
/// use dw_core::DamperConfig;
///
/// let config = DamperConfig::default();
/// assert_eq!(config.quiet_ms, 0); // prompt delivery
///
/// let damped = DamperConfig { quiet_ms: 2000 };
/// assert_eq!(damped.quiet_window().as_secs(), 2);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DamperConfig {
    /// The quiescence window in milliseconds.
    ///
    /// Every new burst of activity restarts the window; the callback
    /// runs only once the window elapses without activity. Zero means
    /// each wake-up delivers promptly.
    pub quiet_ms: u64,
}

impl DamperConfig {
    /// The quiescence window as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_ms)
    }
}

/// Root configuration for driftwatch.
///
/// Combines the per-layer configurations into a single structure that
/// can be loaded from a configuration file or constructed
/// programmatically.
///
/// # Examples
///
/// ```
/// use dw_core::Config;
///
/// let config = Config::default();
/// let json = serde_json::to_string_pretty(&config).unwrap();
/// let parsed: Config = serde_json::from_str(&json).unwrap();
/// assert_eq!(config, parsed);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-path buffering settings.
    pub buffer: BufferConfig,

    /// Watch registration retry policy.
    pub retry: RetryConfig,

    /// Cross-path damper settings.
    pub damper: DamperConfig,
}

impl Config {
    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingDirectory`] if the file does not exist,
    /// [`ConfigError::InvalidPath`] if it is not a regular file,
    /// [`ConfigError::Io`] / [`ConfigError::Parse`] on read or parse
    /// failure, and whatever [`validate`](Self::validate) rejects.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingDirectory(path.to_owned()));
        }
        if !path.is_file() {
            return Err(ConfigError::InvalidPath {
                path: path.to_owned(),
                reason: "not a regular file".to_owned(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects option values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidOption`] if the buffer flush timeout or
    /// the batch cap is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer.flush_timeout_ms == 0 {
            return Err(ConfigError::InvalidOption {
                option: "buffer.flush_timeout_ms".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.buffer.max_events == 0 {
            return Err(ConfigError::InvalidOption {
                option: "buffer.max_events".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}
