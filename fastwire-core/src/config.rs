/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Codec configuration.
//!
//! This module provides the sizing and retry settings shared by the
//! primitive reader and writer.

use crate::error::{FastError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest legal varint on the wire (a 64-bit value).
pub const MAX_VARINT_BYTES: usize = 10;

/// Retry policy used while an adapter has no bytes to give (or take).
///
/// Attempts escalate from immediate retries to cooperative yields and
/// finally to short sleeps. There is no timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Number of immediate retries before yielding.
    pub spin_retries: u32,
    /// Number of `yield_now` retries before sleeping.
    pub yield_retries: u32,
    /// Sleep duration once spins and yields are exhausted.
    pub sleep: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            spin_retries: 1,
            yield_retries: 9,
            sleep: Duration::from_nanos(100),
        }
    }
}

impl BackoffConfig {
    /// Sets the number of immediate retries.
    #[must_use]
    pub const fn with_spin_retries(mut self, retries: u32) -> Self {
        self.spin_retries = retries;
        self
    }

    /// Sets the number of yielding retries.
    #[must_use]
    pub const fn with_yield_retries(mut self, retries: u32) -> Self {
        self.yield_retries = retries;
        self
    }

    /// Sets the sleep duration.
    #[must_use]
    pub const fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }
}

/// Configuration for a primitive reader or writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Capacity of the byte window in bytes.
    pub buffer_size: usize,
    /// Maximum number of simultaneously open groups.
    pub max_nesting: usize,
    /// Retry policy for empty fills and flushes.
    pub backoff: BackoffConfig,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            buffer_size: 2048,
            max_nesting: 32,
            backoff: BackoffConfig::default(),
        }
    }
}

impl CodecConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the window capacity.
    #[must_use]
    pub const fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the maximum group nesting depth.
    #[must_use]
    pub const fn with_max_nesting(mut self, depth: usize) -> Self {
        self.max_nesting = depth;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Checks the configuration for values the codec cannot run with.
    ///
    /// # Errors
    /// Returns `FastError::InvalidConfig` if the window cannot hold a full
    /// varint or the nesting depth is zero.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < MAX_VARINT_BYTES {
            return Err(FastError::InvalidConfig(format!(
                "buffer_size {} is smaller than the {MAX_VARINT_BYTES} byte varint maximum",
                self.buffer_size
            )));
        }
        if self.max_nesting == 0 {
            return Err(FastError::InvalidConfig(
                "max_nesting must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_config_defaults() {
        let config = CodecConfig::new();
        assert_eq!(config.buffer_size, 2048);
        assert_eq!(config.max_nesting, 32);
        assert_eq!(config.backoff.spin_retries, 1);
        assert_eq!(config.backoff.yield_retries, 9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_codec_config_builder() {
        let config = CodecConfig::new()
            .with_buffer_size(64)
            .with_max_nesting(4)
            .with_backoff(BackoffConfig::default().with_sleep(Duration::from_micros(5)));

        assert_eq!(config.buffer_size, 64);
        assert_eq!(config.max_nesting, 4);
        assert_eq!(config.backoff.sleep, Duration::from_micros(5));
    }

    #[test]
    fn test_codec_config_validate() {
        assert!(CodecConfig::new().with_buffer_size(4).validate().is_err());
        assert!(CodecConfig::new().with_max_nesting(0).validate().is_err());
        assert!(CodecConfig::new().with_buffer_size(10).validate().is_ok());
    }

    #[test]
    fn test_codec_config_partial_json() {
        let config: CodecConfig = serde_json::from_str(r#"{"buffer_size": 128}"#).unwrap();
        assert_eq!(config.buffer_size, 128);
        assert_eq!(config.max_nesting, 32);
    }
}
