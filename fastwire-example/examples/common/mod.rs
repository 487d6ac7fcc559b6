/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Common utilities shared across examples.

#![allow(dead_code)]

use fastwire::prelude::CodecConfig;
use std::env;

/// Environment variable holding a JSON encoded [`CodecConfig`].
pub const CONFIG_VAR: &str = "FASTWIRE_CONFIG";

/// Environment variable overriding the number of quotes in a feed.
pub const COUNT_VAR: &str = "FASTWIRE_COUNT";

/// Default number of quotes per run.
pub const DEFAULT_COUNT: u32 = 1_000;

/// Initializes logging for examples.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

/// Loads the codec configuration from `FASTWIRE_CONFIG`.
///
/// Missing fields keep their defaults, so `{"buffer_size": 64}` is enough to
/// shrink the window.
///
/// # Errors
/// Returns an error if the variable holds invalid JSON or an unusable
/// configuration.
pub fn load_config() -> anyhow::Result<CodecConfig> {
    let config = match env::var(CONFIG_VAR) {
        Ok(json) => serde_json::from_str::<CodecConfig>(&json)?,
        Err(_) => CodecConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Returns the number of quotes to generate.
#[must_use]
pub fn quote_count() -> u32 {
    env::var(COUNT_VAR)
        .ok()
        .and_then(|c| c.parse().ok())
        .unwrap_or(DEFAULT_COUNT)
}
