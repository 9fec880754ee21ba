// Copyright 2025 trackrec authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration types and YAML loader with environment variable
// substitution.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::interpolate::LookupStrategy;
use crate::store::MIN_CAPACITY;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TrackrecConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sample-store settings shared by all devices
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Samples retained per device before the oldest is evicted
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,

    /// Default strategy for between-samples lookups
    #[serde(default)]
    pub interpolation: LookupStrategy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sample_capacity: default_sample_capacity(),
            interpolation: LookupStrategy::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "json" or "pretty"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_sample_capacity() -> usize {
    crate::store::DEFAULT_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<TrackrecConfig> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let content = Self::substitute_env_vars(&content);

        let config: TrackrecConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment
    /// variables. Unset variables without a default are left untouched.
    fn substitute_env_vars(content: &str) -> String {
        let re = match Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}") {
            Ok(re) => re,
            Err(_) => return content.to_string(),
        };

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    None => format!("${{{var_name}}}"),
                },
            }
        })
        .to_string()
    }

    fn validate(config: &TrackrecConfig) -> Result<()> {
        if config.store.sample_capacity < MIN_CAPACITY {
            bail!(
                "store.sample_capacity must be >= {} (got {})",
                MIN_CAPACITY,
                config.store.sample_capacity
            );
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            unknown => bail!(
                "Unknown log level: '{}'. Supported: trace, debug, info, warn, error",
                unknown
            ),
        }

        match config.logging.format.as_str() {
            "json" | "pretty" => {}
            unknown => bail!("Unknown log format: '{}'. Supported: json, pretty", unknown),
        }

        Ok(())
    }
}

/// Installs a global `tracing` subscriber per the logging configuration.
/// Returns an error if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("invalid log level '{}'", config.level))?;

    if config.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to install subscriber: {err}"))?;
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to install subscriber: {err}"))?;
    }
    Ok(())
}
