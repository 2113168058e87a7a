//! Engine configuration
//!
//! Read from `tessera.toml` (path overridable on the CLI).
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`TESSERA_DEV_MODE`, `TESSERA_MAX_SCRIPT_DEPTH`)
//! 2. Config file
//! 3. Defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TesseraError};
use crate::util::constants::MAX_SCRIPT_DEPTH;

/// Default config file name, looked up in the working directory
pub const CONFIG_FILE: &str = "tessera.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Render template failures visibly inside the widget container
    pub dev_mode: bool,

    /// Bound on nested script calls
    pub max_script_depth: usize,

    /// Default `tracing` directive when `RUST_LOG` is unset
    pub log_filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            max_script_depth: MAX_SCRIPT_DEPTH,
            log_filter: None,
        }
    }
}

impl EngineConfig {
    pub fn default_path() -> PathBuf {
        PathBuf::from(CONFIG_FILE)
    }

    /// Load configuration from file
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns error if the file exists but is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| TesseraError::ConfigError {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| TesseraError::ConfigError {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    /// Unparseable values are ignored.
    pub fn with_env(self) -> Self {
        self.with_vars(|name| std::env::var(name).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(flag) = var("TESSERA_DEV_MODE") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.dev_mode = true,
                "0" | "false" | "no" | "off" => self.dev_mode = false,
                _ => {}
            }
        }
        if let Some(depth) = var("TESSERA_MAX_SCRIPT_DEPTH")
            .and_then(|d| d.trim().parse::<usize>().ok())
            .filter(|d| *d > 0)
        {
            self.max_script_depth = depth;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_script_depth == 0 {
            return Err(TesseraError::ConfigError {
                reason: "max_script_depth must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn dev() -> Self {
        Self {
            dev_mode: true,
            ..Self::default()
        }
    }
}
