// ⚙️ Configuration
//
// Precedence, lowest to highest:
//   1. built-in defaults
//   2. TOML file (`--config`)
//   3. environment (PIPELINE_DATABASE, PIPELINE_BIND)
//   4. CLI flags (applied by the binaries)
//
// Example file:
//
//   database = "data/pipeline.db"
//   bind = "127.0.0.1:8080"
//   log_filter = "pipeline_dashboard=debug,info"
//   log_file = "pipeline.log"
//
//   [views]
//   trend_window = 3
//   top_companies = 5

use crate::dashboard::ViewOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DATABASE_ENV: &str = "PIPELINE_DATABASE";
pub const BIND_ENV: &str = "PIPELINE_BIND";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: PathBuf,
    pub bind: String,
    /// `EnvFilter` directive, used when RUST_LOG is unset
    pub log_filter: String,
    /// Where logs go while the TUI owns the terminal
    pub log_file: Option<PathBuf>,
    pub views: ViewConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub trend_window: usize,
    pub top_companies: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: PathBuf::from("pipeline.db"),
            bind: "0.0.0.0:3000".to_string(),
            log_filter: "info".to_string(),
            log_file: None,
            views: ViewConfig::default(),
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        let options = ViewOptions::default();
        ViewConfig {
            trend_window: options.trend_window,
            top_companies: options.top_companies,
        }
    }
}

impl Config {
    /// Defaults, then `path` if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Override from environment; `lookup` stands in for `std::env::var`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(database) = lookup(DATABASE_ENV).filter(|v| !v.trim().is_empty()) {
            self.database = PathBuf::from(database);
        }
        if let Some(bind) = lookup(BIND_ENV).filter(|v| !v.trim().is_empty()) {
            self.bind = bind;
        }
    }

    pub fn view_options(&self) -> ViewOptions {
        ViewOptions {
            trend_window: self.views.trend_window,
            top_companies: self.views.top_companies,
        }
    }
}
