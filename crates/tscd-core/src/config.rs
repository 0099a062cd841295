//! Watch configuration
//!
//! Precedence (lowest to highest): defaults, `.tscd.json` at the workspace
//! root, `TSCD_*` environment variables.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = ".tscd.json";

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchConfig {
    #[serde(alias = "cache_size_mb")]
    pub cache_size_mb: u64,
    /// Reserved: accepted but not enforced.
    #[serde(alias = "debounce_ms")]
    pub debounce_ms: u64,
    #[serde(alias = "ignore_patterns")]
    pub ignore_patterns: Vec<String>,
    #[serde(alias = "auto_detect_workspaces")]
    pub auto_detect_workspaces: bool,
    /// Reserved: accepted but not enforced.
    #[serde(alias = "max_concurrent_queries")]
    pub max_concurrent_queries: usize,
    /// Reserved: accepted but not enforced.
    #[serde(alias = "persistent_cache")]
    pub persistent_cache: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            cache_size_mb: 50,
            debounce_ms: 300,
            ignore_patterns: Vec::new(),
            auto_detect_workspaces: true,
            max_concurrent_queries: 10,
            persistent_cache: false,
        }
    }
}

impl WatchConfig {
    /// Config file path for a workspace root
    pub fn path_for(root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(CONFIG_FILE_NAME)
    }

    /// Load defaults, then the workspace config file, then the environment.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(Self::path_for(root))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.log_reserved();
        Ok(config)
    }

    /// Read a config file; a missing file yields the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Apply `TSCD_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "TSCD_CACHE_SIZE_MB", &mut self.cache_size_mb);
        override_parsed(&lookup, "TSCD_DEBOUNCE_MS", &mut self.debounce_ms);
        override_parsed(
            &lookup,
            "TSCD_MAX_CONCURRENT_QUERIES",
            &mut self.max_concurrent_queries,
        );

        if let Some(raw) = lookup("TSCD_IGNORE_PATTERNS") {
            self.ignore_patterns = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }

        override_flag(
            &lookup,
            "TSCD_AUTO_DETECT_WORKSPACES",
            &mut self.auto_detect_workspaces,
        );
        override_flag(&lookup, "TSCD_PERSISTENT_CACHE", &mut self.persistent_cache);
    }

    fn log_reserved(&self) {
        let defaults = Self::default();
        if self.debounce_ms != defaults.debounce_ms
            || self.max_concurrent_queries != defaults.max_concurrent_queries
            || self.persistent_cache != defaults.persistent_cache
        {
            debug!(
                debounce_ms = self.debounce_ms,
                max_concurrent_queries = self.max_concurrent_queries,
                persistent_cache = self.persistent_cache,
                "Reserved options are accepted but have no effect"
            );
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!("Ignoring {}={:?}: not a valid number", key, raw),
        }
    }
}

fn override_flag<F>(lookup: &F, key: &str, slot: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *slot = true,
            "0" | "false" | "no" | "off" => *slot = false,
            _ => warn!("Ignoring {}={:?}: not a boolean", key, raw),
        }
    }
}
