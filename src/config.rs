use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding [`FilterConfig::path`].
pub const FILTER_PATH_ENV: &str = "PECA_FILTER_PATH";

/// Tunables for the whole ingestion pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// MPEG-TS reader settings
    pub ts: TsConfig,
    /// Custom filter settings
    pub filter: FilterConfig,
}

/// MPEG-TS reader settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TsConfig {
    /// Minimum time between two content flushes, in milliseconds
    pub flush_interval_ms: u64,
    /// Cap of the rolling content cache
    pub content_cache_limit: usize,
    /// Cap of the PAT/PMT header buffer
    pub header_cache_limit: usize,
    /// A new bitrate is published only when it exceeds the last one by this factor
    pub bitrate_hysteresis: f32,
    /// Bytes scanned for the next sync byte after sync loss. 0 keeps the hard stop.
    pub resync_limit: usize,
}

impl Default for TsConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 50,
            content_cache_limit: 8 * 1024 * 1024,
            header_cache_limit: 1024 * 1024,
            bitrate_hysteresis: 1.2,
            resync_limit: 0,
        }
    }
}

impl TsConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Custom (external process) filter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Directory holding filter description files
    pub path: PathBuf,
    /// Bounded wait for the pump tasks, per wait cycle
    pub pump_wait_ms: u64,
    /// Time a child process gets to exit on its own before it is killed
    pub exit_wait_ms: u64,
    /// Size of a single read from the child's standard output
    pub read_buffer_size: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("filters"),
            pump_wait_ms: 333,
            exit_wait_ms: 1000,
            read_buffer_size: 15 * 1024,
        }
    }
}

impl FilterConfig {
    pub fn pump_wait(&self) -> Duration {
        Duration::from_millis(self.pump_wait_ms)
    }

    pub fn exit_wait(&self) -> Duration {
        Duration::from_millis(self.exit_wait_ms)
    }
}

impl Config {
    /// Parses a configuration from TOML text. Missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file, then applies environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            IngestError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let mut config = Self::from_toml(&text)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides, for when no file is present.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(path) = env::var(FILTER_PATH_ENV) {
            if !path.is_empty() {
                self.filter.path = PathBuf::from(path);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.ts.bitrate_hysteresis < 1.0 {
            return Err(IngestError::Config(
                "ts.bitrate_hysteresis must be at least 1.0".into(),
            ));
        }
        if self.filter.read_buffer_size == 0 {
            return Err(IngestError::Config(
                "filter.read_buffer_size must not be zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ts.flush_interval(), Duration::from_millis(50));
        assert_eq!(config.ts.content_cache_limit, 8 * 1024 * 1024);
        assert_eq!(config.ts.resync_limit, 0);
        assert_eq!(config.filter.pump_wait(), Duration::from_millis(333));
        assert_eq!(config.filter.exit_wait(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [ts]
            resync_limit = 1880

            [filter]
            path = "/etc/peca/filters"
            "#,
        )
        .unwrap();
        assert_eq!(config.ts.resync_limit, 1880);
        assert_eq!(config.ts.header_cache_limit, 1024 * 1024);
        assert_eq!(config.filter.path, PathBuf::from("/etc/peca/filters"));
        assert_eq!(config.filter.read_buffer_size, 15 * 1024);
    }

    #[test]
    fn test_invalid_hysteresis() {
        let err = Config::from_toml("[ts]\nbitrate_hysteresis = 0.5\n").unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }
}
