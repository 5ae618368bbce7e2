//! Configuration surface (spec.md §6): a TOML file under `Config.root`'s
//! sibling config path, with `RIPTIDE_*` environment variable overrides
//! mirroring the CLI's historical surface.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_cores() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub cores: usize,
    pub numa: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self { cores: default_cores(), numa: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub log_shard_size: u64,
    pub flush_pressure: usize,
    pub enable: bool,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self { log_shard_size: 16 * 1024 * 1024, flush_pressure: 4 * 1024 * 1024, enable: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub block_size: u64,
    pub block_sparse_index_ratio: u64,
    pub partition_sparse_index_ratio: u64,
    pub flush_pressure: usize,
    pub max_descriptors: usize,
    pub max_mappings: usize,
    pub max_locks: usize,
    pub compression_ratio: f64,
    pub partition_bloom_fp_rate: u16,
    pub intra_partition_bloom_fp_rate: u16,
    pub max_cache_volume: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_size: 32 * 1024,
            block_sparse_index_ratio: 16,
            partition_sparse_index_ratio: 16,
            flush_pressure: 8 * 1024 * 1024,
            max_descriptors: 1024,
            max_mappings: 1024,
            max_locks: 4096,
            compression_ratio: 0.9,
            partition_bloom_fp_rate: 100,
            intra_partition_bloom_fp_rate: 100,
            max_cache_volume: 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub root: PathBuf,
    pub mnt: MountConfig,
    pub logs: LogsConfig,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./riptide-data"),
            mnt: MountConfig::default(),
            logs: LogsConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Loads a config from a TOML file, then applies any `RIPTIDE_*`
    /// environment overrides on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
        let mut cfg: Config = toml::from_str(&text).context("parsing config TOML")?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Builds a config from defaults plus environment overrides only —
    /// used when no config file is given (e.g. quick `cli` startup).
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        cfg
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RIPTIDE_ROOT") {
            self.root = PathBuf::from(v);
        }
        if let Some(v) = env_usize("RIPTIDE_MNT_CORES") {
            self.mnt.cores = v;
        }
        if let Some(v) = env_bool("RIPTIDE_MNT_NUMA") {
            self.mnt.numa = v;
        }
        if let Some(v) = env_u64("RIPTIDE_LOGS_SHARD_SIZE") {
            self.logs.log_shard_size = v;
        }
        if let Some(v) = env_usize("RIPTIDE_LOGS_FLUSH_PRESSURE") {
            self.logs.flush_pressure = v;
        }
        if let Some(v) = env_bool("RIPTIDE_LOGS_ENABLE") {
            self.logs.enable = v;
        }
        if let Some(v) = env_u64("RIPTIDE_CACHE_BLOCK_SIZE") {
            self.cache.block_size = v;
        }
        if let Some(v) = env_usize("RIPTIDE_CACHE_FLUSH_PRESSURE") {
            self.cache.flush_pressure = v;
        }
        if let Some(v) = env_f64("RIPTIDE_CACHE_COMPRESSION_RATIO") {
            self.cache.compression_ratio = v;
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_bool(name: &str) -> Option<bool> {
    match std::env::var(name).ok()?.as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = Config::default();
        assert!(cfg.mnt.cores >= 1);
        assert!(cfg.cache.compression_ratio > 0.0 && cfg.cache.compression_ratio <= 1.0);
    }

    #[test]
    fn env_override_wins_over_default() {
        std::env::set_var("RIPTIDE_CACHE_BLOCK_SIZE", "4096");
        let cfg = Config::from_env();
        assert_eq!(cfg.cache.block_size, 4096);
        std::env::remove_var("RIPTIDE_CACHE_BLOCK_SIZE");
    }
}
