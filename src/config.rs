// src/config.rs

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Environment variable naming a JSON file that overrides the defaults.
pub const CONFIG_OVERRIDE_ENV: &str = "CLEANUP_DASHBOARD_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    // Scan lifecycle
    pub cancel_grace_ms: u64,            // Default: 3000
    pub event_channel_capacity: usize,   // Default: 16

    // Progress stream
    pub progress_channel_capacity: usize, // Default: 64
    pub progress_min_interval_ms: u64,   // Default: 50

    // Local service
    pub big_file_threshold: u64,         // Default: 100MB
    pub big_file_roots: Vec<PathBuf>,    // Default: home directory
    pub junk_roots: Vec<PathBuf>,        // Default: temp dir + user cache dir
    pub max_parallel_deletes: usize,     // Default: num_cpus::get()
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            cancel_grace_ms: 3000,
            event_channel_capacity: 16,
            progress_channel_capacity: 64,
            progress_min_interval_ms: 50,
            big_file_threshold: 100 * 1024 * 1024,
            big_file_roots: dirs::home_dir().into_iter().collect(),
            junk_roots: default_junk_roots(),
            max_parallel_deletes: num_cpus::get(),
        }
    }
}

fn default_junk_roots() -> Vec<PathBuf> {
    let mut roots = vec![env::temp_dir()];
    if let Some(cache) = dirs::cache_dir() {
        roots.push(cache);
    }
    roots
}

impl DashboardConfig {
    /// Defaults, overridden by the file named in `CLEANUP_DASHBOARD_CONFIG` when it parses.
    pub fn load() -> Self {
        match env::var(CONFIG_OVERRIDE_ENV) {
            Ok(path) => Self::from_path(Path::new(&path)).unwrap_or_else(|err| {
                log::warn!("{}; using default configuration", err);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        serde_json::from_str(&raw)
            .map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn progress_min_interval(&self) -> Duration {
        Duration::from_millis(self.progress_min_interval_ms)
    }
}

// Process-wide defaults for hosts that do not build their own configuration
lazy_static! {
    pub static ref DEFAULT_CONFIG: DashboardConfig = DashboardConfig::load();
}
