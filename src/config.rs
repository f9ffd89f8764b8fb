//! Runner configuration and logging setup

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::actions::CaptureSettings;
use crate::error::{HarnessError, Result};
use crate::orchestrator::{DEFAULT_SEED, RunOptions};
use crate::scheduler::FiringMode;

/// Template runner settings (checked into git)
pub const SETTINGS_TEMPLATE: &str = "config/framecheck.template.json";
/// Local runner settings (gitignored)
pub const SETTINGS_FILE: &str = "config/framecheck.json";

/// Settings for a `framecheck` run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Write captures as new ground truth instead of comparing
    pub generate_captures: bool,
    /// Where failed comparisons leave their truth/capture pair
    pub save_compare_dir: String,
    /// Relative ground-truth paths resolve against this directory
    pub baseline_root: String,
    /// Scratch directory for captures (None = system temp)
    pub temp_dir: Option<String>,
    /// Seed forced on every program
    pub seed: u64,
    /// Worker threads (0 = sequential)
    pub workers: usize,
    /// Fire every due step in one tick rather than one per tick
    pub drain_steps: bool,
    /// Architecture used for `machine` filtering (None = this machine)
    pub machine: Option<String>,
    /// SQLite run history
    pub history_db: Option<String>,
    /// JSON report output
    pub report: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            generate_captures: false,
            save_compare_dir: "bad-compare".to_string(),
            baseline_root: ".".to_string(),
            temp_dir: None,
            seed: DEFAULT_SEED,
            workers: 0,
            drain_steps: true,
            machine: None,
            history_db: None,
            report: None,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a JSON settings file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("Failed to read {}: {}", path, e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| HarnessError::Config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Priority: local settings > template settings > built-in defaults
    pub fn from_config_files() -> Self {
        if let Ok(config) = Self::from_file(SETTINGS_FILE) {
            return config;
        }
        if let Ok(config) = Self::from_file(SETTINGS_TEMPLATE) {
            return config;
        }
        Self::default()
    }

    /// Architecture tests are filtered for
    pub fn machine(&self) -> String {
        self.machine
            .clone()
            .unwrap_or_else(|| std::env::consts::ARCH.to_string())
    }

    pub fn firing_mode(&self) -> FiringMode {
        if self.drain_steps {
            FiringMode::Drain
        } else {
            FiringMode::OnePerTick
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            generate: self.generate_captures,
            save_compare_dir: PathBuf::from(&self.save_compare_dir),
            baseline_root: PathBuf::from(&self.baseline_root),
            temp_dir: self
                .temp_dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            capture: self.capture_settings(),
            seed: self.seed,
            workers: self.workers,
            mode: self.firing_mode(),
        }
    }
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
