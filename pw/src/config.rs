//! phasewatch configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::detect::{DEFAULT_MAX_CONSECUTIVE, LoopOptions};
use crate::events::default_runs_dir;
use crate::wait::{DEFAULT_TIMEOUT_MS, WaitOptions};

/// Project-local config file name
pub const LOCAL_CONFIG: &str = ".phasewatch.yml";

/// Main phasewatch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Loop detector thresholds
    pub detector: DetectorConfig,

    /// Wait defaults
    pub wait: WaitConfig,

    /// Recording storage
    pub recorder: RecorderConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        debug!("Config::validate: called");
        self.to_loop_options(None)
            .validate()
            .context("Invalid detector configuration")?;
        self.wait_options().context("Invalid wait configuration")?;
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .phasewatch.yml
        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/phasewatch/phasewatch.yml
        if let Some(user_config) = user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => std::iter::once(PathBuf::from(LOCAL_CONFIG))
                .chain(user_config_path())
                .collect(),
        };
        candidates
            .into_iter()
            .find(|p| p.exists())
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }

    /// Detector options, with an optional label for the report
    pub fn to_loop_options(&self, component_label: Option<String>) -> LoopOptions {
        LoopOptions {
            max_consecutive_update: self.detector.max_consecutive_update,
            max_consecutive_nested_update: self.detector.max_consecutive_nested_update,
            ignore_initial_count: self.detector.ignore_initial_count,
            component_label,
            show_full_history: self.detector.show_full_history,
        }
    }

    pub fn wait_options(&self) -> Result<WaitOptions> {
        WaitOptions::from_millis(self.wait.timeout_ms as f64).map_err(Into::into)
    }

    /// Directory recordings are written to and read from
    pub fn runs_dir(&self) -> Result<PathBuf> {
        match &self.recorder.runs_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_runs_dir(),
        }
    }
}

/// User config path (`<config_dir>/phasewatch/phasewatch.yml`)
fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("phasewatch").join("phasewatch.yml"))
}

/// Loop detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Longest allowed run of updates
    #[serde(rename = "max-consecutive-update")]
    pub max_consecutive_update: usize,

    /// Longest allowed run of nested updates (defaults to the update limit)
    #[serde(rename = "max-consecutive-nested-update")]
    pub max_consecutive_nested_update: Option<usize>,

    /// Non-initial events to skip before counting
    #[serde(rename = "ignore-initial-count")]
    pub ignore_initial_count: usize,

    /// Include the full phase history in violation reports
    #[serde(rename = "show-full-history")]
    pub show_full_history: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_consecutive_update: DEFAULT_MAX_CONSECUTIVE,
            max_consecutive_nested_update: None,
            ignore_initial_count: 0,
            show_full_history: false,
        }
    }
}

/// Wait defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Recording storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Directory for recordings (defaults to ~/.local/share/phasewatch/runs)
    #[serde(rename = "runs-dir")]
    pub runs_dir: Option<PathBuf>,
}
