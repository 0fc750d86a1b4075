//! Layered configuration: built-in defaults, an optional TOML file,
//! environment variables, then CLI flags (applied last, in `main.rs`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::Mutex;
#[cfg(not(test))]
use std::sync::OnceLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub processing: ProcessingConfig,
    pub detector: DetectorConfig,
    pub live: LiveConfig,
    pub pricing: PricingConfig,
    pub output: OutputConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub worker_pool_size: usize,
    pub batch_size: usize,
    pub max_retries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub window_hours: i64,
    pub gap_threshold_hours: i64,
    pub burn_rate_window_minutes: i64,
    pub history_retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    pub data_refresh_interval_secs: f64,
    pub ui_refresh_hz: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub source: String,
    pub offline: bool,
    pub catalog_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub json_pretty: bool,
    pub time_format: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub journal_root: PathBuf,
    pub state_root: PathBuf,
    pub log_directory: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let state_root = home.join(".go-claude-monitor");
        Self {
            logging: LoggingConfig {
                level: "WARN".to_string(),
                format: "pretty".to_string(),
                output: "console".to_string(),
            },
            processing: ProcessingConfig {
                worker_pool_size: std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4),
                batch_size: 10,
                max_retries: 3,
            },
            detector: DetectorConfig {
                window_hours: 5,
                gap_threshold_hours: 5,
                burn_rate_window_minutes: 15,
                history_retention_days: 3,
            },
            live: LiveConfig {
                data_refresh_interval_secs: 10.0,
                ui_refresh_hz: 0.75,
            },
            pricing: PricingConfig {
                source: "default".to_string(),
                offline: false,
                catalog_url:
                    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json"
                        .to_string(),
            },
            output: OutputConfig {
                json_pretty: false,
                time_format: "24h".to_string(),
                timezone: "Local".to_string(),
            },
            paths: PathsConfig {
                journal_root: home.join(".claude").join("projects"),
                state_root: state_root.clone(),
                log_directory: state_root.join("logs"),
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        let config_paths = [
            PathBuf::from("quota-monitor.toml"),
            PathBuf::from(".quota-monitor.toml"),
            dirs::config_dir()
                .map(|d| d.join("claude-usage-monitor").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.as_os_str().is_empty() {
                continue;
            }
            if path.exists() {
                info!(config_file = %path.display(), "loading configuration from file");
                config = Self::load_from_file(path)?;
                break;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    fn expand_path(path_str: &str) -> PathBuf {
        if let Some(home) = dirs::home_dir() {
            if path_str == "~" {
                return home;
            } else if let Some(rest) = path_str.strip_prefix("~/") {
                return home.join(rest);
            }
        }
        PathBuf::from(path_str)
    }

    #[cfg(feature = "basic")]
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        config.expand_paths();
        Ok(config)
    }

    #[cfg(not(feature = "basic"))]
    pub fn load_from_file(_path: &Path) -> Result<Self> {
        Ok(Self::default())
    }

    fn expand_paths(&mut self) {
        if let Some(s) = self.paths.journal_root.to_str() {
            self.paths.journal_root = Self::expand_path(s);
        }
        if let Some(s) = self.paths.state_root.to_str() {
            self.paths.state_root = Self::expand_path(s);
        }
        if let Some(s) = self.paths.log_directory.to_str() {
            self.paths.log_directory = Self::expand_path(s);
        }
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("LOG_OUTPUT") {
            self.logging.output = val;
        }

        if let Ok(val) = env::var("QUOTA_MONITOR_WORKER_POOL_SIZE") {
            self.processing.worker_pool_size = val
                .parse()
                .context("invalid QUOTA_MONITOR_WORKER_POOL_SIZE")?;
        }
        if let Ok(val) = env::var("QUOTA_MONITOR_BATCH_SIZE") {
            self.processing.batch_size =
                val.parse().context("invalid QUOTA_MONITOR_BATCH_SIZE")?;
        }

        if let Ok(val) = env::var("QUOTA_MONITOR_DATA_REFRESH_SECS") {
            self.live.data_refresh_interval_secs = val
                .parse()
                .context("invalid QUOTA_MONITOR_DATA_REFRESH_SECS")?;
        }
        if let Ok(val) = env::var("QUOTA_MONITOR_UI_REFRESH_HZ") {
            self.live.ui_refresh_hz =
                val.parse().context("invalid QUOTA_MONITOR_UI_REFRESH_HZ")?;
        }

        if let Ok(val) = env::var("QUOTA_MONITOR_PRICING_SOURCE") {
            self.pricing.source = val;
        }
        if let Ok(val) = env::var("QUOTA_MONITOR_PRICING_OFFLINE") {
            self.pricing.offline =
                val.parse().context("invalid QUOTA_MONITOR_PRICING_OFFLINE")?;
        }

        if let Ok(val) = env::var("CLAUDE_HOME") {
            self.paths.journal_root = Self::expand_path(&val).join("projects");
        }
        if let Ok(val) = env::var("QUOTA_MONITOR_ROOT") {
            self.paths.journal_root = Self::expand_path(&val);
        }
        if let Ok(val) = env::var("QUOTA_MONITOR_STATE_DIR") {
            self.paths.state_root = Self::expand_path(&val);
        }
        if let Ok(val) = env::var("QUOTA_MONITOR_LOG_DIR") {
            self.paths.log_directory = Self::expand_path(&val);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.processing.batch_size == 0 {
            return Err(anyhow::anyhow!("batch size must be greater than 0"));
        }
        if self.processing.worker_pool_size == 0 {
            return Err(anyhow::anyhow!("worker pool size must be greater than 0"));
        }
        if self.detector.window_hours <= 0 {
            return Err(anyhow::anyhow!("window_hours must be positive"));
        }
        if !(0.1..=20.0).contains(&self.live.ui_refresh_hz) {
            return Err(anyhow::anyhow!(
                "ui refresh rate must be between 0.1 and 20 Hz, got {}",
                self.live.ui_refresh_hz
            ));
        }
        if self.live.data_refresh_interval_secs <= 0.0 {
            return Err(anyhow::anyhow!("data refresh interval must be positive"));
        }
        match self.pricing.source.as_str() {
            "default" | "remote" => {}
            other => return Err(anyhow::anyhow!("unknown pricing source `{other}`")),
        }

        if !self.paths.log_directory.exists() {
            fs::create_dir_all(&self.paths.log_directory)
                .context("failed to create log directory")?;
        }
        if !self.paths.state_root.exists() {
            fs::create_dir_all(&self.paths.state_root).context("failed to create state dir")?;
        }

        if self.processing.worker_pool_size > 256 {
            warn!(
                worker_pool_size = self.processing.worker_pool_size,
                "worker pool size unusually large"
            );
        }

        Ok(())
    }

    #[allow(dead_code)]
    #[cfg(feature = "basic")]
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize configuration")?;
        fs::write(path, content)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        info!(path = %path.display(), "configuration saved to file");
        Ok(())
    }

    #[allow(dead_code)]
    #[cfg(not(feature = "basic"))]
    pub fn save_to_file(&self, _path: &Path) -> Result<()> {
        anyhow::bail!("TOML configuration saving not available. Rebuild with --features basic")
    }
}

#[cfg(not(test))]
static CONFIG: OnceLock<Config> = OnceLock::new();

#[cfg(test)]
static CONFIG: Mutex<Option<&'static Config>> = Mutex::new(None);

#[cfg(not(test))]
pub fn get_config() -> &'static Config {
    CONFIG.get_or_init(|| Config::load().expect("failed to load configuration"))
}

#[cfg(test)]
pub fn get_config() -> &'static Config {
    let mut guard = CONFIG.lock().unwrap();
    if let Some(config) = *guard {
        config
    } else {
        let config = Config::load().expect("failed to load configuration");
        let config_ref: &'static Config = Box::leak(Box::new(config));
        *guard = Some(config_ref);
        config_ref
    }
}

#[cfg(test)]
pub fn reset_config_for_test() {
    let mut guard = CONFIG.lock().unwrap();
    *guard = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.logging.level, "WARN");
        assert_eq!(config.detector.window_hours, 5);
        assert_eq!(config.live.ui_refresh_hz, 0.75);
        assert_eq!(config.live.data_refresh_interval_secs, 10.0);
    }

    #[test]
    fn env_override_applies() {
        env::set_var("QUOTA_MONITOR_BATCH_SIZE", "20");
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.processing.batch_size, 20);
        env::remove_var("QUOTA_MONITOR_BATCH_SIZE");
    }

    #[test]
    fn validation_rejects_zero_batch_size() {
        let mut config = Config::default();
        config.processing.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_out_of_range_ui_refresh() {
        let mut config = Config::default();
        config.live.ui_refresh_hz = 25.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_unknown_pricing_source() {
        let mut config = Config::default();
        config.pricing.source = "litellm".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_reset_is_idempotent() {
        reset_config_for_test();
        let config = get_config();
        assert_eq!(config.logging.level, "WARN");
        reset_config_for_test();
        let config2 = get_config();
        assert_eq!(config2.logging.level, "WARN");
    }
}
