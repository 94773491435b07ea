//! Configuration for the `rmk` binary.
//!
//! Sources, highest precedence first:
//! 1. Command-line flags
//! 2. Environment variables (`RMK_*`)
//! 3. A configuration file (`.rmk`, `.rmk.yaml`, `.rmk.json`, `.rmk.toml`, ...)
//! 4. Built-in defaults

use anyhow::{Context, Result};
use log::{debug, info};
use rmk_accelerate::{AccelPowerPreference, AccelerateInitOptions, AccelerateProviderPreference};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RmkConfig {
    #[serde(default)]
    pub accelerate: AccelerateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub smoke: SmokeConfig,
}

/// Acceleration (GPU) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccelerateConfig {
    /// Enable the device provider
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Preferred provider (auto, wgpu, in-process)
    #[serde(default)]
    pub provider: AccelerateProviderPreference,
    /// Fall back to the in-process provider when no adapter can be opened
    #[serde(default = "default_true")]
    pub allow_inprocess_fallback: bool,
    /// Preferred WGPU power profile
    #[serde(default)]
    pub wgpu_power_preference: AccelPowerPreference,
    /// Request the software fallback adapter
    #[serde(default)]
    pub wgpu_force_fallback_adapter: bool,
}

impl Default for AccelerateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: AccelerateProviderPreference::Auto,
            allow_inprocess_fallback: true,
            wgpu_power_preference: AccelPowerPreference::Auto,
            wgpu_force_fallback_adapter: false,
        }
    }
}

impl AccelerateConfig {
    pub fn to_init_options(&self) -> AccelerateInitOptions {
        AccelerateInitOptions {
            enabled: self.enabled,
            provider: self.provider,
            allow_inprocess_fallback: self.allow_inprocess_fallback,
            wgpu_power_preference: self.wgpu_power_preference,
            wgpu_force_fallback_adapter: self.wgpu_force_fallback_adapter,
        }
    }
}

impl From<&AccelerateConfig> for AccelerateInitOptions {
    fn from(cfg: &AccelerateConfig) -> Self {
        cfg.to_init_options()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Emit JSON lines on stderr
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            json: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Input used by `rmk run` when `--input` is not given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeConfig {
    #[serde(default = "default_smoke_input")]
    pub input: Vec<f64>,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            input: default_smoke_input(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_smoke_input() -> Vec<f64> {
    vec![1.0, 2.0, 3.0, 4.0]
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the first file found, then apply environment overrides.
    pub fn load() -> Result<RmkConfig> {
        Self::load_with(None)
    }

    /// Like [`ConfigLoader::load`], but an explicit path wins over the search list.
    pub fn load_with(explicit: Option<&Path>) -> Result<RmkConfig> {
        let mut config = match explicit {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(path)?
            }
            None => Self::load_from_files()?,
        };
        Self::apply_environment_variables(&mut config)?;
        Ok(config)
    }

    fn load_from_files() -> Result<RmkConfig> {
        for path in Self::find_config_files() {
            if path.is_dir() {
                info!(
                    "Ignoring config directory path (expected file): {}",
                    path.display()
                );
                continue;
            }
            if path.exists() {
                info!("Loading configuration from: {}", path.display());
                return Self::load_from_file(&path);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(RmkConfig::default())
    }

    /// Candidate configuration paths in search order.
    pub fn find_config_files() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(config_path) = env::var("RMK_CONFIG") {
            if !config_path.is_empty() {
                paths.push(PathBuf::from(config_path));
            }
        }

        if let Ok(current_dir) = env::current_dir() {
            for name in [".rmk", ".rmk.yaml", ".rmk.yml", ".rmk.json", ".rmk.toml"] {
                paths.push(current_dir.join(name));
            }
        }

        if let Some(config_dir) = dirs::home_dir().map(|h| h.join(".config").join("rmk")) {
            for name in ["config.yaml", "config.yml", "config.json", "config.toml"] {
                paths.push(config_dir.join(name));
            }
        }

        paths
    }

    pub fn load_from_file(path: &Path) -> Result<RmkConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?,
            // `.rmk` and anything else: TOML first, then YAML, then JSON
            _ => {
                if let Ok(config) = toml::from_str(&content) {
                    config
                } else if let Ok(config) = serde_yaml::from_str(&content) {
                    config
                } else if let Ok(config) = serde_json::from_str(&content) {
                    config
                } else {
                    return Err(anyhow::anyhow!(
                        "Could not parse config file {} (tried TOML, YAML, JSON)",
                        path.display()
                    ));
                }
            }
        };

        Ok(config)
    }

    fn apply_environment_variables(config: &mut RmkConfig) -> Result<()> {
        if let Some(flag) = env::var("RMK_ACCEL_ENABLED")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            config.accelerate.enabled = flag;
        }

        if let Some(pref) = env::var("RMK_ACCEL_PROVIDER")
            .ok()
            .and_then(|v| parse_provider_preference(&v))
        {
            config.accelerate.provider = pref;
        }

        if let Some(flag) = env::var("RMK_ACCEL_FALLBACK")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            config.accelerate.allow_inprocess_fallback = flag;
        }

        if let Some(power) = env::var("RMK_WGPU_POWER")
            .ok()
            .and_then(|v| parse_power_preference(&v))
        {
            config.accelerate.wgpu_power_preference = power;
        }

        if let Some(flag) = env::var("RMK_WGPU_FORCE_FALLBACK")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            config.accelerate.wgpu_force_fallback_adapter = flag;
        }

        if let Ok(level) = env::var("RMK_LOG_LEVEL") {
            config.logging.level = match level.trim().to_lowercase().as_str() {
                "error" => LogLevel::Error,
                "warn" => LogLevel::Warn,
                "info" => LogLevel::Info,
                "debug" => LogLevel::Debug,
                "trace" => LogLevel::Trace,
                _ => config.logging.level,
            };
        }

        Ok(())
    }

    /// Write `config` to `path`, picking the format from its extension (YAML otherwise).
    pub fn save_to_file(config: &RmkConfig, path: &Path) -> Result<()> {
        let content = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(config)
                .context("Failed to serialize config to JSON")?,
            Some("toml") => {
                toml::to_string_pretty(config).context("Failed to serialize config to TOML")?
            }
            _ => serde_yaml::to_string(config).context("Failed to serialize config to YAML")?,
        };

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    pub fn generate_sample_config() -> String {
        let config = RmkConfig::default();
        serde_yaml::to_string(&config).unwrap_or_else(|_| "# Failed to generate config".to_string())
    }
}

/// Parse a boolean value from string with various formats
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enable" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disable" | "disabled" => Some(false),
        "" => Some(false),
        _ => None,
    }
}

pub fn parse_provider_preference(value: &str) -> Option<AccelerateProviderPreference> {
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(AccelerateProviderPreference::Auto),
        "wgpu" | "gpu" | "metal" => Some(AccelerateProviderPreference::Wgpu),
        "inprocess" | "in-process" | "cpu" | "host" => {
            Some(AccelerateProviderPreference::InProcess)
        }
        _ => None,
    }
}

pub fn parse_power_preference(value: &str) -> Option<AccelPowerPreference> {
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(AccelPowerPreference::Auto),
        "high" | "high-performance" | "highperformance" | "performance" => {
            Some(AccelPowerPreference::HighPerformance)
        }
        "low" | "low-power" | "lowpower" | "battery" => Some(AccelPowerPreference::LowPower),
        _ => None,
    }
}
