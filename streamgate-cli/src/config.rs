use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use streamgate::config::MAX_PROBE_TIMEOUT;
use streamgate::{FormatTag, ProbeConfig, ProxyConfig, VerifierConfig};

use crate::cli::OutputFormat;
use crate::error::{AppError, Result};

pub const MAX_PROBE_TIMEOUT_SECS: u64 = MAX_PROBE_TIMEOUT.as_secs();

/// Settings read from `config.toml`. Command line flags take precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Deadline for all probes of one media item, in seconds
    pub probe_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_concurrent_probes: Option<usize>,
    pub follow_redirects: bool,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    pub use_system_proxy: bool,
    pub output_format: OutputFormat,
    /// Preferred formats, best first
    pub preferred_formats: Vec<FormatTag>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 10,
            connect_timeout_secs: 10,
            max_concurrent_probes: None,
            follow_redirects: true,
            user_agent: None,
            proxy: None,
            use_system_proxy: true,
            output_format: OutputFormat::Pretty,
            preferred_formats: vec![
                FormatTag::HD_1080,
                FormatTag::HD_720,
                FormatTag::MEDIUM_360,
                FormatTag::SMALL_240,
                FormatTag::Live,
            ],
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("streamgate").join("config.toml"))
    }

    /// Load from `path`, or the default location. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overwrite the file with the defaults.
    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::default_path)
            .ok_or_else(|| AppError::InvalidInput("no configuration directory available".into()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, Self::default().show()?)?;
        Ok(path)
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.probe_timeout_secs == 0 {
            return Err(AppError::InvalidInput(
                "probe_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.probe_timeout_secs > MAX_PROBE_TIMEOUT_SECS {
            return Err(AppError::InvalidInput(format!(
                "probe_timeout_secs must not exceed {MAX_PROBE_TIMEOUT_SECS}"
            )));
        }
        if self.max_concurrent_probes == Some(0) {
            return Err(AppError::InvalidInput(
                "max_concurrent_probes must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn probe_config(&self) -> ProbeConfig {
        let defaults = ProbeConfig::default();
        ProbeConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            follow_redirects: self.follow_redirects,
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            proxy: self.proxy.as_deref().map(ProxyConfig::from_url),
            use_system_proxy: self.use_system_proxy,
            ..defaults
        }
    }

    pub fn verifier_config(&self) -> VerifierConfig {
        let config =
            VerifierConfig::default().with_probe_timeout(Duration::from_secs(self.probe_timeout_secs));
        match self.max_concurrent_probes {
            Some(limit) => config.with_max_concurrent_probes(limit),
            None => config,
        }
    }
}
