use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::{
    with_backoff, with_deadline, with_jitter, with_max_attempts, with_max_delay, Backoff,
    RetryOption, RetryPolicy,
};

/// Backoff strategy name as written in config.toml.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

fn default_multiplier() -> f64 {
    2.0
}

/// Retry policy parameters (optional `[retry]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first). 0 = unlimited.
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
    /// First delay in seconds (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Linear increment in seconds; defaults to `base_delay_secs`.
    #[serde(default)]
    pub step_secs: Option<f64>,
    /// Exponential growth factor.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
    /// Jitter fraction in [0, 1].
    #[serde(default)]
    pub jitter: f64,
    /// Overall time budget in seconds.
    #[serde(default)]
    pub deadline_secs: Option<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffKind::Exponential,
            base_delay_secs: 0.25,
            step_secs: None,
            multiplier: default_multiplier(),
            max_delay_secs: 30,
            jitter: 0.0,
            deadline_secs: None,
        }
    }
}

fn secs(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("retry.{field} must be a non-negative number of seconds"))
}

impl RetryConfig {
    /// Validate and convert into retry options, in the order they should apply.
    pub fn to_options(&self) -> Result<Vec<RetryOption>> {
        let base = secs("base_delay_secs", self.base_delay_secs)?;
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Linear => {
                let step = match self.step_secs {
                    Some(s) => secs("step_secs", s)?,
                    None => base,
                };
                Backoff::Linear {
                    initial: base,
                    step,
                }
            }
            BackoffKind::Exponential => {
                if !self.multiplier.is_finite() || self.multiplier < 1.0 {
                    bail!("retry.multiplier must be >= 1, got {}", self.multiplier);
                }
                Backoff::Exponential {
                    initial: base,
                    multiplier: self.multiplier,
                }
            }
        };
        if !(0.0..=1.0).contains(&self.jitter) {
            bail!("retry.jitter must be in [0, 1], got {}", self.jitter);
        }

        let mut opts = vec![
            with_max_attempts(self.max_attempts),
            with_backoff(backoff),
            with_max_delay(Duration::from_secs(self.max_delay_secs)),
            with_jitter(self.jitter),
        ];
        if let Some(d) = self.deadline_secs {
            opts.push(with_deadline(secs("deadline_secs", d)?));
        }
        Ok(opts)
    }

    pub fn to_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy::from_options(self.to_options()?))
    }
}

/// Global configuration loaded from `~/.config/retry/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Exit codes that `retry run` treats as client errors (never retried).
    #[serde(default)]
    pub permanent_exit_codes: Vec<i32>,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl AppConfig {
    /// The configured retry section, or the built-in defaults.
    pub fn retry_config(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("retry")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from an explicit path.
pub fn load_from(path: &Path) -> Result<AppConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(cfg)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<AppConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = AppConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    load_from(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_config_matches_default_policy() {
        let policy = RetryConfig::default().to_policy().unwrap();
        let default = RetryPolicy::DEFAULT;
        assert_eq!(policy.max_attempts, default.max_attempts);
        assert_eq!(policy.backoff, default.backoff);
        assert_eq!(policy.max_delay, default.max_delay);
        assert_eq!(policy.deadline, None);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = AppConfig {
            permanent_exit_codes: vec![2, 64],
            retry: Some(RetryConfig::default()),
        };
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: AppConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.permanent_exit_codes, vec![2, 64]);
        let retry = parsed.retry.unwrap();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.backoff, BackoffKind::Exponential);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            permanent_exit_codes = [1]

            [retry]
            max_attempts = 3
            backoff = "linear"
            base_delay_secs = 0.5
            step_secs = 0.25
            max_delay_secs = 15
            jitter = 0.1
            deadline_secs = 20.0
        "#;
        let cfg: AppConfig = toml::from_str(toml).unwrap();
        let retry = cfg.retry_config();
        assert_eq!(retry.max_attempts, 3);
        assert!((retry.multiplier - 2.0).abs() < 1e-9);
        let policy = retry.to_policy().unwrap();
        assert_eq!(
            policy.backoff,
            Backoff::Linear {
                initial: Duration::from_millis(500),
                step: Duration::from_millis(250),
            }
        );
        assert_eq!(policy.max_delay, Duration::from_secs(15));
        assert_eq!(policy.deadline, Some(Duration::from_secs(20)));
        assert!((policy.jitter - 0.1).abs() < 1e-9);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert!(cfg.retry.is_none());
        assert!(cfg.permanent_exit_codes.is_empty());
        assert_eq!(cfg.retry_config().max_attempts, 5);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut retry = RetryConfig {
            multiplier: 0.5,
            ..RetryConfig::default()
        };
        assert!(retry.to_policy().is_err());

        retry.multiplier = 2.0;
        retry.base_delay_secs = -1.0;
        assert!(retry.to_policy().is_err());

        retry.base_delay_secs = 1.0;
        retry.jitter = 1.5;
        assert!(retry.to_policy().is_err());
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "permanent_exit_codes = [3, 4]\n").unwrap();
        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.permanent_exit_codes, vec![3, 4]);

        fs::write(&path, "permanent_exit_codes = \"nope\"\n").unwrap();
        assert!(load_from(&path).is_err());
    }
}
