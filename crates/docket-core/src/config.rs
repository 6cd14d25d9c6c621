use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::linker::LinkConfig;
use crate::retry::BackoffPolicy;

/// Governor parameters (optional `[governor]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Interval between checks of the shared slot set while waiting.
    pub poll_interval_ms: u64,
    /// Time-to-live refreshed on the slot set at every acquisition.
    pub slot_ttl_secs: u64,
    /// How long a unit waits for a slot before failing with a timeout.
    pub acquire_timeout_secs: u64,
    /// Per-name local bound used when the shared store is unreachable.
    /// Defaults to the configured limit for the name when missing.
    #[serde(default)]
    pub fallback_limit: Option<usize>,
    /// Maximum concurrent calls per governor name (e.g. `recognition = 4`).
    #[serde(default)]
    pub limits: BTreeMap<String, usize>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        let mut limits = BTreeMap::new();
        limits.insert("recognition".to_string(), 4);
        limits.insert("embedding".to_string(), 8);
        limits.insert("extraction".to_string(), 4);
        Self {
            poll_interval_ms: 100,
            slot_ttl_secs: 300,
            acquire_timeout_secs: 60,
            fallback_limit: None,
            limits,
        }
    }
}

impl GovernorConfig {
    /// Limit for a governor name; unknown names get a single slot.
    pub fn limit_for(&self, name: &str) -> usize {
        self.limits.get(name).copied().unwrap_or(1).max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn slot_ttl(&self) -> Duration {
        Duration::from_secs(self.slot_ttl_secs.max(1))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Rate-limit backoff parameters (optional `[backoff]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Exponent base: delay = min(base^attempt, cap) seconds.
    pub base: f64,
    /// Maximum backoff delay in seconds.
    pub cap_secs: u64,
    /// Rate-limit signals tolerated per unit before the unit fails.
    pub max_rate_limit_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: 2.0,
            cap_secs: 30,
            max_rate_limit_retries: 5,
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: self.base,
            cap: Duration::from_secs(self.cap_secs),
            scale: Duration::from_secs(1),
            max_attempts: self.max_rate_limit_retries,
        }
    }
}

/// Linker parameters (optional `[linker]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkerConfig {
    pub threshold: f64,
    pub page_margin: u32,
    pub batch_size: usize,
    pub progress_every: usize,
    pub deadline_secs: u64,
    pub min_tokens: usize,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        let d = LinkConfig::default();
        Self {
            threshold: d.threshold,
            page_margin: d.page_margin,
            batch_size: d.batch_size,
            progress_every: d.progress_every,
            deadline_secs: d.deadline.as_secs(),
            min_tokens: d.min_tokens,
        }
    }
}

impl LinkerConfig {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            threshold: self.threshold,
            page_margin: self.page_margin,
            batch_size: self.batch_size.max(1),
            progress_every: self.progress_every.max(1),
            deadline: Duration::from_secs(self.deadline_secs),
            min_tokens: self.min_tokens,
        }
    }
}

/// Global configuration loaded from `~/.config/docket/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocketConfig {
    /// Automatic retries granted to a job before it stays `failed`.
    pub max_retries: u32,
    /// Jobs processed concurrently by `docket run`.
    pub workers: usize,
    /// Units of one stage in flight at once within a single job.
    pub unit_parallelism: usize,
    /// Wall-clock deadline for each external call.
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub governor: Option<GovernorConfig>,
    #[serde(default)]
    pub backoff: Option<BackoffConfig>,
    #[serde(default)]
    pub linker: Option<LinkerConfig>,
}

impl Default for DocketConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            workers: 4,
            unit_parallelism: 4,
            call_timeout_secs: 120,
            governor: None,
            backoff: None,
            linker: None,
        }
    }
}

impl DocketConfig {
    pub fn governor(&self) -> GovernorConfig {
        self.governor.clone().unwrap_or_default()
    }

    pub fn backoff(&self) -> BackoffConfig {
        self.backoff.clone().unwrap_or_default()
    }

    pub fn linker(&self) -> LinkerConfig {
        self.linker.clone().unwrap_or_default()
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("docket")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DocketConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DocketConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DocketConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = DocketConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.governor().limit_for("recognition"), 4);
        assert_eq!(cfg.governor().limit_for("unknown"), 1);
        assert_eq!(cfg.backoff().cap_secs, 30);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = DocketConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: DocketConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_retries, cfg.max_retries);
        assert_eq!(parsed.workers, cfg.workers);
        assert_eq!(parsed.call_timeout_secs, cfg.call_timeout_secs);
    }

    #[test]
    fn config_toml_sections() {
        let toml = r#"
            max_retries = 5
            workers = 2
            unit_parallelism = 8
            call_timeout_secs = 45

            [governor]
            poll_interval_ms = 50
            slot_ttl_secs = 120
            acquire_timeout_secs = 10

            [governor.limits]
            recognition = 2
            embedding = 16

            [backoff]
            base = 3.0
            cap_secs = 60
            max_rate_limit_retries = 2

            [linker]
            threshold = 0.7
            page_margin = 2
            batch_size = 250
            progress_every = 500
            deadline_secs = 30
            min_tokens = 2
        "#;
        let cfg: DocketConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_retries, 5);
        let gov = cfg.governor();
        assert_eq!(gov.limit_for("recognition"), 2);
        assert_eq!(gov.limit_for("embedding"), 16);
        assert_eq!(gov.poll_interval(), Duration::from_millis(50));
        let backoff = cfg.backoff().policy();
        assert_eq!(backoff.cap, Duration::from_secs(60));
        assert_eq!(backoff.max_attempts, 2);
        let link = cfg.linker().link_config();
        assert_eq!(link.batch_size, 250);
        assert_eq!(link.deadline, Duration::from_secs(30));
        assert!((link.threshold - 0.7).abs() < 1e-9);
    }

    #[test]
    fn config_toml_missing_sections_use_defaults() {
        let toml = r#"
            max_retries = 1
            workers = 1
            unit_parallelism = 1
            call_timeout_secs = 5
        "#;
        let cfg: DocketConfig = toml::from_str(toml).unwrap();
        assert!(cfg.governor.is_none());
        assert_eq!(cfg.governor().poll_interval_ms, 100);
        assert_eq!(cfg.linker().batch_size, 500);
    }
}
