//! Layered configuration for the compiler.
//!
//! Settings are read from `unitforge.toml` (or an explicit path), then the
//! environment, then command-line overrides:
//!
//! ```toml
//! [pool]
//! workers = 8          # 0 = available parallelism × core_multiplier
//! core_multiplier = 4
//!
//! [translators]
//! enabled = ["php"]
//! ```

use crate::pool::MAX_WORKERS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "unitforge.toml";

/// Environment variable overriding `pool.workers`.
pub const WORKERS_ENV: &str = "UNITFORGE_WORKERS";

/// Translator kinds the reference toolchain knows how to build.
pub const KNOWN_TRANSLATORS: &[&str] = &["php"];

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSection {
    /// Fixed number of workers; 0 derives it from the host.
    #[serde(default)]
    pub workers: usize,
    /// Multiplier applied to the available parallelism when `workers` is 0.
    #[serde(default = "default_core_multiplier")]
    pub core_multiplier: usize,
}

fn default_core_multiplier() -> usize {
    4
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            workers: 0,
            core_multiplier: default_core_multiplier(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatorsSection {
    /// Translator kinds run for every compilation unit.
    #[serde(default = "default_translators")]
    pub enabled: Vec<String>,
}

fn default_translators() -> Vec<String> {
    vec!["php".to_string()]
}

impl Default for TranslatorsSection {
    fn default() -> Self {
        Self {
            enabled: default_translators(),
        }
    }
}

/// Complete compiler configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerConfig {
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub translators: TranslatorsSection,
}

impl CompilerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse unitforge.toml")
    }

    /// Load `unitforge.toml` from `dir`, or defaults if it does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the full layering: file, then environment, then CLI.
    pub fn resolve(
        explicit_path: Option<&Path>,
        working_dir: &Path,
        cli_workers: Option<usize>,
    ) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(working_dir)?,
        };
        config.apply_env()?;
        if let Some(workers) = cli_workers {
            config.pool.workers = workers;
        }
        Ok(config)
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(WORKERS_ENV) {
            self.pool.workers = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: '{}'", WORKERS_ENV, value))?;
        }
        Ok(())
    }

    /// Serialize back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Write configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Number of workers the pool should run with (always at least 1).
    pub fn effective_workers(&self) -> usize {
        self.requested_workers().clamp(1, MAX_WORKERS)
    }

    fn requested_workers(&self) -> usize {
        if self.pool.workers > 0 {
            return self.pool.workers;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.saturating_mul(self.pool.core_multiplier)
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.pool.workers == 0 && self.pool.core_multiplier == 0 {
            warnings.push(
                "pool.core_multiplier is 0 and pool.workers is unset; falling back to 1 worker"
                    .to_string(),
            );
        }

        let requested = self.requested_workers();
        if requested > MAX_WORKERS {
            warnings.push(format!(
                "pool size {} exceeds the maximum of {}; using {} workers",
                requested, MAX_WORKERS, MAX_WORKERS
            ));
        }

        if self.translators.enabled.is_empty() {
            warnings.push(
                "translators.enabled is empty; every compile will report that no translators \
                 are configured"
                    .to_string(),
            );
        }

        for kind in &self.translators.enabled {
            if !KNOWN_TRANSLATORS.contains(&kind.as_str()) {
                warnings.push(format!(
                    "Unknown translator '{}'. Valid values: {}",
                    kind,
                    KNOWN_TRANSLATORS.join(", ")
                ));
            }
        }

        warnings
    }
}
