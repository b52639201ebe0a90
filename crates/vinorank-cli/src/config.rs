//! Settings resolution.
//!
//! Priority per setting:
//! 1. command-line flag
//! 2. environment variable (both handled by clap)
//! 3. TOML config file (`--config`, else `./vinorank.toml` when present)
//! 4. compiled default

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use vinorank_core::{Authorization, RefreshPolicy, DEFAULT_STALENESS_DAYS};

pub const DEFAULT_DB_PATH: &str = "./vinorank.sqlite3";
pub const DEFAULT_CONFIG_PATH: &str = "./vinorank.toml";

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
    pub admin_token: Option<String>,
    #[serde(default)]
    pub refresh: RefreshSection,
}

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RefreshSection {
    pub threshold_days: Option<u32>,
    pub feed_path: Option<PathBuf>,
}

impl FileConfig {
    /// # Errors
    /// Returns an error when the file is unreadable or not valid config TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }
}

/// Values already taken from flags or environment.
#[derive(Debug, Default, Clone)]
pub struct SettingsInput {
    pub db: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub threshold_days: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    admin_token: Option<String>,
    pub policy: RefreshPolicy,
    pub feed_path: Option<PathBuf>,
}

impl Settings {
    /// # Errors
    /// Returns an error for an unreadable config file or an invalid policy.
    pub fn resolve(input: &SettingsInput) -> Result<Self> {
        let file = match &input.config {
            Some(path) => FileConfig::load(path)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_PATH);
                if fallback.exists() {
                    FileConfig::load(fallback)?
                } else {
                    FileConfig::default()
                }
            }
        };
        Self::merge(input, file)
    }

    fn merge(input: &SettingsInput, file: FileConfig) -> Result<Self> {
        let threshold_days = input
            .threshold_days
            .or(file.refresh.threshold_days)
            .unwrap_or(DEFAULT_STALENESS_DAYS);
        let policy = RefreshPolicy::new(threshold_days).context("invalid refresh policy")?;

        Ok(Self {
            db_path: input
                .db
                .clone()
                .or(file.db_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            admin_token: file
                .admin_token
                .filter(|token| !token.trim().is_empty()),
            policy,
            feed_path: file.refresh.feed_path,
        })
    }

    /// Compares the caller's token with the configured one; no configured
    /// token denies every mutating command.
    #[must_use]
    pub fn authorize(&self, presented: Option<&str>) -> Authorization {
        let granted = match (self.admin_token.as_deref(), presented) {
            (Some(expected), Some(presented)) => expected == presented,
            _ => false,
        };
        Authorization::from_check(granted)
    }
}
