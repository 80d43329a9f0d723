// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::identity::IdentityConfig;
use crate::impute::{ReleasePlan, COUNTY_START_YEAR};

pub const DEFAULT_CONFIG_FILE: &str = "bpscraper.yaml";
pub const DEFAULT_BASE_URL: &str = "https://www2.census.gov/econ/bps/";

/// Top-level run configuration. Every field has a default, so an empty file
/// (or no file) is a valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub survey: SurveyConfig,
    pub identity: IdentityConfig,
    pub inputs: InputConfig,
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            survey: SurveyConfig::default(),
            identity: IdentityConfig::default(),
            inputs: InputConfig::default(),
            output_dir: PathBuf::from("public"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    /// Read releases from this directory instead of the network.
    pub mirror_dir: Option<PathBuf>,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Releases that were never published, e.g. `place/1984/northeast`.
    pub known_absent: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            mirror_dir: None,
            concurrency: 8,
            timeout_secs: 60,
            max_retries: 3,
            retry_delay_ms: 1000,
            known_absent: Vec::new(),
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn known_absent_set(&self) -> HashSet<String> {
        self.known_absent.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub start_year: i32,
    pub county_start_year: i32,
    /// Year and month of the newest year-to-date release.
    pub latest_year: i32,
    pub latest_month: u32,
    pub last_year_annual_released: bool,
    /// Reuse the newest population estimates for later survey years.
    pub carry_population_forward: bool,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            start_year: 1980,
            county_start_year: COUNTY_START_YEAR,
            latest_year: 2023,
            latest_month: 4,
            last_year_annual_released: true,
            carry_population_forward: true,
        }
    }
}

impl SurveyConfig {
    pub fn plan(&self) -> crate::error::Result<ReleasePlan> {
        ReleasePlan::new(
            self.latest_year,
            self.latest_month,
            self.last_year_annual_released,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Holds `state/`, `county/` and `place/` subdirectories of CSV sources.
    pub population_dir: PathBuf,
    pub crosswalk: PathBuf,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            population_dir: PathBuf::from("data/population"),
            crosswalk: PathBuf::from("data/cbsa2fipsxw.csv"),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_yaml::from_str(text).context("parsing pipeline configuration")?;
        Ok(config)
    }

    /// Load `path`, or `bpscraper.yaml` in the working directory if present,
    /// or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    info!("no {} found, using defaults", DEFAULT_CONFIG_FILE);
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::from_yaml(&text).with_context(|| format!("in {}", path.display()))?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() -> Result<()> {
        let config = PipelineConfig::from_yaml(
            r#"
source:
  mirror_dir: /data/bps
  known_absent: ["place/1984/northeast"]
survey:
  latest_year: 2024
  latest_month: 9
identity:
  reference_year: 2020
output_dir: out
"#,
        )?;
        assert_eq!(config.source.mirror_dir, Some(PathBuf::from("/data/bps")));
        assert_eq!(config.source.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.source.max_retries, 3);
        assert!(config.source.known_absent_set().contains("place/1984/northeast"));
        assert_eq!(config.survey.latest_year, 2024);
        assert_eq!(config.survey.start_year, 1980);
        assert_eq!(config.identity.reference_year, 2020);
        assert_eq!(config.identity.id_scheme_change_year, 1992);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.survey.plan()?.last_full_year(), 2023);
        Ok(())
    }

    #[test]
    fn test_bad_month_is_rejected_by_plan() -> Result<()> {
        let config = PipelineConfig::from_yaml("survey:\n  latest_month: 0\n")?;
        assert!(config.survey.plan().is_err());
        Ok(())
    }
}
