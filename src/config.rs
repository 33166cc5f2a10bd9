//! Run configuration.
//!
//! Every section is optional in YAML; missing values take their defaults.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use serde::{Deserialize, Serialize};

use crate::peer::SessionPolicy;

/// Top-level configuration structure that mirrors the YAML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ingest: IngestConfig,
    /// Which event classes may open a session on their own
    pub sessions: SessionPolicy,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// How often the status reporter logs peer counts (e.g. "15s", "1m")
    #[serde(with = "humantime_serde")]
    pub status_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub json_file: String,
    pub text_file: String,
    /// Include the full per-peer map in the JSON report
    pub include_peers: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("peer-score-output"),
            json_file: "peer-score-report.json".to_string(),
            text_file: "peer-score-report.txt".to_string(),
            include_peers: true,
        }
    }
}

impl ReportConfig {
    pub fn json_path(&self) -> PathBuf {
        self.output_dir.join(&self.json_file)
    }

    pub fn text_path(&self) -> PathBuf {
        self.output_dir.join(&self.text_file)
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid ingest configuration: {0}")]
    InvalidIngest(String),
    #[error("Invalid report configuration: {0}")]
    InvalidReport(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ingest.status_interval.is_zero() {
            return Err(ValidationError::InvalidIngest(
                "status_interval must be greater than zero".to_string(),
            ));
        }

        for (name, file) in [
            ("json_file", &self.report.json_file),
            ("text_file", &self.report.text_file),
        ] {
            if file.trim().is_empty() {
                return Err(ValidationError::InvalidReport(format!(
                    "{} cannot be empty",
                    name
                )));
            }
        }

        if self.report.json_file == self.report.text_file {
            return Err(ValidationError::InvalidReport(
                "json_file and text_file must differ".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load and validate configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open config file {:?}", config_path))?;
    let config: Config = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse config file {:?}", config_path))?;

    config.validate()?;
    Ok(config)
}
