use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Pattern,
    Command,
}

/// Unit of the `start`/`end` offsets an external model reports.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OffsetUnit {
    /// Unicode scalar values, as Python-based models report them.
    #[default]
    Chars,
    Bytes,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub kind: ClassifierKind,
    /// Program and arguments for the external model (`kind: command`).
    #[serde(default)]
    pub command: Vec<String>,
    /// Set when the capability is documented as safe for concurrent calls.
    #[serde(default)]
    pub concurrent: bool,
    #[serde(default)]
    pub offsets: OffsetUnit,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub run_id: String,
    pub mount_base: PathBuf,
    #[serde(default)]
    pub privilege_command: Option<String>,
    pub mount_options: Vec<String>,
    #[serde(default)]
    pub fs_mount_options: BTreeMap<String, Vec<String>>,
    pub base_extensions: Vec<String>,
    #[serde(default)]
    pub extended_extensions: Vec<String>,
    #[serde(default)]
    pub email_extensions: Vec<String>,
    #[serde(default)]
    pub image_extensions: Vec<String>,
    pub score_threshold: f64,
    pub chunk_bytes: usize,
    #[serde(default)]
    pub overlap_bytes: usize,
    /// Files larger than this are recorded as read failures without being
    /// loaded. Zero disables the limit.
    #[serde(default)]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub ocr_command: Vec<String>,
    #[serde(default)]
    pub social_domains: Vec<String>,
    #[serde(default)]
    pub progress_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let mut config: Config = serde_yaml::from_slice(&bytes)?;
    if config.run_id.trim().is_empty() {
        config.run_id = generate_run_id();
    }
    validate(&config)?;

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig { config, config_hash })
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.score_threshold) {
        return Err(ConfigError::Invalid(format!(
            "score_threshold {} is outside [0, 1]",
            config.score_threshold
        )));
    }
    if config.chunk_bytes == 0 {
        return Err(ConfigError::Invalid("chunk_bytes must be positive".to_string()));
    }
    if config.classifier.kind == ClassifierKind::Command && config.classifier.command.is_empty() {
        return Err(ConfigError::Invalid(
            "classifier.kind is command but classifier.command is empty".to_string(),
        ));
    }
    if config.run_id.contains('/') || config.run_id.contains("..") {
        return Err(ConfigError::Invalid(format!(
            "run_id must be a single path component: {}",
            config.run_id
        )));
    }
    Ok(())
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}

fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    format!("{}_{}", now.format("%Y%m%dT%H%M%SZ"), rand_suffix())
}

fn rand_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:08x}", nanos)
}
