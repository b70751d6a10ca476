use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use shared_logging::LogLevel;
use thiserror::Error;

use crate::{
    dataset::DEFAULT_DATASET_URL, encoder::UniverseKind, forest::ForestParams, schema::Species,
};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading config {path}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("parsing config {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What to do when the query carries a category the training rows never use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnseenCategoryPolicy {
    /// Fail the cycle before encoding.
    #[default]
    Reject,
    /// Encode anyway; the category gets a column only the query row sets.
    Allow,
}

/// Pipeline configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Dataset location.
    pub dataset: DatasetSettings,
    /// Random-forest hyperparameters.
    pub forest: ForestSettings,
    /// Encoding behaviour.
    pub encoding: EncodingSettings,
    /// Structured log output.
    pub logging: LoggingSettings,
}

/// `[dataset]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    /// CSV path or `http(s)://` URL.
    pub source: String,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            source: DEFAULT_DATASET_URL.to_string(),
        }
    }
}

/// `[forest]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestSettings {
    /// Number of trees.
    pub n_trees: usize,
    /// Optional depth cap.
    pub max_depth: Option<usize>,
    /// Optional seed; unseeded training varies run to run.
    pub seed: Option<u64>,
}

impl Default for ForestSettings {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            seed: None,
        }
    }
}

/// `[encoding]` section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingSettings {
    /// Source of the one-hot columns.
    pub universe: UniverseKind,
    /// Handling of query categories absent from the training rows.
    pub unseen_category: UnseenCategoryPolicy,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// JSON-lines log file; no file logging when absent.
    pub path: Option<PathBuf>,
    /// Minimum level written (`debug`, `info`, `warn`, `error`).
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("logs/penguin.jsonl")),
            level: LogLevel::Info.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Loads and validates a TOML file. A relative dataset path is resolved
    /// against the directory holding the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.dataset.source = resolve_source(base, &config.dataset.source);
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.source.trim().is_empty() {
            return Err(ConfigError::Invalid("dataset.source must not be empty".into()));
        }
        if self.forest.n_trees == 0 {
            return Err(ConfigError::Invalid("forest.n_trees must be at least 1".into()));
        }
        if self.forest.max_depth == Some(0) {
            return Err(ConfigError::Invalid("forest.max_depth must be at least 1".into()));
        }
        self.logging
            .level
            .parse::<LogLevel>()
            .map_err(|err| ConfigError::Invalid(format!("logging.level: {err}")))?;
        Ok(())
    }

    /// Minimum log level, `info` when the configured one does not parse.
    #[must_use]
    pub fn log_level(&self) -> LogLevel {
        self.logging.level.parse().unwrap_or_default()
    }

    /// Classifier built from the `[forest]` section.
    #[must_use]
    pub const fn forest_params(&self) -> ForestParams {
        ForestParams::new(Species::COUNT)
            .with_trees(self.forest.n_trees)
            .with_max_depth(self.forest.max_depth)
            .with_seed(self.forest.seed)
    }
}

fn resolve_source(base: &Path, source: &str) -> String {
    let is_remote = source.starts_with("http://") || source.starts_with("https://");
    let candidate = Path::new(source);
    if is_remote || candidate.is_absolute() {
        source.to_string()
    } else {
        base.join(candidate).display().to_string()
    }
}
