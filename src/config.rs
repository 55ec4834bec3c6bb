use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::params::ParamKind;

/// Malformed or inconsistent configuration. Fatal at startup, before
/// any iteration begins.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("unknown grid '{0}'")]
    UnknownGrid(String),

    #[error("duplicate parameter '{0}'")]
    DuplicateParam(String),

    #[error("parameter '{0}' has an empty levels list")]
    EmptyLevels(String),

    #[error("bad date '{0}', expected YYYYMMDDHH or YYYYMMDD")]
    BadDate(String),

    #[error("period {name}: {reason}")]
    Period { name: String, reason: String },

    #[error("missing period '{0}' in dataset_conf.periods")]
    MissingPeriod(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A date in the configuration document; YAML authors write these as
/// either bare integers (`2022020100`) or strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigStamp {
    Num(u64),
    Text(String),
}

impl ConfigStamp {
    pub fn as_text(&self) -> String {
        match self {
            ConfigStamp::Num(n) => n.to_string(),
            ConfigStamp::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeriodConf {
    pub start: ConfigStamp,
    pub end: ConfigStamp,
    /// Observation cadence in seconds.
    pub obs_step: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridConf {
    pub name: String,
    #[serde(default)]
    pub border_size: usize,
    /// [row_min, row_max, col_min, col_max] in source-grid index space.
    pub subdomain: [i64; 4],
    #[serde(default)]
    pub proj_name: Option<String>,
    #[serde(default)]
    pub projection_kwargs: HashMap<String, serde_yaml::Value>,
}

impl GridConf {
    /// Projection keyword arguments as plain strings, for rendering into
    /// downstream georeferencing metadata.
    pub fn projection_kwargs_text(&self) -> HashMap<String, String> {
        self.projection_kwargs
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    serde_yaml::Value::String(s) => s.clone(),
                    other => serde_yaml::to_string(other)
                        .unwrap_or_default()
                        .trim_end()
                        .to_string(),
                };
                (k.clone(), text)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsConf {
    #[serde(default = "default_true")]
    pub standardize: bool,
    #[serde(default = "default_file_format")]
    pub file_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamConf {
    pub levels: Vec<i64>,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConf {
    pub periods: HashMap<String, PeriodConf>,
    pub grid: GridConf,
    #[serde(default = "default_settings")]
    pub settings: SettingsConf,
    /// Insertion order of this mapping defines tensor channel ordering.
    pub params: IndexMap<String, ParamConf>,
}

/// The full configuration document driving `build_pipeline`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub num_input_steps: usize,
    pub num_pred_steps_train: usize,
    pub num_pred_steps_val_test: usize,
    pub batch_size: usize,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_prefetch_factor")]
    pub prefetch_factor: usize,
    #[serde(default)]
    pub pin_memory: bool,
    /// Base seed for the per-epoch shuffle permutation.
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub dataset_conf: DatasetConf,
}

fn default_true() -> bool {
    true
}

fn default_file_format() -> String {
    "npy".to_string()
}

fn default_settings() -> SettingsConf {
    SettingsConf {
        standardize: true,
        file_format: default_file_format(),
    }
}

fn default_num_workers() -> usize {
    1
}

fn default_prefetch_factor() -> usize {
    2
}

fn default_seed() -> u64 {
    42
}

impl RunConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Structural checks that do not need the resolved grid or periods;
    /// those are validated where they are constructed.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_input_steps == 0 {
            return Err(ConfigError::Invalid(
                "num_input_steps must be at least 1".to_string(),
            ));
        }
        if self.num_pred_steps_train == 0 || self.num_pred_steps_val_test == 0 {
            return Err(ConfigError::Invalid(
                "prediction step counts must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.dataset_conf.params.is_empty() {
            return Err(ConfigError::Invalid(
                "dataset_conf.params must not be empty".to_string(),
            ));
        }
        let format = &self.dataset_conf.settings.file_format;
        if format != "npy" {
            return Err(ConfigError::Invalid(format!(
                "unsupported file_format '{format}', only 'npy' is available"
            )));
        }
        Ok(())
    }

    pub fn period(&self, name: &str) -> Result<&PeriodConf, ConfigError> {
        self.dataset_conf
            .periods
            .get(name)
            .ok_or_else(|| ConfigError::MissingPeriod(name.to_string()))
    }
}
