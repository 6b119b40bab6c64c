// src/config.rs

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use crate::{error::PipelineError, warehouse::TableId};

// Configuration constants for the pipeline //

pub const DEFAULT_CONFIG_FILE: &str = ".sourcepaths";
pub const LOG_FILE_NAME: &str = "netflix_pipeline.log";
pub const DEFAULT_PROJECT_ID: &str = "netflix-titles-463907";
pub const DEFAULT_DATASET: &str = "netflix_db";
pub const RAW_TABLE: &str = "netflix_raw";
pub const CLEANED_TABLE: &str = "netflix_cleaned";

pub const CREDENTIALS_PATH: &str = "CREDENTIALS_PATH";
pub const OUTPUT_DIR: &str = "OUTPUT_DIR";
pub const PROJECT_ID: &str = "PROJECT_ID";
pub const DATASET: &str = "DATASET";
pub const BIGQUERY_LOCATION: &str = "BIGQUERY_LOCATION";
pub const COERCION_POLICY: &str = "COERCION_POLICY";
pub const SOURCE_TABLE: &str = "SOURCE_TABLE";
pub const DESTINATION_TABLE: &str = "DESTINATION_TABLE";

const KNOWN_KEYS: &[&str] = &[
    CREDENTIALS_PATH,
    OUTPUT_DIR,
    PROJECT_ID,
    DATASET,
    BIGQUERY_LOCATION,
    COERCION_POLICY,
    SOURCE_TABLE,
    DESTINATION_TABLE,
];

/// What to do with a `release_year` value that is not an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoercionPolicy {
    /// Fail the whole run on the first bad value.
    #[default]
    Abort,
    /// Null the bad value so the row is dropped with the other incomplete rows.
    Quarantine,
}

impl FromStr for CoercionPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(CoercionPolicy::Abort),
            "quarantine" => Ok(CoercionPolicy::Quarantine),
            other => Err(PipelineError::configuration(format!(
                "{} must be `abort` or `quarantine`, got {:?}",
                COERCION_POLICY, other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub credentials_path: PathBuf,
    pub output_dir: PathBuf,
    pub project_id: String,
    pub dataset: String,
    pub location: Option<String>,
    pub coercion_policy: CoercionPolicy,
    /// Full `project.dataset.table` to read instead of `<project>.<dataset>.netflix_raw`.
    pub source_override: Option<TableId>,
    /// Destination base used instead of `<project>.<dataset>.netflix_cleaned`.
    pub destination_override: Option<TableId>,
}

impl Config {
    /// Read settings from the dotenv-style file at `path`, letting variables
    /// already set in the process environment win. A missing file is not an
    /// error by itself; missing required keys are.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let mut vars = read_env_file(path.as_ref())?;
        for key in KNOWN_KEYS {
            if let Ok(value) = env::var(key) {
                vars.insert((*key).to_string(), value);
            }
        }
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, PipelineError> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let require = |key: &str| {
            get(key).ok_or_else(|| PipelineError::configuration(format!("{} is not set", key)))
        };

        let coercion_policy = match get(COERCION_POLICY) {
            Some(raw) => raw.parse::<CoercionPolicy>()?,
            None => CoercionPolicy::default(),
        };

        let source_override = get(SOURCE_TABLE).map(|s| TableId::parse(&s)).transpose()?;
        let destination_override = get(DESTINATION_TABLE)
            .map(|s| TableId::parse(&s))
            .transpose()?;

        Ok(Self {
            credentials_path: PathBuf::from(require(CREDENTIALS_PATH)?),
            output_dir: PathBuf::from(require(OUTPUT_DIR)?),
            project_id: get(PROJECT_ID).unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string()),
            dataset: get(DATASET).unwrap_or_else(|| DEFAULT_DATASET.to_string()),
            location: get(BIGQUERY_LOCATION),
            coercion_policy,
            source_override,
            destination_override,
        })
    }

    pub fn source_table(&self) -> TableId {
        self.source_override
            .clone()
            .unwrap_or_else(|| TableId::new(&self.project_id, &self.dataset, RAW_TABLE))
    }

    /// Destination base; each run writes to a date-suffixed version of it.
    pub fn destination_base(&self) -> TableId {
        self.destination_override
            .clone()
            .unwrap_or_else(|| TableId::new(&self.project_id, &self.dataset, CLEANED_TABLE))
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(LOG_FILE_NAME)
    }

    /// Create the output directory if needed and return the log file path.
    pub fn prepare_output_dir(&self) -> Result<PathBuf, PipelineError> {
        fs::create_dir_all(&self.output_dir).map_err(|e| {
            PipelineError::configuration(format!(
                "creating output directory {}: {}",
                self.output_dir.display(),
                e
            ))
        })?;
        Ok(self.log_path())
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, PipelineError> {
    let mut vars = HashMap::new();
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using environment only");
        return Ok(vars);
    }

    let iter = dotenvy::from_path_iter(path).map_err(|e| {
        PipelineError::configuration(format!("reading {}: {}", path.display(), e))
    })?;
    for item in iter {
        let (key, value) = item.map_err(|e| {
            PipelineError::configuration(format!("parsing {}: {}", path.display(), e))
        })?;
        vars.insert(key, value);
    }
    Ok(vars)
}
