//! Layered settings: built-in defaults, then the YAML file, then environment
//! variables, then command-line flags.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use engine::{
    ChecksumAlgorithm, EngineConfig, EngineError, DEFAULT_BATCH_SIZE, DEFAULT_DATABASE_PATH,
    DEFAULT_EXCLUDE_PATTERNS,
};

/// Config file read when `--config` is not given (optional).
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Environment variable to settings key.
const ENV_KEYS: [(&str, &str); 10] = [
    ("SOURCE_DIR", "source_dir"),
    ("TARGET_DIR", "target_dir"),
    ("DATABASE_PATH", "database.path"),
    ("BATCH_SIZE", "processing.batch_size"),
    ("RECURSIVE", "processing.recursive"),
    ("COMPUTE_HASH", "hash.compute"),
    ("HASH_ALGORITHM", "hash.algorithm"),
    ("DRY_RUN", "execution.dry_run"),
    ("LOG_LEVEL", "logging.level"),
    ("LOG_FILE", "logging.file"),
];

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required setting '{0}'")]
    Missing(&'static str),

    #[error("Invalid setting: {0}")]
    Invalid(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Values given on the command line. `None`/`false`/empty means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source_dir: Option<PathBuf>,
    pub target_dir: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub dry_run: bool,
    pub compute_hash: bool,
    pub hash_algorithm: Option<String>,
    pub no_recursive: bool,
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub source_dir: Option<PathBuf>,
    #[serde(default)]
    pub target_dir: Option<PathBuf>,
    pub database: DatabaseSettings,
    pub processing: ProcessingSettings,
    pub hash: HashSettings,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    pub execution: ExecutionSettings,
    pub logging: LoggingSettings,
    pub integrity: IntegritySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingSettings {
    pub batch_size: i64,
    pub recursive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HashSettings {
    pub compute: bool,
    pub algorithm: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSettings {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegritySettings {
    pub flag_stale_sources: bool,
}

/// Resolve settings from every layer.
///
/// An explicitly given `config_path` must exist; the default path is used
/// only if present. `env` is passed in rather than read so callers decide
/// what the process environment is.
pub fn load(
    config_path: Option<&Path>,
    env: &HashMap<String, String>,
    overrides: &Overrides,
) -> Result<Settings, SettingsError> {
    let (file, required) = match config_path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };

    let mut builder = Config::builder()
        .set_default("database.path", DEFAULT_DATABASE_PATH)?
        .set_default("processing.batch_size", DEFAULT_BATCH_SIZE as i64)?
        .set_default("processing.recursive", true)?
        .set_default("hash.compute", false)?
        .set_default("hash.algorithm", ChecksumAlgorithm::default().to_string())?
        .set_default(
            "exclude_patterns",
            DEFAULT_EXCLUDE_PATTERNS.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        )?
        .set_default("include_patterns", Vec::<String>::new())?
        .set_default("execution.dry_run", false)?
        .set_default("logging.level", "info")?
        .set_default("integrity.flag_stale_sources", false)?
        .add_source(File::from(file).format(FileFormat::Yaml).required(required));

    for (var, key) in ENV_KEYS {
        if let Some(value) = env.get(var).filter(|v| !v.is_empty()) {
            builder = builder.set_override(key, value.as_str())?;
        }
    }

    let path_str = |p: &Option<PathBuf>| p.as_ref().map(|p| p.to_string_lossy().into_owned());
    builder = builder
        .set_override_option("source_dir", path_str(&overrides.source_dir))?
        .set_override_option("target_dir", path_str(&overrides.target_dir))?
        .set_override_option("database.path", path_str(&overrides.database))?
        .set_override_option("processing.batch_size", overrides.batch_size.map(|n| n as i64))?
        .set_override_option("hash.algorithm", overrides.hash_algorithm.clone())?
        .set_override_option("logging.level", overrides.log_level.clone())?
        .set_override_option("logging.file", path_str(&overrides.log_file))?;
    if overrides.dry_run {
        builder = builder.set_override("execution.dry_run", true)?;
    }
    if overrides.compute_hash {
        builder = builder.set_override("hash.compute", true)?;
    }
    if overrides.no_recursive {
        builder = builder.set_override("processing.recursive", false)?;
    }

    let mut settings: Settings = builder.build()?.try_deserialize()?;
    settings.exclude_patterns.extend(overrides.exclude.iter().cloned());
    settings.include_patterns.extend(overrides.include.iter().cloned());
    Ok(settings)
}

impl Settings {
    pub fn hash_algorithm(&self) -> Result<ChecksumAlgorithm, SettingsError> {
        self.hash.algorithm.parse().map_err(SettingsError::Invalid)
    }

    pub fn target_dir(&self) -> Result<&Path, SettingsError> {
        self.target_dir.as_deref().ok_or(SettingsError::Missing("target_dir"))
    }

    /// Build and validate the configuration a batch runs with.
    pub fn engine_config(&self) -> Result<EngineConfig, SettingsError> {
        let source_dir = self.source_dir.as_deref().ok_or(SettingsError::Missing("source_dir"))?;
        let target_dir = self.target_dir()?;
        if self.processing.batch_size < 1 {
            return Err(SettingsError::Invalid(format!(
                "batch_size must be a positive integer, got {}",
                self.processing.batch_size
            )));
        }

        let mut config = EngineConfig::new(source_dir, target_dir, &self.database.path)
            .with_batch_size(self.processing.batch_size as usize)
            .with_exclude_patterns(self.exclude_patterns.iter().cloned())
            .with_include_patterns(self.include_patterns.iter().cloned())
            .with_dry_run(self.execution.dry_run)
            .with_recursive(self.processing.recursive)
            .with_stale_source_check(self.integrity.flag_stale_sources);
        config.hash_algorithm = self.hash_algorithm()?;
        config.compute_hash = self.hash.compute;

        config.validate()?;
        Ok(config)
    }
}
