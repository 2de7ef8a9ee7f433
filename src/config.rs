//! Engine configuration.
//!
//! One immutable [`EngineConfig`] value is built at startup and threaded
//! through every component. Layers, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config <path>`, else `config.toml` in the platform
//!    config directory if it exists)
//! 3. Environment variables prefixed `MEDIADUPE_`, nested keys split on
//!    `__` (e.g. `MEDIADUPE_PIPELINE__WORKERS=4`)
//!
//! Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::duplicates::{
    parse_criteria, AlignmentConfig, GroupingConfig, ScoringConfig, UnknownCriterion,
    WinnerConfig,
};
use crate::pipeline::PipelineConfig;
use crate::scanner::{CatalogConfig, HashConfig, ProbeConfig};

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "MEDIADUPE_";

/// Errors from loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// A layer could not be parsed or extracted.
    #[error("Invalid configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// A value is out of range.
    #[error("Invalid value for {field}: {message}")]
    Invalid {
        /// Dotted key of the offending value
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// A keeper criterion is not recognized.
    #[error(transparent)]
    Criterion(#[from] UnknownCriterion),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Figment(Box::new(e))
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Discovery filters and sampling
    pub catalog: CatalogConfig,
    /// Partial/full hash windows
    pub hashing: HashConfig,
    /// Persistent hash cache
    pub cache: CacheConfig,
    /// Metadata and fingerprint extraction
    pub probe: ProbeConfig,
    /// Fingerprint alignment search
    pub alignment: AlignmentConfig,
    /// Confidence scoring thresholds
    pub scoring: ScoringConfig,
    /// Clustering thresholds
    pub grouping: GroupingConfig,
    /// Keeper selection
    pub winner: WinnerConfig,
    /// Orchestration, locking and workers
    pub pipeline: PipelineConfig,
}

/// Platform location of `config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "mediadupe", "mediadupe").map(|d| d.config_dir().join("config.toml"))
}

fn unit_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            message: format!("{value} is outside [0, 1]"),
        })
    }
}

impl EngineConfig {
    /// Layered figment for `path` (or the platform default file).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `path` is given but missing.
    pub fn figment(path: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                log::debug!("Loading config from {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(default) = default_config_path().filter(|p| p.exists()) {
                    log::debug!("Loading config from {}", default.display());
                    figment = figment.merge(Toml::file(default));
                }
            }
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load and validate the layered configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a layer is malformed or a value is out of
    /// range.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment(path)?)
    }

    /// Extract and validate a configuration from `figment`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on extraction or validation failure.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, e.g. to seed a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] if rendering fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every value for range and consistency.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ratio) = self.catalog.sample_ratio {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigError::Invalid {
                    field: "catalog.sample_ratio",
                    message: format!("{ratio} is outside (0, 1]"),
                });
            }
        }
        if self.hashing.block_size == 0 {
            return Err(ConfigError::Invalid {
                field: "hashing.block_size",
                message: "must be greater than zero".to_string(),
            });
        }

        unit_interval("grouping.accept_threshold", self.grouping.accept_threshold)?;
        unit_interval("grouping.low_confidence_floor", self.grouping.low_confidence_floor)?;
        unit_interval("grouping.min_duration_ratio", self.grouping.min_duration_ratio)?;
        unit_interval("grouping.min_size_ratio", self.grouping.min_size_ratio)?;
        unit_interval("scoring.min_coverage", self.scoring.min_coverage)?;
        unit_interval("probe.audio_params.min_fraction", self.probe.audio_params.min_fraction)?;

        if !(self.scoring.distance_ceiling > 0.0 && self.scoring.distance_ceiling <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "scoring.distance_ceiling",
                message: format!("{} is outside (0, 1]", self.scoring.distance_ceiling),
            });
        }
        if self.alignment.steps.is_empty() {
            return Err(ConfigError::Invalid {
                field: "alignment.steps",
                message: "at least one step multiplier is required".to_string(),
            });
        }
        if let Some(bad) = self
            .alignment
            .steps
            .iter()
            .find(|s| !(s.is_finite() && **s > 0.0))
        {
            return Err(ConfigError::Invalid {
                field: "alignment.steps",
                message: format!("step {bad} must be positive"),
            });
        }
        if self.alignment.offset_stride == 0 {
            return Err(ConfigError::Invalid {
                field: "alignment.offset_stride",
                message: "must be greater than zero".to_string(),
            });
        }

        parse_criteria(&self.winner.criteria)?;
        Ok(())
    }
}
