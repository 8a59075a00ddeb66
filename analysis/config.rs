//! Pipeline settings, loadable from TOML. Every field has a default, so a
//! config file only needs the values it changes.

use crate::boost::BoostParams;
use crate::features::DEFAULT_FEATURES;
use crate::glm::GlmOptions;
use crate::mlp::MlpParams;
use crate::resample::{DEFAULT_MC_PROPORTION, DEFAULT_MC_TIMES};
use crate::split::DEFAULT_TRAIN_PROPORTION;
use crate::tuning::DEFAULT_GRID_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train_proportion: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig {
            train_proportion: DEFAULT_TRAIN_PROPORTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub predictors: Vec<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            predictors: DEFAULT_FEATURES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplingConfig {
    pub proportion: f64,
    pub times: usize,
    pub stratified: bool,
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        ResamplingConfig {
            proportion: DEFAULT_MC_PROPORTION,
            times: DEFAULT_MC_TIMES,
            stratified: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeConfig {
    /// Majority rows kept per minority row when down-sampling.
    pub under_ratio: f64,
    pub one_hot: bool,
}

impl Default for RecipeConfig {
    fn default() -> Self {
        RecipeConfig {
            under_ratio: 1.0,
            one_hot: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub grid_size: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        TuningConfig {
            grid_size: DEFAULT_GRID_SIZE,
        }
    }
}

/// Complete settings for one `run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub seed: u64,
    pub output_dir: PathBuf,
    pub split: SplitConfig,
    pub features: FeatureConfig,
    pub resampling: ResamplingConfig,
    pub recipe: RecipeConfig,
    pub logistic: GlmOptions,
    pub mlp: MlpParams,
    pub boost: BoostParams,
    pub tuning: TuningConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            seed: 42,
            output_dir: PathBuf::from("heartfail_output"),
            split: SplitConfig::default(),
            features: FeatureConfig::default(),
            resampling: ResamplingConfig::default(),
            recipe: RecipeConfig::default(),
            logistic: GlmOptions::default(),
            mlp: MlpParams::default(),
            boost: BoostParams::default(),
            tuning: TuningConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Range checks that do not depend on the data. Model-specific parameters
    /// are checked again by each learner when it fits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let open_unit = |field: &'static str, v: f64| {
            if v > 0.0 && v < 1.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("must lie strictly between 0 and 1, got {v}"),
                })
            }
        };
        open_unit("split.train_proportion", self.split.train_proportion)?;
        open_unit("resampling.proportion", self.resampling.proportion)?;

        if self.resampling.times == 0 {
            return Err(ConfigError::Invalid {
                field: "resampling.times",
                reason: "must be at least 1".into(),
            });
        }
        if self.features.predictors.is_empty() {
            return Err(ConfigError::Invalid {
                field: "features.predictors",
                reason: "must name at least one column".into(),
            });
        }
        if !(self.recipe.under_ratio >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "recipe.under_ratio",
                reason: format!("must be at least 1, got {}", self.recipe.under_ratio),
            });
        }
        if self.tuning.grid_size == 0 {
            return Err(ConfigError::Invalid {
                field: "tuning.grid_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.boost.trees == 0 {
            return Err(ConfigError::Invalid {
                field: "boost.trees",
                reason: "must be at least 1".into(),
            });
        }
        if self.mlp.epochs == 0 || self.mlp.hidden_units == 0 {
            return Err(ConfigError::Invalid {
                field: "mlp",
                reason: "epochs and hidden_units must be at least 1".into(),
            });
        }
        Ok(())
    }
}
