use crate::metrics::ReductionPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable analysis configuration as stored in TOML.
// Every section falls back to its defaults when absent from the file.

/// Cluster bootstrap parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    pub n_iterations: usize,
    pub confidence_level: f64,
    /// Seeds the engine's random stream once, at construction.
    pub seed: u64,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            n_iterations: 1000,
            confidence_level: 0.95,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeeSettings {
    pub max_iter: u64,
    pub tolerance: f64,
    /// Adds the reader-identity covariate to the pooled cross-reader fit.
    pub include_reader: bool,
    /// Also fit a study-wide model when more than one reader is present.
    pub pooled: bool,
}

impl Default for GeeSettings {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tolerance: 1e-6,
            include_reader: false,
            pooled: true,
        }
    }
}

/// Threshold grid for decision curves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DcaSettings {
    pub threshold_min: f64,
    pub threshold_max: f64,
    pub n_thresholds: usize,
}

impl Default for DcaSettings {
    fn default() -> Self {
        Self {
            threshold_min: 0.05,
            threshold_max: 0.25,
            n_thresholds: 50,
        }
    }
}

/// Which artifacts the pipeline writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub json: bool,
    pub csv: bool,
    pub markdown: bool,
    /// Keep per-iteration bootstrap samples in the JSON artifacts.
    pub raw_samples: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            json: true,
            csv: true,
            markdown: true,
            raw_samples: true,
        }
    }
}

/// The complete analysis configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub aggregation: ReductionPolicy,
    pub bootstrap: BootstrapSettings,
    pub gee: GeeSettings,
    pub dca: DcaSettings,
    pub output: OutputSettings,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl AnalysisConfig {
    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads and validates a configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.bootstrap;
        if b.n_iterations == 0 {
            return Err(ConfigError::Invalid("bootstrap.n_iterations must be at least 1".into()));
        }
        if !(b.confidence_level > 0.0 && b.confidence_level < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "bootstrap.confidence_level must lie in (0, 1), got {}",
                b.confidence_level
            )));
        }

        let g = &self.gee;
        if g.max_iter == 0 {
            return Err(ConfigError::Invalid("gee.max_iter must be at least 1".into()));
        }
        if !(g.tolerance > 0.0 && g.tolerance.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "gee.tolerance must be positive, got {}",
                g.tolerance
            )));
        }

        let d = &self.dca;
        if d.n_thresholds == 0 {
            return Err(ConfigError::Invalid("dca.n_thresholds must be at least 1".into()));
        }
        let in_unit = |t: f64| t > 0.0 && t < 1.0;
        if !in_unit(d.threshold_min) || !in_unit(d.threshold_max) {
            return Err(ConfigError::Invalid(format!(
                "dca thresholds must lie strictly inside (0, 1), got [{}, {}]",
                d.threshold_min, d.threshold_max
            )));
        }
        if d.threshold_min > d.threshold_max {
            return Err(ConfigError::Invalid(format!(
                "dca.threshold_min ({}) exceeds dca.threshold_max ({})",
                d.threshold_min, d.threshold_max
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let c = AnalysisConfig::default();
        assert_eq!(c.bootstrap.n_iterations, 1000);
        assert_eq!(c.bootstrap.confidence_level, 0.95);
        assert_eq!(c.bootstrap.seed, 42);
        assert_eq!(c.gee.max_iter, 100);
        assert_eq!(c.dca.n_thresholds, 50);
        assert_eq!(c.aggregation, ReductionPolicy::Max);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("analysis.toml");
        let path = path.to_str().unwrap();

        let mut config = AnalysisConfig::default();
        config.bootstrap.seed = 7;
        config.aggregation = ReductionPolicy::Majority;
        config.output.raw_samples = false;
        config.save(path).unwrap();

        let loaded = AnalysisConfig::load(path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let config: AnalysisConfig = toml::from_str("[bootstrap]\nn_iterations = 200\n").unwrap();
        assert_eq!(config.bootstrap.n_iterations, 200);
        assert_eq!(config.bootstrap.seed, 42);
        assert_eq!(config.dca, DcaSettings::default());
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut config = AnalysisConfig::default();
        config.bootstrap.confidence_level = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AnalysisConfig::default();
        config.dca.threshold_max = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AnalysisConfig::default();
        config.dca.threshold_min = 0.3;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AnalysisConfig::default();
        config.bootstrap.n_iterations = 0;
        assert!(config.validate().is_err());
    }
}
