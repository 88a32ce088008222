use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::hash::Metric;
use crate::core::index::PairStrategy;
use crate::core::relatives::LinkBasis;
use crate::error::{EngineError, Result};

pub const CONFIG_ENV: &str = "LINEAGE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Side length of the hash matrix; hashes carry `hash_size²` bits.
    #[serde(default = "default_hash_size")]
    pub hash_size: u32,

    /// Distance at or below which two occurrences are the same image.
    #[serde(default = "default_identical_threshold")]
    pub identical_threshold: f64,

    /// Distance at or below which two images are linked as relatives.
    #[serde(default = "default_related_threshold")]
    pub related_threshold: f64,

    #[serde(default)]
    pub metric: Metric,

    #[serde(default)]
    pub pair_strategy: PairStrategy,

    #[serde(default)]
    pub link_basis: LinkBasis,
}

fn default_hash_size() -> u32 {
    8
}

fn default_identical_threshold() -> f64 {
    2.0
}

fn default_related_threshold() -> f64 {
    3.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hash_size: default_hash_size(),
            identical_threshold: default_identical_threshold(),
            related_threshold: default_related_threshold(),
            metric: Metric::default(),
            pair_strategy: PairStrategy::default(),
            link_basis: LinkBasis::default(),
        }
    }
}

impl EngineConfig {
    /// Loads `$LINEAGE_CONFIG`, then the per-user config file, falling back to
    /// defaults when neither exists.
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load_from(Path::new(&path));
        }
        let path = Self::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lineage")
            .join("config.toml")
    }

    pub fn hash_bits(&self) -> usize {
        let side = self.hash_size as usize;
        side * side
    }

    pub fn identical_bound(&self) -> u32 {
        self.metric
            .hamming_bound(self.identical_threshold, self.hash_bits())
    }

    pub fn related_bound(&self) -> u32 {
        self.metric.hamming_bound(self.related_threshold, self.hash_bits())
    }

    pub fn validate(&self) -> Result<()> {
        if self.hash_size < 2 || !self.hash_size.is_power_of_two() {
            return Err(EngineError::Configuration(format!(
                "hash_size must be a power of two of at least 2, got {}",
                self.hash_size
            )));
        }
        if self.hash_size > 64 {
            return Err(EngineError::Configuration(format!(
                "hash_size must be at most 64, got {}",
                self.hash_size
            )));
        }
        for (name, value) in [
            ("identical_threshold", self.identical_threshold),
            ("related_threshold", self.related_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::Configuration(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.related_threshold < self.identical_threshold {
            return Err(EngineError::Configuration(format!(
                "related_threshold ({}) must not be below identical_threshold ({})",
                self.related_threshold, self.identical_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_thresholds() {
        let config = EngineConfig::default();
        assert_eq!(config.hash_size, 8);
        assert_eq!(config.hash_bits(), 64);
        assert_eq!(config.identical_bound(), 4);
        assert_eq!(config.related_bound(), 9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        for hash_size in [0, 1, 3, 12, 128] {
            let config = EngineConfig {
                hash_size,
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(EngineError::Configuration(_))),
                "hash_size {} should be rejected",
                hash_size
            );
        }
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let config = EngineConfig {
            identical_threshold: 4.0,
            related_threshold: 3.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::Configuration(_))
        ));

        let config = EngineConfig {
            identical_threshold: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "hash_size = 16\nmetric = \"hamming\"\nrelated_threshold = 12.0\npair_strategy = \"multi-index\"\n",
        )
        .unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.hash_size, 16);
        assert_eq!(config.metric, Metric::Hamming);
        assert_eq!(config.identical_threshold, 2.0);
        assert_eq!(config.related_threshold, 12.0);
        assert_eq!(config.pair_strategy, PairStrategy::MultiIndex);
        assert_eq!(config.link_basis, LinkBasis::Canonical);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "hash_size = \"eight\"").unwrap();
        assert!(matches!(
            EngineConfig::load_from(&path),
            Err(EngineError::Toml(_))
        ));
    }
}
