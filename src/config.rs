//! Static configuration, read once from the environment at startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::index::IndexKind;
use crate::metric::DistanceMetric;

/// Parameters for the random-hyperplane LSH index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LshParams {
    /// Bits per signature (hyperplanes per table). At most 64.
    pub num_planes: usize,
    /// Number of independent hash tables.
    pub num_tables: usize,
    /// Base seed; the per-library build seed is derived from this.
    pub seed: u64,
    /// Candidate expansion target: multi-probe continues until the
    /// candidate set reaches `k * expansion_factor` (or the tables are
    /// exhausted).
    pub expansion_factor: usize,
}

impl Default for LshParams {
    fn default() -> Self {
        Self {
            num_planes: 16,
            num_tables: 4,
            seed: 42,
            expansion_factor: 32,
        }
    }
}

impl LshParams {
    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<()> {
        if self.num_planes == 0 || self.num_planes > 64 {
            return Err(QuiverError::invalid_argument(format!(
                "LSH_NUM_PLANES must be in 1..=64, got {}",
                self.num_planes
            )));
        }
        if self.num_tables == 0 {
            return Err(QuiverError::invalid_argument(
                "LSH_NUM_TABLES must be positive",
            ));
        }
        if self.expansion_factor == 0 {
            return Err(QuiverError::invalid_argument(
                "LSH expansion factor must be positive",
            ));
        }
        Ok(())
    }
}

/// Application configuration settings.
///
/// Read once at startup via [`Settings::from_env`]; there is no global
/// instance, the caller owns the value and passes it down.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory for snapshot files.
    pub data_dir: PathBuf,
    /// Default metric when none is configured for a library.
    pub default_metric: DistanceMetric,
    /// Default index algorithm when none is configured.
    pub default_index: IndexKind,
    /// LSH tuning parameters.
    pub lsh: LshParams,
    /// Verbosity for the embedding host's logger.
    pub log_level: String,
    /// Cohere API key; embeddings are unavailable without it.
    pub cohere_api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            default_metric: DistanceMetric::Cosine,
            default_index: IndexKind::Linear,
            lsh: LshParams::default(),
            log_level: "INFO".to_string(),
            cohere_api_key: None,
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through a key lookup function.
    ///
    /// Factored out of [`Settings::from_env`] so tests can supply values
    /// without mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();

        let settings = Settings {
            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            default_metric: match lookup("DEFAULT_METRIC") {
                Some(value) => DistanceMetric::parse_str(&value)?,
                None => defaults.default_metric,
            },
            default_index: match lookup("DEFAULT_INDEX") {
                Some(value) => IndexKind::parse_str(&value)?,
                None => defaults.default_index,
            },
            lsh: LshParams {
                num_planes: parse_numeric(&lookup, "LSH_NUM_PLANES", defaults.lsh.num_planes)?,
                num_tables: parse_numeric(&lookup, "LSH_NUM_TABLES", defaults.lsh.num_tables)?,
                seed: parse_numeric(&lookup, "LSH_SEED", defaults.lsh.seed)?,
                expansion_factor: defaults.lsh.expansion_factor,
            },
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            cohere_api_key: lookup("COHERE_API_KEY").filter(|key| !key.is_empty()),
        };

        settings.lsh.validate()?;
        Ok(settings)
    }
}

fn parse_numeric<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) => value.parse::<T>().map_err(|_| {
            QuiverError::invalid_argument(format!("{key} must be numeric, got '{value}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("data"));
        assert_eq!(settings.default_metric, DistanceMetric::Cosine);
        assert_eq!(settings.default_index, IndexKind::Linear);
        assert_eq!(settings.lsh.num_planes, 16);
        assert_eq!(settings.lsh.num_tables, 4);
        assert_eq!(settings.lsh.seed, 42);
        assert!(settings.cohere_api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_lookup(|key| match key {
            "DATA_DIR" => Some("/tmp/snapshots".into()),
            "DEFAULT_METRIC" => Some("euclidean".into()),
            "DEFAULT_INDEX" => Some("kdtree".into()),
            "LSH_NUM_PLANES" => Some("24".into()),
            "COHERE_API_KEY" => Some("secret".into()),
            _ => None,
        })
        .unwrap();

        assert_eq!(settings.data_dir, PathBuf::from("/tmp/snapshots"));
        assert_eq!(settings.default_metric, DistanceMetric::Euclidean);
        assert_eq!(settings.default_index, IndexKind::KdTree);
        assert_eq!(settings.lsh.num_planes, 24);
        assert_eq!(settings.cohere_api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Settings::from_lookup(|key| match key {
            "LSH_NUM_PLANES" => Some("lots".into()),
            _ => None,
        })
        .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");

        let err = Settings::from_lookup(|key| match key {
            "LSH_NUM_PLANES" => Some("65".into()),
            _ => None,
        })
        .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");

        let err = Settings::from_lookup(|key| match key {
            "DEFAULT_METRIC" => Some("manhattan".into()),
            _ => None,
        })
        .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }
}
