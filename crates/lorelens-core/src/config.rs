//! Store and chunking options, persisted as `config.toml` in the app data directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::chunks::{ChunkError, ChunkingOptions};
use crate::persistence::{Migration, Migrations};
use crate::similarity::Similarity;

const CONFIG_FILENAME: &str = "config.toml";

/// Default number of results returned by a search.
pub const DEFAULT_LOOKUPS: usize = 3;
/// Default weight of a document's best chunk against its chunk average.
pub const DEFAULT_MAX_WEIGHT: f32 = 0.7;

/// What the store does when its persisted record cannot be loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFailurePolicy {
    /// Report the fault to the diagnostic sink and start empty.
    #[default]
    Report,
    /// Return the fault from `VectorStore::open`.
    Propagate,
}

/// Tunables of one vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Maximum number of hits returned by `find_similar`.
    pub lookups: usize,
    /// Weight of the best-matching chunk; the chunk average gets `1 - max_weight`.
    pub max_weight: f32,
    /// Suffix of the storage key, for keeping several stores in one storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub load_failure: LoadFailurePolicy,
    pub similarity: Similarity,
    #[serde(skip)]
    pub migrations: Migrations,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lookups: DEFAULT_LOOKUPS,
            max_weight: DEFAULT_MAX_WEIGHT,
            namespace: None,
            load_failure: LoadFailurePolicy::default(),
            similarity: Similarity::default(),
            migrations: Migrations::default(),
        }
    }
}

impl StoreOptions {
    pub fn builder() -> StoreOptionsBuilder {
        StoreOptionsBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lookups == 0 {
            return Err(ConfigError::Invalid("lookups must be greater than zero".into()));
        }
        if !(0.0..=1.0).contains(&self.max_weight) {
            return Err(ConfigError::Invalid(format!(
                "max_weight ({}) must be within 0.0..=1.0",
                self.max_weight
            )));
        }
        if let Similarity::LengthNormalized { query_boost_factor } = self.similarity {
            if !query_boost_factor.is_finite() || query_boost_factor <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "query_boost_factor ({query_boost_factor}) must be a positive number"
                )));
            }
        }
        Ok(())
    }
}

/// Builder for a validated [`StoreOptions`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptionsBuilder {
    options: StoreOptions,
}

impl StoreOptionsBuilder {
    pub fn lookups(mut self, lookups: usize) -> Self {
        self.options.lookups = lookups;
        self
    }

    pub fn max_weight(mut self, weight: f32) -> Self {
        self.options.max_weight = weight;
        self
    }

    pub fn similarity(mut self, similarity: Similarity) -> Self {
        self.options.similarity = similarity;
        self
    }

    /// Use the length-normalized similarity with the given boost.
    pub fn query_boost_factor(mut self, factor: f32) -> Self {
        self.options.similarity = Similarity::LengthNormalized {
            query_boost_factor: factor,
        };
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.options.namespace = Some(namespace.into());
        self
    }

    pub fn load_failure(mut self, policy: LoadFailurePolicy) -> Self {
        self.options.load_failure = policy;
        self
    }

    /// Register a migration for records stored with `from_version`.
    pub fn migration(mut self, from_version: u32, migration: impl Migration + 'static) -> Self {
        self.options.migrations = self.options.migrations.register(from_version, migration);
        self
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `lookups == 0`, `max_weight` is outside
    /// `0.0..=1.0`, or the query boost factor is not a positive number.
    pub fn build(self) -> Result<StoreOptions, ConfigError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreOptions,
    pub chunking: ChunkingOptions,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.chunking.validate()?;
        Ok(())
    }
}

/// Path of `config.toml`, if the app data directory can be determined.
pub fn config_path() -> Option<PathBuf> {
    app_data::app_data_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(path) = config_path() else {
        return Config::default();
    };
    if !path.exists() {
        return Config::default();
    }
    read_config(&path).unwrap_or_else(|e| {
        tracing::warn!("ignoring {}: {e}", path.display());
        Config::default()
    })
}

/// Read and validate a config file.
pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
    let config: Config = toml::from_str(&s).map_err(ConfigError::Parse)?;
    config.validate()?;
    Ok(config)
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoDataDir)?;
    write_config(&path, config)
}

pub fn write_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    config.validate()?;
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to read config: {0}")]
    Read(std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("invalid store options: {0}")]
    Invalid(String),
    #[error("invalid chunking options: {0}")]
    Chunking(#[from] ChunkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = StoreOptions::default();
        assert_eq!(options.lookups, 3);
        assert_eq!(options.max_weight, 0.7);
        assert_eq!(
            options.similarity,
            Similarity::LengthNormalized {
                query_boost_factor: 1.2
            }
        );
        assert_eq!(options.load_failure, LoadFailurePolicy::Report);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn builder_rejects_bad_values() {
        assert!(StoreOptions::builder().lookups(0).build().is_err());
        assert!(StoreOptions::builder().max_weight(1.5).build().is_err());
        assert!(StoreOptions::builder().max_weight(f32::NAN).build().is_err());
        assert!(StoreOptions::builder().query_boost_factor(0.0).build().is_err());
        let ok = StoreOptions::builder()
            .lookups(5)
            .max_weight(0.2)
            .namespace("world")
            .build()
            .unwrap();
        assert_eq!(ok.namespace.as_deref(), Some("world"));
    }

    #[test]
    fn parse_toml_sections() {
        let s = r#"
            [store]
            lookups = 5
            max_weight = 0.5
            namespace = "world-1"
            load_failure = "propagate"

            [store.similarity]
            kind = "cosine"

            [chunking]
            chunk_size = 64
            chunk_overlap = 8
        "#;
        let config: Config = toml::from_str(s).unwrap();
        assert_eq!(config.store.lookups, 5);
        assert_eq!(config.store.similarity, Similarity::Cosine);
        assert_eq!(config.store.load_failure, LoadFailurePolicy::Propagate);
        assert_eq!(config.chunking.chunk_size, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str("[store]\nlookups = 7\n").unwrap();
        assert_eq!(config.store.lookups, 7);
        assert_eq!(config.store.max_weight, DEFAULT_MAX_WEIGHT);
        assert_eq!(config.chunking, ChunkingOptions::default());
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        let mut config = Config::default();
        config.store.lookups = 9;
        config.chunking.chunk_overlap = 4;
        write_config(&path, &config).unwrap();
        let back = read_config(&path).unwrap();
        assert_eq!(back.store.lookups, 9);
        assert_eq!(back.chunking.chunk_overlap, 4);
    }

    #[test]
    fn invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[chunking]\nchunk_size = 4\nchunk_overlap = 4\n").unwrap();
        assert!(matches!(read_config(&path), Err(ConfigError::Chunking(_))));
    }
}
