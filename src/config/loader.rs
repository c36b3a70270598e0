//! Configuration Loader
//!
//! Layers, lowest precedence first:
//!
//! 1. Struct defaults (`#[serde(default)]` on every section)
//! 2. Optional TOML file
//! 3. Environment variables prefixed `ANALYSIS_CACHE__`, with `__` between
//!    nested keys (`ANALYSIS_CACHE__REDIS__URL`)
//!
//! The merged result is validated before it is returned.

use super::error::ConfigResult;
use super::AnalysisCacheConfig;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ENV_PREFIX: &str = "ANALYSIS_CACHE";
const ENV_SEPARATOR: &str = "__";

/// Builder for layered configuration loading
#[derive(Debug, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    /// Replaces the process environment; lets tests avoid global state
    env_override: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a TOML file; it must exist
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Use these variables instead of the process environment
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_override = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Merge every layer, deserialize and validate
    pub fn load(self) -> ConfigResult<AnalysisCacheConfig> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            debug!(path = %path.display(), "Loading cache configuration file");
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(self.env_override),
        );

        let config: AnalysisCacheConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            enabled = config.enabled,
            backend = %config.backend,
            namespace = %config.namespace,
            default_ttl_seconds = config.default_ttl_seconds,
            "Cache configuration loaded"
        );

        Ok(config)
    }

    /// Load from the process environment only
    pub fn load_from_env() -> ConfigResult<AnalysisCacheConfig> {
        Self::new().load()
    }

    /// Load a file layered under the process environment
    pub fn load_from_path(path: impl AsRef<Path>) -> ConfigResult<AnalysisCacheConfig> {
        Self::new().with_file(path).load()
    }
}
