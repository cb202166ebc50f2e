use crate::error::{FacadeError, FacadeResult};
use config::{Config, Environment, File};
use fga_datastore::DatastoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for an embedded server
///
/// Layers, lowest precedence first:
/// - defaults from each field
/// - an optional file (YAML, TOML or JSON by extension)
/// - `FGA_` environment variables, `__` separating nested keys
///   (`FGA_DATASTORE__BUSY_TIMEOUT_MS=1000`, `FGA_RUNTIME__WORKER_THREADS=4`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedConfig {
    pub datastore: DatastoreConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

/// Runtime backing the blocking facade calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub worker_threads: usize,
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            thread_name: "fga-embedded".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directives used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl EmbeddedConfig {
    pub fn load(path: Option<&Path>) -> FacadeResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let builder = builder.add_source(
            Environment::with_prefix("FGA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: EmbeddedConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FacadeResult<()> {
        if self.runtime.worker_threads == 0 {
            return Err(FacadeError::Config(
                "runtime.worker_threads must be greater than zero".to_string(),
            ));
        }
        self.datastore
            .validate()
            .map_err(|e| FacadeError::Config(e.to_string()))
    }
}
