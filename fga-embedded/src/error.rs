use fga_datastore::DatabaseError;
use fga_engine::ServerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FacadeError {
    #[error("Server is not initialized; call init_server first")]
    NotInitialized,

    #[error("Failed to decode {operation} request: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode {operation} response: {source}")]
    Encode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Passed through from the engine unchanged
    #[error(transparent)]
    Engine(#[from] ServerError),

    #[error("Datastore error: {0}")]
    Datastore(#[from] DatabaseError),

    #[error("Migration failed: {0}")]
    Migration(#[source] DatabaseError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Blocking facade call made from inside an async runtime; call it from a blocking thread")]
    InsideAsyncRuntime,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for FacadeError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl FacadeError {
    /// The engine error, when the engine rejected the request
    pub fn engine_error(&self) -> Option<&ServerError> {
        match self {
            Self::Engine(err) => Some(err),
            _ => None,
        }
    }
}

pub type FacadeResult<T> = Result<T, FacadeError>;
