//! Embeddable FGA facade
//!
//! Runs one authorization server per process over a single SQLite file and
//! exposes it through blocking, bytes-in/bytes-out entry points.
//!
//! ```no_run
//! use fga_embedded::{check, create_store, init_server, migrate_database};
//!
//! # fn main() -> Result<(), fga_embedded::FacadeError> {
//! migrate_database("fga.db")?;
//! init_server("fga.db")?;
//! let store = create_store("acme")?;
//! # let _ = (store, check);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod facade;
pub mod lifecycle;
pub mod logging;

pub use config::{EmbeddedConfig, LoggingConfig, RuntimeConfig};
pub use error::{FacadeError, FacadeResult};
pub use facade::{
    check, check_response, create_store, list_objects, list_objects_response, list_stores,
    list_users, read_authorization_models, write, write_authorization_model,
};
pub use lifecycle::{
    init_server, init_server_with_config, is_initialized, migrate_database, EmbeddedServer,
    ServerLifecycle,
};
pub use logging::init_logging;

pub use fga_datastore::{DatastoreConfig, MigrationReport};
pub use fga_engine as engine;
