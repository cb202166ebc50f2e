//! Embedded SQLite datastore for the FGA engine
//!
//! - [`SqliteDatastore`]: the engine's storage backend over one database file
//! - [`migration`]: the bundled, versioned schema and its runner
//! - [`DatastoreConfig`]: pool and pragma tuning

pub mod config;
pub mod connection;
pub mod error;
pub mod migration;
pub mod sqlite;

pub use config::{DatastoreConfig, JournalMode, SynchronousMode};
pub use error::{DatabaseError, DatabaseResult};
pub use migration::{current_version, latest_version, migrate, MigrationReport};
pub use sqlite::SqliteDatastore;
