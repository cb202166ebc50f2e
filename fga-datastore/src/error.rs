use sqlx::migrate::MigrateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid datastore uri '{0}'")]
    InvalidUri(String),

    #[error("Invalid datastore configuration: {0}")]
    InvalidConfig(String),

    #[error("Database is dirty at version {0}; a previous migration did not complete")]
    DirtyDatabase(i64),

    #[error("Migration error: {0}")]
    MigrationError(#[from] MigrateError),

    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
