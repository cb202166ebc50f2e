use crate::error::{DatabaseError, DatabaseResult};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

/// SQLite journal mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
}

impl JournalMode {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }

    fn sqlite(self) -> SqliteJournalMode {
        match self {
            Self::Wal => SqliteJournalMode::Wal,
            Self::Delete => SqliteJournalMode::Delete,
        }
    }
}

/// SQLite synchronous mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynchronousMode {
    #[default]
    Full,
    Normal,
}

impl SynchronousMode {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }

    fn sqlite(self) -> SqliteSynchronous {
        match self {
            Self::Full => SqliteSynchronous::Full,
            Self::Normal => SqliteSynchronous::Normal,
        }
    }
}

/// Tuning options for the embedded datastore. Unset fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Maximum number of pooled connections
    pub max_open_conns: u32,
    /// Connections kept open while idle
    pub min_idle_conns: u32,
    /// Close connections idle for longer than this
    pub conn_max_idle_time_secs: Option<u64>,
    /// Recycle connections older than this
    pub conn_max_lifetime_secs: Option<u64>,
    /// How long a writer waits on a locked database
    pub busy_timeout_ms: u64,
    pub journal_mode: JournalMode,
    pub synchronous: SynchronousMode,
    pub foreign_keys: bool,
    /// Create the database file when it does not exist
    pub create_if_missing: bool,
    pub max_tuples_per_write: usize,
    pub max_types_per_authorization_model: usize,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            max_open_conns: 10,
            min_idle_conns: 0,
            conn_max_idle_time_secs: None,
            conn_max_lifetime_secs: None,
            busy_timeout_ms: 5_000,
            journal_mode: JournalMode::Wal,
            synchronous: SynchronousMode::Full,
            foreign_keys: true,
            create_if_missing: true,
            max_tuples_per_write: fga_engine::datastore::DEFAULT_MAX_TUPLES_PER_WRITE,
            max_types_per_authorization_model:
                fga_engine::datastore::DEFAULT_MAX_TYPES_PER_AUTHORIZATION_MODEL,
        }
    }
}

impl DatastoreConfig {
    pub fn validate(&self) -> DatabaseResult<()> {
        if self.max_open_conns == 0 {
            return Err(DatabaseError::InvalidConfig(
                "max_open_conns must be greater than zero".to_string(),
            ));
        }
        if self.min_idle_conns > self.max_open_conns {
            return Err(DatabaseError::InvalidConfig(format!(
                "min_idle_conns ({}) exceeds max_open_conns ({})",
                self.min_idle_conns, self.max_open_conns
            )));
        }
        if self.max_tuples_per_write == 0 {
            return Err(DatabaseError::InvalidConfig(
                "max_tuples_per_write must be greater than zero".to_string(),
            ));
        }
        if self.max_types_per_authorization_model == 0 {
            return Err(DatabaseError::InvalidConfig(
                "max_types_per_authorization_model must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.conn_max_idle_time_secs.map(Duration::from_secs)
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.conn_max_lifetime_secs.map(Duration::from_secs)
    }

    /// Connection options for `uri` with this configuration's pragmas applied
    pub fn connect_options(&self, uri: &str) -> DatabaseResult<SqliteConnectOptions> {
        Ok(base_options(uri)?
            .create_if_missing(self.create_if_missing)
            .journal_mode(self.journal_mode.sqlite())
            .synchronous(self.synchronous.sqlite())
            .foreign_keys(self.foreign_keys)
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms)))
    }
}

/// Accepts a plain filesystem path or a `sqlite:` URI
fn base_options(uri: &str) -> DatabaseResult<SqliteConnectOptions> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(DatabaseError::InvalidUri(uri.to_string()));
    }
    if uri.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(uri).map_err(|_| DatabaseError::InvalidUri(uri.to_string()))
    } else {
        Ok(SqliteConnectOptions::new().filename(uri))
    }
}
