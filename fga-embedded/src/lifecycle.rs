//! Process-wide lifecycle of the embedded authorization server

use crate::config::{EmbeddedConfig, RuntimeConfig};
use crate::error::{FacadeError, FacadeResult};
use fga_datastore::{MigrationReport, SqliteDatastore};
use fga_engine::{ExperimentalFeatureFlag, Server};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{info, warn};

static SERVER: ServerLifecycle = ServerLifecycle::new();

/// Experimental engine features every embedded server runs with
pub const EXPERIMENTALS: [ExperimentalFeatureFlag; 1] = [ExperimentalFeatureFlag::EnableListUsers];

/// Engine instance plus the runtime its calls are driven on.
///
/// The runtime's `block_on` is the background context for every call: no
/// deadline and no cancellation.
pub struct EmbeddedServer {
    runtime: Runtime,
    server: Server,
}

impl EmbeddedServer {
    /// Open the datastore at `uri` and build a server over it
    pub fn open(uri: &str, config: &EmbeddedConfig) -> FacadeResult<Self> {
        ensure_blocking_context()?;
        config.validate()?;
        let runtime = build_runtime(&config.runtime)?;

        let datastore = runtime.block_on(SqliteDatastore::open(uri, config.datastore.clone()))?;
        let server = Server::builder()
            .with_datastore(Arc::new(datastore))
            .with_experimentals(EXPERIMENTALS)
            .build()?;
        Ok(Self { runtime, server })
    }

    /// Wrap an already built server
    pub fn with_server(server: Server, config: &RuntimeConfig) -> FacadeResult<Self> {
        ensure_blocking_context()?;
        let runtime = build_runtime(config)?;
        Ok(Self { runtime, server })
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Drive one engine call to completion on the calling thread
    pub(crate) fn block_on<F: std::future::Future>(&self, future: F) -> FacadeResult<F::Output> {
        ensure_blocking_context()?;
        Ok(self.runtime.block_on(future))
    }
}

/// Blocking on a runtime from one of its own async tasks would panic
fn ensure_blocking_context() -> FacadeResult<()> {
    match Handle::try_current() {
        Ok(_) => Err(FacadeError::InsideAsyncRuntime),
        Err(_) => Ok(()),
    }
}

fn build_runtime(config: &RuntimeConfig) -> FacadeResult<Runtime> {
    Ok(Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name(config.thread_name.clone())
        .enable_all()
        .build()?)
}

/// Holder of the single live server instance.
///
/// Construct once, read many: readers clone the `Arc` under a read lock and
/// release the lock before doing any work.
pub struct ServerLifecycle {
    instance: RwLock<Option<Arc<EmbeddedServer>>>,
}

impl Default for ServerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerLifecycle {
    pub const fn new() -> Self {
        Self {
            instance: parking_lot::const_rwlock(None),
        }
    }

    /// The lifecycle backing the free-function API
    pub fn global() -> &'static ServerLifecycle {
        &SERVER
    }

    pub fn is_initialized(&self) -> bool {
        self.instance.read().is_some()
    }

    /// The live instance, or `NotInitialized`
    pub fn instance(&self) -> FacadeResult<Arc<EmbeddedServer>> {
        self.instance
            .read()
            .as_ref()
            .cloned()
            .ok_or(FacadeError::NotInitialized)
    }

    /// Make `server` the live instance, returning the one it replaced
    pub fn install(&self, server: EmbeddedServer) -> Option<Arc<EmbeddedServer>> {
        self.instance.write().replace(Arc::new(server))
    }
}

/// Open the datastore at `uri` with default settings and make it the live
/// server. The schema must already be migrated.
pub fn init_server(uri: &str) -> FacadeResult<()> {
    init_server_with_config(uri, &EmbeddedConfig::default())
}

/// Like [`init_server`] with explicit configuration. On failure the previous
/// instance, if any, stays live.
pub fn init_server_with_config(uri: &str, config: &EmbeddedConfig) -> FacadeResult<()> {
    let server = EmbeddedServer::open(uri, config)?;
    let previous = SERVER.install(server);
    if previous.is_some() {
        warn!("Replaced the running embedded server with one for {}", uri);
    }
    // Dropped outside the lock; readers may still hold clones of it
    drop(previous);

    info!("Embedded server initialized for {}", uri);
    Ok(())
}

pub fn is_initialized() -> bool {
    SERVER.is_initialized()
}

/// Apply every pending schema migration to the datastore at `uri`.
/// Must run to completion before `init_server` for the same file.
pub fn migrate_database(uri: &str) -> FacadeResult<MigrationReport> {
    ensure_blocking_context()?;
    let runtime = Builder::new_current_thread().enable_all().build()?;
    runtime
        .block_on(fga_datastore::migrate(uri))
        .map_err(FacadeError::Migration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fga_engine::InMemoryDatastore;

    fn in_memory() -> EmbeddedServer {
        let server = Server::builder()
            .with_datastore(Arc::new(InMemoryDatastore::new()))
            .build()
            .unwrap();
        EmbeddedServer::with_server(server, &RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_lifecycle_is_not_initialized() {
        let lifecycle = ServerLifecycle::new();
        assert!(!lifecycle.is_initialized());
        assert!(matches!(
            lifecycle.instance(),
            Err(FacadeError::NotInitialized)
        ));
    }

    #[test]
    fn test_install_replaces_instance() {
        let lifecycle = ServerLifecycle::new();
        assert!(lifecycle.install(in_memory()).is_none());
        let first = lifecycle.instance().unwrap();

        let previous = lifecycle.install(in_memory()).unwrap();
        assert!(Arc::ptr_eq(&first, &previous));
        assert!(!Arc::ptr_eq(&first, &lifecycle.instance().unwrap()));
    }

    #[test]
    fn test_migration_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("fga.db");
        let result = migrate_database(path.to_str().unwrap());
        assert!(matches!(result, Err(FacadeError::Migration(_))));
    }

    #[test]
    fn test_calls_inside_async_runtime_are_rejected() {
        let embedded = in_memory();
        let host = Builder::new_current_thread().build().unwrap();

        let (blocked, migrated, wrapped) = host.block_on(async {
            (
                embedded.block_on(async { 1 }),
                migrate_database("unused.db"),
                EmbeddedServer::open("unused.db", &EmbeddedConfig::default()),
            )
        });
        assert!(matches!(blocked, Err(FacadeError::InsideAsyncRuntime)));
        assert!(matches!(migrated, Err(FacadeError::InsideAsyncRuntime)));
        assert!(matches!(wrapped, Err(FacadeError::InsideAsyncRuntime)));

        assert_eq!(embedded.block_on(async { 1 }).unwrap(), 1);
    }

    #[test]
    fn test_open_fails_for_unreachable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("fga.db");
        let result = EmbeddedServer::open(path.to_str().unwrap(), &EmbeddedConfig::default());
        assert!(matches!(result, Err(FacadeError::Datastore(_))));
    }
}
