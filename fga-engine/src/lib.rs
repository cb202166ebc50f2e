//! Relationship-based authorization engine
//!
//! Stores authorization models and relationship tuples behind a pluggable
//! datastore and evaluates queries against them:
//! - `Check`: does a user have a relation to an object
//! - `ListObjects`: which objects of a type a user has a relation to
//! - `ListUsers`: which users of a type have a relation to an object
//!
//! # Core Concepts
//!
//! - **Store**: an isolated namespace holding its own models and tuples
//! - **Authorization model**: object types and how their relations compose
//! - **Tuple**: a stored fact "user has relation to object"
//!
//! # Example
//!
//! ```rust
//! use fga_engine::{CreateStoreRequest, InMemoryDatastore, Server};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .with_datastore(Arc::new(InMemoryDatastore::new()))
//!         .build()?;
//!
//!     let store = server
//!         .create_store(CreateStoreRequest { name: "acme".to_string() })
//!         .await?;
//!     assert_eq!(store.name, "acme");
//!     Ok(())
//! }
//! ```

pub mod check;
pub mod datastore;
pub mod error;
pub mod list_objects;
pub mod list_users;
pub mod models;
pub mod schema;
pub mod server;
pub mod tuple;

pub use datastore::{InMemoryDatastore, OpenFgaDatastore, Pagination, TupleFilter};
pub use error::{DatastoreError, DatastoreResult, ServerError};
pub use models::*;
pub use schema::TypeSystem;
pub use server::{ExperimentalFeatureFlag, Server, ServerBuilder};
