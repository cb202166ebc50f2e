use crate::{
    error::{DatastoreError, DatastoreResult},
    models::{AuthorizationModel, Store, TupleKey},
    tuple,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const DEFAULT_MAX_TUPLES_PER_WRITE: usize = 100;
pub const DEFAULT_MAX_TYPES_PER_AUTHORIZATION_MODEL: usize = 100;

/// Tuple read filter. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    pub object_type: Option<String>,
    pub object: Option<String>,
    pub relation: Option<String>,
    pub user: Option<String>,
}

impl TupleFilter {
    pub fn object_relation(object: &str, relation: &str) -> Self {
        Self {
            object: Some(object.to_string()),
            relation: Some(relation.to_string()),
            ..Default::default()
        }
    }

    pub fn type_relation(object_type: &str, relation: &str) -> Self {
        Self {
            object_type: Some(object_type.to_string()),
            relation: Some(relation.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, tuple: &TupleKey) -> bool {
        if let Some(object_type) = &self.object_type {
            if tuple::object_type(&tuple.object) != Some(object_type.as_str()) {
                return false;
            }
        }
        if let Some(object) = &self.object {
            if &tuple.object != object {
                return false;
            }
        }
        if let Some(relation) = &self.relation {
            if &tuple.relation != relation {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if &tuple.user != user {
                return false;
            }
        }
        true
    }
}

/// Keyset pagination. `from` is the last id of the previous page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub page_size: usize,
    pub from: Option<String>,
}

impl Pagination {
    pub fn new(page_size: usize, from: Option<String>) -> Self {
        Self { page_size, from }
    }
}

/// Storage backend consumed by the authorization server
#[async_trait]
pub trait OpenFgaDatastore: Send + Sync {
    async fn create_store(&self, store: Store) -> DatastoreResult<Store>;

    async fn get_store(&self, id: &str) -> DatastoreResult<Option<Store>>;

    /// Stores ordered by id ascending, plus the id to continue from
    async fn list_stores(
        &self,
        name: Option<&str>,
        pagination: &Pagination,
    ) -> DatastoreResult<(Vec<Store>, Option<String>)>;

    async fn write_authorization_model(
        &self,
        store_id: &str,
        model: &AuthorizationModel,
    ) -> DatastoreResult<()>;

    async fn read_authorization_model(
        &self,
        store_id: &str,
        id: &str,
    ) -> DatastoreResult<Option<AuthorizationModel>>;

    /// Models ordered newest first, plus the id to continue from
    async fn read_authorization_models(
        &self,
        store_id: &str,
        pagination: &Pagination,
    ) -> DatastoreResult<(Vec<AuthorizationModel>, Option<String>)>;

    async fn find_latest_authorization_model(
        &self,
        store_id: &str,
    ) -> DatastoreResult<Option<AuthorizationModel>>;

    /// Apply deletes then writes atomically. Writing an existing tuple or
    /// deleting a missing one fails the whole batch.
    async fn write(
        &self,
        store_id: &str,
        deletes: &[TupleKey],
        writes: &[TupleKey],
    ) -> DatastoreResult<()>;

    async fn read(&self, store_id: &str, filter: &TupleFilter) -> DatastoreResult<Vec<TupleKey>>;

    fn max_tuples_per_write(&self) -> usize {
        DEFAULT_MAX_TUPLES_PER_WRITE
    }

    fn max_types_per_authorization_model(&self) -> usize {
        DEFAULT_MAX_TYPES_PER_AUTHORIZATION_MODEL
    }

    async fn is_ready(&self) -> DatastoreResult<()>;
}

/// In-memory datastore for tests and development
#[derive(Default)]
pub struct InMemoryDatastore {
    stores: Arc<DashMap<String, Store>>,
    models: Arc<DashMap<String, BTreeMap<String, AuthorizationModel>>>,
    tuples: Arc<DashMap<String, BTreeSet<TupleKey>>>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OpenFgaDatastore for InMemoryDatastore {
    async fn create_store(&self, store: Store) -> DatastoreResult<Store> {
        self.stores.insert(store.id.clone(), store.clone());
        Ok(store)
    }

    async fn get_store(&self, id: &str) -> DatastoreResult<Option<Store>> {
        Ok(self.stores.get(id).map(|entry| entry.value().clone()))
    }

    async fn list_stores(
        &self,
        name: Option<&str>,
        pagination: &Pagination,
    ) -> DatastoreResult<(Vec<Store>, Option<String>)> {
        let mut stores: Vec<Store> = self
            .stores
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|store| store.deleted_at.is_none())
            .filter(|store| name.map_or(true, |name| store.name == name))
            .filter(|store| {
                pagination
                    .from
                    .as_deref()
                    .map_or(true, |from| store.id.as_str() > from)
            })
            .collect();
        stores.sort_by(|a, b| a.id.cmp(&b.id));

        let next = if stores.len() > pagination.page_size {
            stores.truncate(pagination.page_size);
            stores.last().map(|store| store.id.clone())
        } else {
            None
        };
        Ok((stores, next))
    }

    async fn write_authorization_model(
        &self,
        store_id: &str,
        model: &AuthorizationModel,
    ) -> DatastoreResult<()> {
        self.models
            .entry(store_id.to_string())
            .or_default()
            .insert(model.id.clone(), model.clone());
        Ok(())
    }

    async fn read_authorization_model(
        &self,
        store_id: &str,
        id: &str,
    ) -> DatastoreResult<Option<AuthorizationModel>> {
        Ok(self
            .models
            .get(store_id)
            .and_then(|models| models.get(id).cloned()))
    }

    async fn read_authorization_models(
        &self,
        store_id: &str,
        pagination: &Pagination,
    ) -> DatastoreResult<(Vec<AuthorizationModel>, Option<String>)> {
        let mut models: Vec<AuthorizationModel> = match self.models.get(store_id) {
            Some(models) => models
                .values()
                .rev()
                .filter(|model| {
                    pagination
                        .from
                        .as_deref()
                        .map_or(true, |from| model.id.as_str() < from)
                })
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        let next = if models.len() > pagination.page_size {
            models.truncate(pagination.page_size);
            models.last().map(|model| model.id.clone())
        } else {
            None
        };
        Ok((models, next))
    }

    async fn find_latest_authorization_model(
        &self,
        store_id: &str,
    ) -> DatastoreResult<Option<AuthorizationModel>> {
        Ok(self
            .models
            .get(store_id)
            .and_then(|models| models.values().next_back().cloned()))
    }

    async fn write(
        &self,
        store_id: &str,
        deletes: &[TupleKey],
        writes: &[TupleKey],
    ) -> DatastoreResult<()> {
        let mut entry = self.tuples.entry(store_id.to_string()).or_default();
        let mut staged = entry.value().clone();

        for tuple in deletes {
            if !staged.remove(tuple) {
                return Err(DatastoreError::TupleNotFound(tuple.to_string()));
            }
        }
        for tuple in writes {
            if !staged.insert(tuple.clone()) {
                return Err(DatastoreError::TupleAlreadyExists(tuple.to_string()));
            }
        }

        *entry.value_mut() = staged;
        Ok(())
    }

    async fn read(&self, store_id: &str, filter: &TupleFilter) -> DatastoreResult<Vec<TupleKey>> {
        Ok(self
            .tuples
            .get(store_id)
            .map(|tuples| {
                tuples
                    .iter()
                    .filter(|tuple| filter.matches(tuple))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_ready(&self) -> DatastoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_is_atomic() {
        let datastore = InMemoryDatastore::new();
        let first = TupleKey::new("doc:1", "viewer", "user:anne");
        datastore.write("s1", &[], &[first.clone()]).await.unwrap();

        let second = TupleKey::new("doc:2", "viewer", "user:anne");
        let result = datastore
            .write("s1", &[], &[second.clone(), first.clone()])
            .await;
        assert_eq!(
            result,
            Err(DatastoreError::TupleAlreadyExists(first.to_string()))
        );

        let stored = datastore.read("s1", &TupleFilter::default()).await.unwrap();
        assert_eq!(stored, vec![first]);
    }

    #[tokio::test]
    async fn test_delete_missing_tuple_fails() {
        let datastore = InMemoryDatastore::new();
        let tuple = TupleKey::new("doc:1", "viewer", "user:anne");
        let result = datastore.write("s1", &[tuple.clone()], &[]).await;
        assert_eq!(result, Err(DatastoreError::TupleNotFound(tuple.to_string())));
    }

    #[tokio::test]
    async fn test_read_filters_by_type_and_relation() {
        let datastore = InMemoryDatastore::new();
        let writes = vec![
            TupleKey::new("doc:1", "viewer", "user:anne"),
            TupleKey::new("doc:2", "editor", "user:anne"),
            TupleKey::new("folder:1", "viewer", "user:anne"),
        ];
        datastore.write("s1", &[], &writes).await.unwrap();

        let read = datastore
            .read("s1", &TupleFilter::type_relation("doc", "viewer"))
            .await
            .unwrap();
        assert_eq!(read, vec![TupleKey::new("doc:1", "viewer", "user:anne")]);
    }
}
