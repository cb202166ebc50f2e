use crate::{
    check::CheckResolver,
    datastore::{OpenFgaDatastore, Pagination},
    error::{Result, ServerError},
    list_objects::list_objects,
    list_users::list_users,
    models::*,
    schema::TypeSystem,
    tuple::{self, UserRef},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use ulid::{Generator, Ulid};

pub const DEFAULT_RESOLVE_NODE_LIMIT: u32 = 25;
pub const DEFAULT_LIST_OBJECTS_MAX_RESULTS: usize = 1000;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;
pub const MAX_STORE_NAME_LENGTH: usize = 64;

/// Opt-in capabilities that are off by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExperimentalFeatureFlag {
    EnableListUsers,
}

impl ExperimentalFeatureFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnableListUsers => "enable-list-users",
        }
    }
}

impl fmt::Display for ExperimentalFeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentalFeatureFlag {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "enable-list-users" => Ok(Self::EnableListUsers),
            other => Err(ServerError::InvalidArgument(format!(
                "unknown experimental flag '{}'",
                other
            ))),
        }
    }
}

/// Builder for [`Server`]
pub struct ServerBuilder {
    datastore: Option<Arc<dyn OpenFgaDatastore>>,
    experimentals: HashSet<ExperimentalFeatureFlag>,
    resolve_node_limit: u32,
    list_objects_max_results: usize,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            datastore: None,
            experimentals: HashSet::new(),
            resolve_node_limit: DEFAULT_RESOLVE_NODE_LIMIT,
            list_objects_max_results: DEFAULT_LIST_OBJECTS_MAX_RESULTS,
        }
    }
}

impl ServerBuilder {
    pub fn with_datastore(mut self, datastore: Arc<dyn OpenFgaDatastore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    pub fn with_experimentals(
        mut self,
        flags: impl IntoIterator<Item = ExperimentalFeatureFlag>,
    ) -> Self {
        self.experimentals.extend(flags);
        self
    }

    pub fn with_resolve_node_limit(mut self, limit: u32) -> Self {
        self.resolve_node_limit = limit;
        self
    }

    pub fn with_list_objects_max_results(mut self, max_results: usize) -> Self {
        self.list_objects_max_results = max_results;
        self
    }

    pub fn build(self) -> Result<Server> {
        let datastore = self.datastore.ok_or_else(|| {
            ServerError::InvalidArgument("a datastore is required to build a server".to_string())
        })?;
        if self.resolve_node_limit == 0 {
            return Err(ServerError::InvalidArgument(
                "resolve node limit must be greater than zero".to_string(),
            ));
        }

        Ok(Server {
            datastore,
            experimentals: self.experimentals,
            resolve_node_limit: self.resolve_node_limit,
            list_objects_max_results: self.list_objects_max_results,
            typesystems: DashMap::new(),
            ids: Mutex::new(Generator::new()),
        })
    }
}

/// Authorization server bound to one datastore
pub struct Server {
    datastore: Arc<dyn OpenFgaDatastore>,
    experimentals: HashSet<ExperimentalFeatureFlag>,
    resolve_node_limit: u32,
    list_objects_max_results: usize,

    /// Validated models by id. Models are immutable once written.
    typesystems: DashMap<String, Arc<TypeSystem>>,

    /// Monotonic so ids written within one millisecond still sort by creation
    ids: Mutex<Generator>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    pub fn is_enabled(&self, flag: ExperimentalFeatureFlag) -> bool {
        self.experimentals.contains(&flag)
    }

    fn next_id(&self) -> String {
        self.ids
            .lock()
            .generate()
            .unwrap_or_else(|_| Ulid::new())
            .to_string()
    }

    /// Probe the datastore
    pub async fn is_ready(&self) -> Result<()> {
        self.datastore.is_ready().await?;
        Ok(())
    }

    // =============================================================================
    // Stores
    // =============================================================================

    pub async fn create_store(&self, request: CreateStoreRequest) -> Result<CreateStoreResponse> {
        let length = request.name.chars().count();
        if length == 0 || length > MAX_STORE_NAME_LENGTH {
            return Err(ServerError::InvalidArgument(format!(
                "store name must be between 1 and {} characters",
                MAX_STORE_NAME_LENGTH
            )));
        }

        let now = Utc::now();
        let store = Store {
            id: self.next_id(),
            name: request.name,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let store = self.datastore.create_store(store).await?;
        info!("Created store {} ({})", store.name, store.id);
        Ok(store.into())
    }

    pub async fn list_stores(&self, request: ListStoresRequest) -> Result<ListStoresResponse> {
        let pagination = pagination(request.page_size, &request.continuation_token)?;
        let name = Some(request.name.as_str()).filter(|name| !name.is_empty());

        let (stores, next) = self.datastore.list_stores(name, &pagination).await?;
        debug!("Listed {} stores", stores.len());
        Ok(ListStoresResponse {
            stores,
            continuation_token: encode_token(next),
        })
    }

    // =============================================================================
    // Authorization models
    // =============================================================================

    pub async fn write_authorization_model(
        &self,
        request: WriteAuthorizationModelRequest,
    ) -> Result<WriteAuthorizationModelResponse> {
        self.require_store(&request.store_id).await?;

        let limit = self.datastore.max_types_per_authorization_model();
        if request.type_definitions.len() > limit {
            return Err(ServerError::ExceededEntityLimit {
                entity: "type definitions in an authorization model",
                actual: request.type_definitions.len(),
                limit,
            });
        }

        let model = AuthorizationModel {
            id: self.next_id(),
            schema_version: request.schema_version,
            type_definitions: request.type_definitions,
        };
        let typesystem = TypeSystem::validated(model)?;
        self.datastore
            .write_authorization_model(&request.store_id, typesystem.model())
            .await?;

        let id = typesystem.model_id().to_string();
        self.typesystems
            .insert(model_cache_key(&request.store_id, &id), Arc::new(typesystem));
        info!(
            "Wrote authorization model {} to store {}",
            id, request.store_id
        );
        Ok(WriteAuthorizationModelResponse {
            authorization_model_id: id,
        })
    }

    pub async fn read_authorization_models(
        &self,
        request: ReadAuthorizationModelsRequest,
    ) -> Result<ReadAuthorizationModelsResponse> {
        self.require_store(&request.store_id).await?;
        let pagination = pagination(request.page_size, &request.continuation_token)?;

        let (authorization_models, next) = self
            .datastore
            .read_authorization_models(&request.store_id, &pagination)
            .await?;
        Ok(ReadAuthorizationModelsResponse {
            authorization_models,
            continuation_token: encode_token(next),
        })
    }

    // =============================================================================
    // Tuples and queries
    // =============================================================================

    pub async fn write(&self, request: WriteRequest) -> Result<WriteResponse> {
        self.require_store(&request.store_id).await?;

        let writes = request.writes.map(|w| w.tuple_keys).unwrap_or_default();
        let deletes = request.deletes.map(|d| d.tuple_keys).unwrap_or_default();
        if writes.is_empty() && deletes.is_empty() {
            return Err(ServerError::InvalidArgument(
                "no tuples to write or delete".to_string(),
            ));
        }

        let limit = self.datastore.max_tuples_per_write();
        let total = writes.len() + deletes.len();
        if total > limit {
            return Err(ServerError::ExceededEntityLimit {
                entity: "write operations",
                actual: total,
                limit,
            });
        }

        let mut seen = HashSet::new();
        for tuple in writes.iter().chain(deletes.iter()) {
            if !seen.insert(tuple) {
                return Err(ServerError::DuplicateTuple(tuple.to_string()));
            }
        }

        let typesystem = self
            .resolve_typesystem(&request.store_id, &request.authorization_model_id)
            .await?;
        for tuple in &writes {
            typesystem.validate_tuple(tuple)?;
        }
        for tuple in &deletes {
            validate_tuple_format(tuple)?;
        }

        self.datastore
            .write(&request.store_id, &deletes, &writes)
            .await?;
        debug!(
            "Wrote {} and deleted {} tuples in store {}",
            writes.len(),
            deletes.len(),
            request.store_id
        );
        Ok(WriteResponse {})
    }

    pub async fn check(&self, request: CheckRequest) -> Result<CheckResponse> {
        self.require_store(&request.store_id).await?;
        let typesystem = self
            .resolve_typesystem(&request.store_id, &request.authorization_model_id)
            .await?;

        let tuple = &request.tuple_key;
        validate_tuple_format(tuple)?;
        let object_type = tuple::object_type(&tuple.object).unwrap_or_default();
        require_relation(&typesystem, object_type, &tuple.relation)?;

        let contextual = contextual_tuples(&typesystem, request.contextual_tuples)?;
        let resolver = self.resolver(&request.store_id, typesystem, contextual);
        let allowed = resolver.check(tuple).await?;
        debug!("Check {} => {}", tuple, allowed);

        Ok(CheckResponse {
            allowed,
            resolution: String::new(),
        })
    }

    pub async fn list_objects(&self, request: ListObjectsRequest) -> Result<ListObjectsResponse> {
        self.require_store(&request.store_id).await?;
        let typesystem = self
            .resolve_typesystem(&request.store_id, &request.authorization_model_id)
            .await?;

        require_relation(&typesystem, &request.type_name, &request.relation)?;
        if UserRef::parse(&request.user).is_none() {
            return Err(ServerError::InvalidArgument(format!(
                "invalid user '{}'",
                request.user
            )));
        }

        let contextual = contextual_tuples(&typesystem, request.contextual_tuples)?;
        let resolver = self.resolver(&request.store_id, typesystem, contextual);
        let objects = list_objects(
            &resolver,
            &request.type_name,
            &request.relation,
            &request.user,
            self.list_objects_max_results,
        )
        .await?;
        Ok(ListObjectsResponse { objects })
    }

    pub async fn list_users(&self, request: ListUsersRequest) -> Result<ListUsersResponse> {
        if !self.is_enabled(ExperimentalFeatureFlag::EnableListUsers) {
            return Err(ServerError::Unimplemented(format!(
                "ListUsers is not enabled. Enable it with the '{}' experimental flag",
                ExperimentalFeatureFlag::EnableListUsers
            )));
        }
        self.require_store(&request.store_id).await?;
        let typesystem = self
            .resolve_typesystem(&request.store_id, &request.authorization_model_id)
            .await?;

        let [filter] = request.user_filters.as_slice() else {
            return Err(ServerError::InvalidArgument(
                "exactly one user filter is required".to_string(),
            ));
        };
        if request.object.type_name.is_empty() || request.object.id.is_empty() {
            return Err(ServerError::InvalidArgument(format!(
                "invalid object '{}'",
                request.object
            )));
        }
        require_relation(&typesystem, &request.object.type_name, &request.relation)?;

        let contextual = contextual_tuples(
            &typesystem,
            Some(ContextualTupleKeys::new(request.contextual_tuples.clone())),
        )?;
        let resolver = self.resolver(&request.store_id, typesystem, contextual);
        let users = list_users(&resolver, &request.object, &request.relation, filter).await?;
        Ok(ListUsersResponse { users })
    }

    fn resolver(
        &self,
        store_id: &str,
        typesystem: Arc<TypeSystem>,
        contextual: Vec<TupleKey>,
    ) -> CheckResolver {
        CheckResolver::new(
            self.datastore.clone(),
            typesystem,
            store_id,
            contextual,
            self.resolve_node_limit,
        )
    }

    async fn require_store(&self, store_id: &str) -> Result<Store> {
        if store_id.is_empty() {
            return Err(ServerError::InvalidArgument(
                "store id is required".to_string(),
            ));
        }
        self.datastore
            .get_store(store_id)
            .await?
            .filter(|store| store.deleted_at.is_none())
            .ok_or_else(|| ServerError::StoreNotFound(store_id.to_string()))
    }

    /// Resolve a model id, an empty id meaning the latest model of the store
    async fn resolve_typesystem(&self, store_id: &str, model_id: &str) -> Result<Arc<TypeSystem>> {
        if let Some(cached) = self.typesystems.get(&model_cache_key(store_id, model_id)) {
            return Ok(cached.value().clone());
        }

        let model = if model_id.is_empty() {
            self.datastore
                .find_latest_authorization_model(store_id)
                .await?
                .ok_or_else(|| ServerError::LatestAuthorizationModelNotFound(store_id.to_string()))?
        } else {
            if Ulid::from_string(model_id).is_err() {
                return Err(ServerError::InvalidArgument(format!(
                    "invalid authorization model id '{}'",
                    model_id
                )));
            }
            self.datastore
                .read_authorization_model(store_id, model_id)
                .await?
                .ok_or_else(|| ServerError::AuthorizationModelNotFound(model_id.to_string()))?
        };

        let typesystem = Arc::new(TypeSystem::new(model));
        self.typesystems.insert(
            model_cache_key(store_id, typesystem.model_id()),
            typesystem.clone(),
        );
        Ok(typesystem)
    }
}

fn model_cache_key(store_id: &str, model_id: &str) -> String {
    format!("{}/{}", store_id, model_id)
}

fn require_relation(typesystem: &TypeSystem, object_type: &str, relation: &str) -> Result<()> {
    if !typesystem.has_type(object_type) {
        return Err(ServerError::InvalidArgument(format!(
            "type '{}' not found",
            object_type
        )));
    }
    if !typesystem.has_relation(object_type, relation) {
        return Err(ServerError::InvalidArgument(format!(
            "relation '{}#{}' not found",
            object_type, relation
        )));
    }
    Ok(())
}

fn validate_tuple_format(tuple: &TupleKey) -> Result<()> {
    if tuple::split_object(&tuple.object).is_none() {
        return Err(ServerError::invalid_tuple(tuple, "invalid 'object' field format"));
    }
    if tuple.relation.is_empty() {
        return Err(ServerError::invalid_tuple(tuple, "the 'relation' field is empty"));
    }
    if UserRef::parse(&tuple.user).is_none() {
        return Err(ServerError::invalid_tuple(tuple, "invalid 'user' field format"));
    }
    Ok(())
}

fn contextual_tuples(
    typesystem: &TypeSystem,
    contextual: Option<ContextualTupleKeys>,
) -> Result<Vec<TupleKey>> {
    let tuples = contextual.map(|c| c.tuple_keys).unwrap_or_default();
    for tuple in &tuples {
        typesystem.validate_tuple(tuple)?;
    }
    Ok(tuples)
}

fn pagination(page_size: Option<i32>, continuation_token: &str) -> Result<Pagination> {
    let page_size = match page_size {
        None | Some(0) => DEFAULT_PAGE_SIZE,
        Some(size) if size > 0 && size as usize <= MAX_PAGE_SIZE => size as usize,
        Some(size) => {
            return Err(ServerError::InvalidArgument(format!(
                "page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, size
            )))
        }
    };
    Ok(Pagination::new(page_size, decode_token(continuation_token)?))
}

fn decode_token(token: &str) -> Result<Option<String>> {
    if token.is_empty() {
        return Ok(None);
    }
    URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .map(Some)
        .ok_or_else(|| ServerError::InvalidArgument("invalid continuation token".to_string()))
}

fn encode_token(next: Option<String>) -> String {
    next.map(|id| URL_SAFE_NO_PAD.encode(id))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::InMemoryDatastore;
    use crate::schema::tests::document_model;

    fn server() -> Server {
        Server::builder()
            .with_datastore(Arc::new(InMemoryDatastore::new()))
            .with_experimentals([ExperimentalFeatureFlag::EnableListUsers])
            .build()
            .unwrap()
    }

    async fn store_with_model(server: &Server) -> (String, String) {
        let store = server
            .create_store(CreateStoreRequest {
                name: "acme".to_string(),
            })
            .await
            .unwrap();
        let model = document_model();
        let response = server
            .write_authorization_model(WriteAuthorizationModelRequest {
                store_id: store.id.clone(),
                type_definitions: model.type_definitions,
                schema_version: model.schema_version,
            })
            .await
            .unwrap();
        (store.id, response.authorization_model_id)
    }

    fn writes(store_id: &str, tuples: Vec<TupleKey>) -> WriteRequest {
        WriteRequest {
            store_id: store_id.to_string(),
            writes: Some(TupleKeys::new(tuples)),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_requires_datastore() {
        assert!(matches!(
            Server::builder().build(),
            Err(ServerError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_create_store_validates_name() {
        let server = server();
        let result = server.create_store(CreateStoreRequest::default()).await;
        assert_eq!(result.unwrap_err().code(), "validation_error");

        let result = server
            .create_store(CreateStoreRequest {
                name: "x".repeat(65),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_stores_paginates() {
        let server = server();
        for name in ["a", "b", "c"] {
            server
                .create_store(CreateStoreRequest {
                    name: name.to_string(),
                })
                .await
                .unwrap();
        }

        let first = server
            .list_stores(ListStoresRequest {
                page_size: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.stores.len(), 2);
        assert!(!first.continuation_token.is_empty());

        let second = server
            .list_stores(ListStoresRequest {
                page_size: Some(2),
                continuation_token: first.continuation_token,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.stores.len(), 1);
        assert!(second.continuation_token.is_empty());

        let filtered = server
            .list_stores(ListStoresRequest {
                name: "b".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(filtered.stores.len(), 1);
        assert_eq!(filtered.stores[0].name, "b");
    }

    #[tokio::test]
    async fn test_invalid_continuation_token() {
        let server = server();
        let result = server
            .list_stores(ListStoresRequest {
                continuation_token: "%%%".to_string(),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(ServerError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_unknown_store() {
        let server = server();
        let result = server
            .check(CheckRequest {
                store_id: Ulid::new().to_string(),
                tuple_key: TupleKey::new("document:1", "viewer", "user:anne"),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(ServerError::StoreNotFound(_))));
    }

    #[tokio::test]
    async fn test_write_and_check() {
        let server = server();
        let (store_id, model_id) = store_with_model(&server).await;

        server
            .write(writes(
                &store_id,
                vec![TupleKey::new("document:1", "owner", "user:anne")],
            ))
            .await
            .unwrap();

        let allowed = server
            .check(CheckRequest {
                store_id: store_id.clone(),
                tuple_key: TupleKey::new("document:1", "viewer", "user:anne"),
                authorization_model_id: model_id,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(allowed.allowed);

        let denied = server
            .check(CheckRequest {
                store_id,
                tuple_key: TupleKey::new("document:1", "viewer", "user:bob"),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!denied.allowed);
    }

    #[tokio::test]
    async fn test_write_rejections() {
        let server = server();
        let (store_id, _) = store_with_model(&server).await;
        let tuple = TupleKey::new("document:1", "owner", "user:anne");

        let empty = server.write(writes(&store_id, vec![])).await;
        assert!(matches!(empty, Err(ServerError::InvalidArgument(_))));

        let duplicate = server
            .write(writes(&store_id, vec![tuple.clone(), tuple.clone()]))
            .await;
        assert!(matches!(duplicate, Err(ServerError::DuplicateTuple(_))));

        let invalid = server
            .write(writes(
                &store_id,
                vec![TupleKey::new("document:1", "can_read", "user:anne")],
            ))
            .await;
        assert!(matches!(invalid, Err(ServerError::InvalidTuple { .. })));

        let too_many = (0..101)
            .map(|i| TupleKey::new(&format!("document:{}", i), "owner", "user:anne"))
            .collect();
        let exceeded = server.write(writes(&store_id, too_many)).await;
        assert!(matches!(
            exceeded,
            Err(ServerError::ExceededEntityLimit { limit: 100, .. })
        ));

        server.write(writes(&store_id, vec![tuple.clone()])).await.unwrap();
        let existing = server.write(writes(&store_id, vec![tuple])).await;
        assert!(matches!(existing, Err(ServerError::TupleAlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_check_without_model() {
        let server = server();
        let store = server
            .create_store(CreateStoreRequest {
                name: "empty".to_string(),
            })
            .await
            .unwrap();
        let result = server
            .check(CheckRequest {
                store_id: store.id,
                tuple_key: TupleKey::new("document:1", "viewer", "user:anne"),
                ..Default::default()
            })
            .await;
        assert!(matches!(
            result,
            Err(ServerError::LatestAuthorizationModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_read_authorization_models_newest_first() {
        let server = server();
        let (store_id, first) = store_with_model(&server).await;
        let model = document_model();
        let second = server
            .write_authorization_model(WriteAuthorizationModelRequest {
                store_id: store_id.clone(),
                type_definitions: model.type_definitions,
                schema_version: model.schema_version,
            })
            .await
            .unwrap()
            .authorization_model_id;

        let response = server
            .read_authorization_models(ReadAuthorizationModelsRequest {
                store_id,
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<_> = response
            .authorization_models
            .iter()
            .map(|model| model.id.clone())
            .collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn test_list_objects_and_users() {
        let server = server();
        let (store_id, _) = store_with_model(&server).await;
        server
            .write(writes(
                &store_id,
                vec![
                    TupleKey::new("document:1", "viewer", "user:anne"),
                    TupleKey::new("document:2", "owner", "user:anne"),
                ],
            ))
            .await
            .unwrap();

        let objects = server
            .list_objects(ListObjectsRequest {
                store_id: store_id.clone(),
                type_name: "document".to_string(),
                relation: "viewer".to_string(),
                user: "user:anne".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(objects.objects, vec!["document:1", "document:2"]);

        let users = server
            .list_users(ListUsersRequest {
                store_id,
                object: FgaObject::new("document", "2"),
                relation: "viewer".to_string(),
                user_filters: vec![UserTypeFilter {
                    type_name: "user".to_string(),
                    relation: String::new(),
                }],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(users.users, vec![User::Object(FgaObject::new("user", "anne"))]);
    }

    #[tokio::test]
    async fn test_list_users_requires_flag() {
        let server = Server::builder()
            .with_datastore(Arc::new(InMemoryDatastore::new()))
            .build()
            .unwrap();
        let result = server.list_users(ListUsersRequest::default()).await;
        assert_eq!(result.unwrap_err().code(), "unimplemented");
    }
}
