//! Request facade: decode, delegate to the engine, encode.
//!
//! Every entry point is a blocking call. The free functions act on the global
//! server installed by [`init_server`](crate::init_server) and fail with
//! [`FacadeError::NotInitialized`] before touching the payload when there is
//! none. The same operations are methods on [`EmbeddedServer`] for hosts that
//! hold their own instance.
//!
//! Calls block the current thread. Made from inside an async runtime they fail
//! with [`FacadeError::InsideAsyncRuntime`]; async hosts should go through
//! `spawn_blocking` or a dedicated thread.

use crate::codec::{decode, encode};
use crate::error::{FacadeError, FacadeResult};
use crate::lifecycle::{EmbeddedServer, ServerLifecycle};
use fga_engine::error::Result as EngineResult;
use fga_engine::{
    CheckRequest, CreateStoreRequest, ListObjectsRequest, ListStoresRequest, ListUsersRequest,
    ReadAuthorizationModelsRequest, Server, WriteAuthorizationModelRequest, WriteRequest,
};
use serde::de::DeserializeOwned;
use std::future::Future;
use tracing::{debug, info_span, warn};

impl EmbeddedServer {
    /// Decode `payload`, run `call` on the engine and return its typed response
    fn dispatch<'a, Req, Resp, Fut>(
        &'a self,
        operation: &'static str,
        payload: &[u8],
        call: impl FnOnce(&'a Server, Req) -> Fut,
    ) -> FacadeResult<Resp>
    where
        Req: DeserializeOwned,
        Fut: Future<Output = EngineResult<Resp>> + 'a,
    {
        let span = info_span!("fga_facade", operation);
        let _entered = span.enter();

        let request: Req = decode(operation, payload)?;
        self.delegate(operation, call(self.server(), request))
    }

    fn delegate<Resp>(
        &self,
        operation: &'static str,
        call: impl Future<Output = EngineResult<Resp>>,
    ) -> FacadeResult<Resp> {
        self.block_on(call)?.map_err(|err| {
            warn!("{} failed: {} ({})", operation, err, err.code());
            FacadeError::Engine(err)
        })
    }

    pub fn read_authorization_models(&self, payload: &[u8]) -> FacadeResult<Vec<u8>> {
        let response = self.dispatch(
            "read_authorization_models",
            payload,
            |server, request: ReadAuthorizationModelsRequest| {
                server.read_authorization_models(request)
            },
        )?;
        encode("read_authorization_models", &response)
    }

    pub fn write_authorization_model(&self, payload: &[u8]) -> FacadeResult<Vec<u8>> {
        let response = self.dispatch(
            "write_authorization_model",
            payload,
            |server, request: WriteAuthorizationModelRequest| {
                server.write_authorization_model(request)
            },
        )?;
        encode("write_authorization_model", &response)
    }

    pub fn list_stores(&self, payload: &[u8]) -> FacadeResult<Vec<u8>> {
        let response = self.dispatch(
            "list_stores",
            payload,
            |server, request: ListStoresRequest| server.list_stores(request),
        )?;
        encode("list_stores", &response)
    }

    /// Create a store from a plain name; no payload is decoded
    pub fn create_store(&self, name: &str) -> FacadeResult<Vec<u8>> {
        let span = info_span!("fga_facade", operation = "create_store");
        let _entered = span.enter();

        let request = CreateStoreRequest {
            name: name.to_string(),
        };
        let response = self.delegate("create_store", self.server().create_store(request))?;
        encode("create_store", &response)
    }

    pub fn write(&self, payload: &[u8]) -> FacadeResult<()> {
        self.dispatch("write", payload, |server, request: WriteRequest| {
            server.write(request)
        })?;
        Ok(())
    }

    /// Only the allowed flag of the check response
    pub fn check(&self, payload: &[u8]) -> FacadeResult<bool> {
        let response = self.dispatch("check", payload, |server, request: CheckRequest| {
            server.check(request)
        })?;
        debug!("check allowed={}", response.allowed);
        Ok(response.allowed)
    }

    /// The full encoded check response
    pub fn check_response(&self, payload: &[u8]) -> FacadeResult<Vec<u8>> {
        let response = self.dispatch("check", payload, |server, request: CheckRequest| {
            server.check(request)
        })?;
        encode("check", &response)
    }

    /// Only the object identifiers of the list-objects response
    pub fn list_objects(&self, payload: &[u8]) -> FacadeResult<Vec<String>> {
        let response = self.dispatch(
            "list_objects",
            payload,
            |server, request: ListObjectsRequest| server.list_objects(request),
        )?;
        Ok(response.objects)
    }

    /// The full encoded list-objects response
    pub fn list_objects_response(&self, payload: &[u8]) -> FacadeResult<Vec<u8>> {
        let response = self.dispatch(
            "list_objects",
            payload,
            |server, request: ListObjectsRequest| server.list_objects(request),
        )?;
        encode("list_objects", &response)
    }

    pub fn list_users(&self, payload: &[u8]) -> FacadeResult<Vec<u8>> {
        let response = self.dispatch(
            "list_users",
            payload,
            |server, request: ListUsersRequest| server.list_users(request),
        )?;
        encode("list_users", &response)
    }
}

// =============================================================================
// Global entry points
// =============================================================================

pub fn read_authorization_models(payload: &[u8]) -> FacadeResult<Vec<u8>> {
    ServerLifecycle::global()
        .instance()?
        .read_authorization_models(payload)
}

pub fn write_authorization_model(payload: &[u8]) -> FacadeResult<Vec<u8>> {
    ServerLifecycle::global()
        .instance()?
        .write_authorization_model(payload)
}

pub fn list_stores(payload: &[u8]) -> FacadeResult<Vec<u8>> {
    ServerLifecycle::global().instance()?.list_stores(payload)
}

pub fn create_store(name: &str) -> FacadeResult<Vec<u8>> {
    ServerLifecycle::global().instance()?.create_store(name)
}

pub fn write(payload: &[u8]) -> FacadeResult<()> {
    ServerLifecycle::global().instance()?.write(payload)
}

pub fn check(payload: &[u8]) -> FacadeResult<bool> {
    ServerLifecycle::global().instance()?.check(payload)
}

pub fn check_response(payload: &[u8]) -> FacadeResult<Vec<u8>> {
    ServerLifecycle::global().instance()?.check_response(payload)
}

pub fn list_objects(payload: &[u8]) -> FacadeResult<Vec<String>> {
    ServerLifecycle::global().instance()?.list_objects(payload)
}

pub fn list_objects_response(payload: &[u8]) -> FacadeResult<Vec<u8>> {
    ServerLifecycle::global()
        .instance()?
        .list_objects_response(payload)
}

pub fn list_users(payload: &[u8]) -> FacadeResult<Vec<u8>> {
    ServerLifecycle::global().instance()?.list_users(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::lifecycle::EXPERIMENTALS;
    use fga_engine::{
        CreateStoreResponse, FgaObject, InMemoryDatastore, ListObjectsResponse,
        ListStoresResponse, ListUsersResponse, ReadAuthorizationModelsResponse, User,
        WriteAuthorizationModelResponse,
    };
    use serde::Serialize;
    use serde_json::json;
    use std::sync::Arc;

    fn embedded() -> EmbeddedServer {
        let server = Server::builder()
            .with_datastore(Arc::new(InMemoryDatastore::new()))
            .with_experimentals(EXPERIMENTALS)
            .build()
            .unwrap();
        EmbeddedServer::with_server(server, &RuntimeConfig::default()).unwrap()
    }

    fn bytes(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    /// Store with a `doc#viewer` model and `doc:1#viewer@user:anne`
    fn seeded(embedded: &EmbeddedServer) -> String {
        let store: CreateStoreResponse =
            serde_json::from_slice(&embedded.create_store("acme").unwrap()).unwrap();
        embedded
            .write_authorization_model(&bytes(json!({
                "storeId": store.id,
                "schemaVersion": "1.1",
                "typeDefinitions": [
                    {"type": "user"},
                    {
                        "type": "doc",
                        "relations": {"viewer": {"this": {}}},
                        "metadata": {"relations": {"viewer": {"directlyRelatedUserTypes": [{"type": "user"}]}}}
                    }
                ]
            })))
            .unwrap();
        embedded
            .write(&bytes(json!({
                "storeId": store.id,
                "writes": {"tupleKeys": [{"object": "doc:1", "relation": "viewer", "user": "user:anne"}]}
            })))
            .unwrap();
        store.id
    }

    fn check_payload(store_id: &str, user: &str) -> Vec<u8> {
        bytes(json!({
            "storeId": store_id,
            "tupleKey": {"object": "doc:1", "relation": "viewer", "user": user}
        }))
    }

    #[test]
    fn test_check_extracts_allowed_flag() {
        let embedded = embedded();
        let store_id = seeded(&embedded);

        assert!(embedded.check(&check_payload(&store_id, "user:anne")).unwrap());
        assert!(!embedded.check(&check_payload(&store_id, "user:bob")).unwrap());
    }

    #[test]
    fn test_check_engine_error_passes_through() {
        let embedded = embedded();
        let store_id = seeded(&embedded);

        let payload = bytes(json!({
            "storeId": store_id,
            "tupleKey": {"object": "doc:1", "relation": "owner", "user": "user:anne"}
        }));
        let err = embedded.check(&payload).unwrap_err();
        assert_eq!(err.engine_error().map(|e| e.code()), Some("validation_error"));
    }

    #[test]
    fn test_decode_error_skips_engine() {
        let embedded = embedded();
        let err = embedded.write(b"[1, 2").unwrap_err();
        assert!(matches!(err, FacadeError::Decode { operation: "write", .. }));
    }

    /// Encoded engine response for `payload` decoded and passed to `call` directly
    fn direct<'a, Req, Resp, Fut>(
        embedded: &'a EmbeddedServer,
        payload: &[u8],
        call: impl FnOnce(&'a Server, Req) -> Fut,
    ) -> Vec<u8>
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        Fut: Future<Output = EngineResult<Resp>> + 'a,
    {
        let request: Req = serde_json::from_slice(payload).unwrap();
        let response = embedded
            .block_on(call(embedded.server(), request))
            .unwrap()
            .unwrap();
        serde_json::to_vec(&response).unwrap()
    }

    #[test]
    fn test_read_operations_match_direct_engine_calls() {
        let embedded = embedded();
        let store_id = seeded(&embedded);

        let payload = check_payload(&store_id, "user:anne");
        assert_eq!(
            embedded.check_response(&payload).unwrap(),
            direct(&embedded, &payload, |server, request: CheckRequest| {
                server.check(request)
            })
        );

        let payload = bytes(json!({"storeId": store_id}));
        assert_eq!(
            embedded.read_authorization_models(&payload).unwrap(),
            direct(&embedded, &payload, |server, request: ReadAuthorizationModelsRequest| {
                server.read_authorization_models(request)
            })
        );

        let payload = bytes(json!({"pageSize": 10}));
        assert_eq!(
            embedded.list_stores(&payload).unwrap(),
            direct(&embedded, &payload, |server, request: ListStoresRequest| {
                server.list_stores(request)
            })
        );

        let payload = bytes(json!({
            "storeId": store_id,
            "type": "doc",
            "relation": "viewer",
            "user": "user:anne"
        }));
        assert_eq!(
            embedded.list_objects_response(&payload).unwrap(),
            direct(&embedded, &payload, |server, request: ListObjectsRequest| {
                server.list_objects(request)
            })
        );

        let payload = bytes(json!({
            "storeId": store_id,
            "object": {"type": "doc", "id": "1"},
            "relation": "viewer",
            "userFilters": [{"type": "user"}]
        }));
        assert_eq!(
            embedded.list_users(&payload).unwrap(),
            direct(&embedded, &payload, |server, request: ListUsersRequest| {
                server.list_users(request)
            })
        );
    }

    #[test]
    fn test_create_store_matches_direct_engine_call() {
        let embedded = embedded();

        let via_facade: CreateStoreResponse =
            serde_json::from_slice(&embedded.create_store("beta").unwrap()).unwrap();
        let from_engine: CreateStoreResponse = serde_json::from_slice(&direct(
            &embedded,
            br#"{"name":"beta"}"#,
            |server, request: CreateStoreRequest| server.create_store(request),
        ))
        .unwrap();

        // Ids and timestamps are generated per call
        assert_eq!(via_facade.name, from_engine.name);
        assert_ne!(via_facade.id, from_engine.id);
        assert!(!via_facade.id.is_empty());
    }

    #[test]
    fn test_write_authorization_model_matches_direct_engine_call() {
        let embedded = embedded();
        let store_id = seeded(&embedded);
        let payload = bytes(json!({
            "storeId": store_id,
            "schemaVersion": "1.1",
            "typeDefinitions": [
                {"type": "user"},
                {
                    "type": "folder",
                    "relations": {"owner": {"this": {}}},
                    "metadata": {"relations": {"owner": {"directlyRelatedUserTypes": [{"type": "user"}]}}}
                }
            ]
        }));

        let via_facade: WriteAuthorizationModelResponse =
            serde_json::from_slice(&embedded.write_authorization_model(&payload).unwrap())
                .unwrap();
        let from_engine: WriteAuthorizationModelResponse = serde_json::from_slice(&direct(
            &embedded,
            &payload,
            |server, request: WriteAuthorizationModelRequest| {
                server.write_authorization_model(request)
            },
        ))
        .unwrap();
        assert_ne!(
            via_facade.authorization_model_id,
            from_engine.authorization_model_id
        );

        let models: ReadAuthorizationModelsResponse = serde_json::from_slice(
            &embedded
                .read_authorization_models(&bytes(json!({"storeId": store_id})))
                .unwrap(),
        )
        .unwrap();
        let find = |id: &str| {
            models
                .authorization_models
                .iter()
                .find(|model| model.id == id)
                .cloned()
                .unwrap()
        };
        let facade_model = find(&via_facade.authorization_model_id);
        let engine_model = find(&from_engine.authorization_model_id);
        assert_eq!(facade_model.schema_version, engine_model.schema_version);
        assert_eq!(facade_model.type_definitions, engine_model.type_definitions);
    }

    #[test]
    fn test_list_objects_variants() {
        let embedded = embedded();
        let store_id = seeded(&embedded);
        let payload = bytes(json!({
            "storeId": store_id,
            "type": "doc",
            "relation": "viewer",
            "user": "user:anne"
        }));

        assert_eq!(embedded.list_objects(&payload).unwrap(), vec!["doc:1"]);

        let response: ListObjectsResponse =
            serde_json::from_slice(&embedded.list_objects_response(&payload).unwrap()).unwrap();
        assert_eq!(response.objects, vec!["doc:1"]);
    }

    #[test]
    fn test_list_users_and_models() {
        let embedded = embedded();
        let store_id = seeded(&embedded);

        let users: ListUsersResponse = serde_json::from_slice(
            &embedded
                .list_users(&bytes(json!({
                    "storeId": store_id,
                    "object": {"type": "doc", "id": "1"},
                    "relation": "viewer",
                    "userFilters": [{"type": "user"}]
                })))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(users.users, vec![User::Object(FgaObject::new("user", "anne"))]);

        let models: ReadAuthorizationModelsResponse = serde_json::from_slice(
            &embedded
                .read_authorization_models(&bytes(json!({"storeId": store_id})))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(models.authorization_models.len(), 1);
    }

    #[test]
    fn test_list_stores_round_trip() {
        let embedded = embedded();
        seeded(&embedded);

        let stores: ListStoresResponse =
            serde_json::from_slice(&embedded.list_stores(b"{}").unwrap()).unwrap();
        assert_eq!(stores.stores.len(), 1);
        assert_eq!(stores.stores[0].name, "acme");
    }
}
