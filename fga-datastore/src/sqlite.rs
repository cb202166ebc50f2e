use crate::config::DatastoreConfig;
use crate::connection::{connect_pool, ping};
use crate::error::DatabaseResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fga_engine::datastore::{OpenFgaDatastore, Pagination, TupleFilter};
use fga_engine::tuple::{self, UserRef};
use fga_engine::{
    AuthorizationModel, DatastoreError, DatastoreResult, Store, TupleKey, TypeDefinition,
};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info};
use ulid::Ulid;

const STORE_COLUMNS: &str = "SELECT id, name, created_at, updated_at, deleted_at FROM store";
const MODEL_COLUMNS: &str =
    "SELECT authorization_model_id, schema_version, serialized_model FROM authorization_model";

/// Engine datastore backed by a single SQLite file
pub struct SqliteDatastore {
    pool: SqlitePool,
    config: DatastoreConfig,
}

impl SqliteDatastore {
    /// Open the file at `uri`. The schema must already be migrated.
    pub async fn open(uri: &str, config: DatastoreConfig) -> DatabaseResult<Self> {
        let pool = connect_pool(uri, &config).await?;
        info!("Opened datastore {}", uri);
        Ok(Self { pool, config })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn backend(err: sqlx::Error) -> DatastoreError {
    DatastoreError::Backend(err.to_string())
}

fn store_from_row(row: &SqliteRow) -> Result<Store, sqlx::Error> {
    Ok(Store {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get::<Option<DateTime<Utc>>, _>("deleted_at")?,
    })
}

fn model_from_row(row: &SqliteRow) -> DatastoreResult<AuthorizationModel> {
    let serialized: String = row.try_get("serialized_model").map_err(backend)?;
    let type_definitions: Vec<TypeDefinition> = serde_json::from_str(&serialized)
        .map_err(|e| DatastoreError::Serialization(e.to_string()))?;
    Ok(AuthorizationModel {
        id: row.try_get("authorization_model_id").map_err(backend)?,
        schema_version: row.try_get("schema_version").map_err(backend)?,
        type_definitions,
    })
}

fn split_tuple_object(tuple: &TupleKey) -> DatastoreResult<(&str, &str)> {
    tuple::split_object(&tuple.object)
        .ok_or_else(|| DatastoreError::Backend(format!("malformed tuple object in {}", tuple)))
}

fn user_type(user: &str) -> &'static str {
    match UserRef::parse(user) {
        Some(UserRef::Userset { .. }) => "userset",
        _ => "user",
    }
}

/// One changelog row per applied write or delete
async fn record_change(
    conn: &mut SqliteConnection,
    store_id: &str,
    tuple: &TupleKey,
    operation: &str,
    at: DateTime<Utc>,
) -> DatastoreResult<()> {
    let (object_type, object_id) = split_tuple_object(tuple)?;
    sqlx::query(
        "INSERT INTO changelog (store, object_type, object_id, relation, _user, operation, ulid, inserted_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(store_id)
    .bind(object_type)
    .bind(object_id)
    .bind(&tuple.relation)
    .bind(&tuple.user)
    .bind(operation)
    .bind(Ulid::new().to_string())
    .bind(at)
    .execute(conn)
    .await
    .map_err(backend)?;
    Ok(())
}

#[async_trait]
impl OpenFgaDatastore for SqliteDatastore {
    async fn create_store(&self, store: Store) -> DatastoreResult<Store> {
        sqlx::query("INSERT INTO store (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(&store.id)
            .bind(&store.name)
            .bind(store.created_at)
            .bind(store.updated_at)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(store)
    }

    async fn get_store(&self, id: &str) -> DatastoreResult<Option<Store>> {
        let row = sqlx::query(&format!("{} WHERE id = ? AND deleted_at IS NULL", STORE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(store_from_row).transpose().map_err(backend)
    }

    async fn list_stores(
        &self,
        name: Option<&str>,
        pagination: &Pagination,
    ) -> DatastoreResult<(Vec<Store>, Option<String>)> {
        let mut query = QueryBuilder::<Sqlite>::new(STORE_COLUMNS);
        query.push(" WHERE deleted_at IS NULL");
        if let Some(name) = name {
            query.push(" AND name = ").push_bind(name.to_string());
        }
        if let Some(from) = &pagination.from {
            query.push(" AND id > ").push_bind(from.clone());
        }
        query
            .push(" ORDER BY id ASC LIMIT ")
            .push_bind((pagination.page_size + 1) as i64);

        let rows = query.build().fetch_all(&self.pool).await.map_err(backend)?;
        let mut stores = rows
            .iter()
            .map(store_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;

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
        let serialized = serde_json::to_string(&model.type_definitions)
            .map_err(|e| DatastoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO authorization_model (store, authorization_model_id, schema_version, serialized_model, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(store_id)
        .bind(&model.id)
        .bind(&model.schema_version)
        .bind(serialized)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn read_authorization_model(
        &self,
        store_id: &str,
        id: &str,
    ) -> DatastoreResult<Option<AuthorizationModel>> {
        let row = sqlx::query(&format!(
            "{} WHERE store = ? AND authorization_model_id = ?",
            MODEL_COLUMNS
        ))
        .bind(store_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(model_from_row).transpose()
    }

    async fn read_authorization_models(
        &self,
        store_id: &str,
        pagination: &Pagination,
    ) -> DatastoreResult<(Vec<AuthorizationModel>, Option<String>)> {
        let mut query = QueryBuilder::<Sqlite>::new(MODEL_COLUMNS);
        query.push(" WHERE store = ").push_bind(store_id.to_string());
        if let Some(from) = &pagination.from {
            query
                .push(" AND authorization_model_id < ")
                .push_bind(from.clone());
        }
        query
            .push(" ORDER BY authorization_model_id DESC LIMIT ")
            .push_bind((pagination.page_size + 1) as i64);

        let rows = query.build().fetch_all(&self.pool).await.map_err(backend)?;
        let mut models = rows
            .iter()
            .map(model_from_row)
            .collect::<DatastoreResult<Vec<_>>>()?;

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
        let row = sqlx::query(&format!(
            "{} WHERE store = ? ORDER BY authorization_model_id DESC LIMIT 1",
            MODEL_COLUMNS
        ))
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(model_from_row).transpose()
    }

    async fn write(
        &self,
        store_id: &str,
        deletes: &[TupleKey],
        writes: &[TupleKey],
    ) -> DatastoreResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        for tuple in deletes {
            let (object_type, object_id) = split_tuple_object(tuple)?;
            let result = sqlx::query(
                "DELETE FROM tuple WHERE store = ? AND object_type = ? AND object_id = ? AND relation = ? AND _user = ?",
            )
            .bind(store_id)
            .bind(object_type)
            .bind(object_id)
            .bind(&tuple.relation)
            .bind(&tuple.user)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

            if result.rows_affected() == 0 {
                return Err(DatastoreError::TupleNotFound(tuple.to_string()));
            }
            record_change(&mut *tx, store_id, tuple, "delete", now).await?;
        }

        for tuple in writes {
            let (object_type, object_id) = split_tuple_object(tuple)?;
            sqlx::query(
                "INSERT INTO tuple (store, object_type, object_id, relation, _user, user_type, ulid, inserted_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(store_id)
            .bind(object_type)
            .bind(object_id)
            .bind(&tuple.relation)
            .bind(&tuple.user)
            .bind(user_type(&tuple.user))
            .bind(Ulid::new().to_string())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation()) {
                    DatastoreError::TupleAlreadyExists(tuple.to_string())
                } else {
                    backend(e)
                }
            })?;
            record_change(&mut *tx, store_id, tuple, "write", now).await?;
        }

        tx.commit().await.map_err(backend)?;
        debug!(
            "Committed {} deletes and {} writes to store {}",
            deletes.len(),
            writes.len(),
            store_id
        );
        Ok(())
    }

    async fn read(&self, store_id: &str, filter: &TupleFilter) -> DatastoreResult<Vec<TupleKey>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT object_type, object_id, relation, _user FROM tuple WHERE store = ",
        );
        query.push_bind(store_id.to_string());

        if let Some(object_type) = &filter.object_type {
            query.push(" AND object_type = ").push_bind(object_type.clone());
        }
        if let Some(object) = &filter.object {
            let Some((object_type, object_id)) = tuple::split_object(object) else {
                return Ok(Vec::new());
            };
            query
                .push(" AND object_type = ")
                .push_bind(object_type.to_string())
                .push(" AND object_id = ")
                .push_bind(object_id.to_string());
        }
        if let Some(relation) = &filter.relation {
            query.push(" AND relation = ").push_bind(relation.clone());
        }
        if let Some(user) = &filter.user {
            query.push(" AND _user = ").push_bind(user.clone());
        }
        query.push(" ORDER BY object_type, object_id, relation, _user");

        let rows = query.build().fetch_all(&self.pool).await.map_err(backend)?;
        rows.iter()
            .map(|row| -> Result<TupleKey, sqlx::Error> {
                let object_type: String = row.try_get("object_type")?;
                let object_id: String = row.try_get("object_id")?;
                Ok(TupleKey {
                    object: format!("{}:{}", object_type, object_id),
                    relation: row.try_get("relation")?,
                    user: row.try_get("_user")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)
    }

    fn max_tuples_per_write(&self) -> usize {
        self.config.max_tuples_per_write
    }

    fn max_types_per_authorization_model(&self) -> usize {
        self.config.max_types_per_authorization_model
    }

    async fn is_ready(&self) -> DatastoreResult<()> {
        ping(&self.pool)
            .await
            .map_err(|e| DatastoreError::Backend(e.to_string()))
    }
}
