//! Typed request and response objects of the authorization API.
//!
//! Field names serialize in lowerCamelCase. Snake_case spellings are accepted
//! on input and unknown fields are ignored, so payloads produced by older or
//! newer hosts still decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A named, isolated authorization namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, alias = "deleted_at", skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateStoreRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStoreResponse {
    pub id: String,
    pub name: String,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

impl From<Store> for CreateStoreResponse {
    fn from(store: Store) -> Self {
        Self {
            id: store.id,
            name: store.name,
            created_at: store.created_at,
            updated_at: store.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListStoresRequest {
    #[serde(alias = "page_size", skip_serializing_if = "Option::is_none")]
    pub page_size: Option<i32>,
    #[serde(alias = "continuation_token")]
    pub continuation_token: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListStoresResponse {
    pub stores: Vec<Store>,
    #[serde(alias = "continuation_token")]
    pub continuation_token: String,
}

/// `object#relation` reference used inside relation rewrites
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectRelation {
    pub object: String,
    pub relation: String,
}

impl ObjectRelation {
    pub fn relation(relation: &str) -> Self {
        Self {
            object: String::new(),
            relation: relation.to_string(),
        }
    }
}

/// Marker for "users directly related through stored tuples"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectUserset {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usersets {
    pub child: Vec<Userset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TupleToUserset {
    pub tupleset: ObjectRelation,
    #[serde(alias = "computed_userset")]
    pub computed_userset: ObjectRelation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Difference {
    pub base: Userset,
    pub subtract: Userset,
}

/// Relation rewrite: how the users of a relation are computed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "UsersetFields")]
pub enum Userset {
    This(DirectUserset),
    ComputedUserset(ObjectRelation),
    TupleToUserset(TupleToUserset),
    Union(Usersets),
    Intersection(Usersets),
    Difference(Box<Difference>),
}

/// Decoding form of [`Userset`]: the first known key wins, others are ignored
#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UsersetFields {
    this: Option<DirectUserset>,
    #[serde(alias = "computed_userset")]
    computed_userset: Option<ObjectRelation>,
    #[serde(alias = "tuple_to_userset")]
    tuple_to_userset: Option<TupleToUserset>,
    union: Option<Usersets>,
    intersection: Option<Usersets>,
    difference: Option<Box<Difference>>,
}

impl TryFrom<UsersetFields> for Userset {
    type Error = String;

    fn try_from(fields: UsersetFields) -> Result<Self, Self::Error> {
        if let Some(this) = fields.this {
            return Ok(Self::This(this));
        }
        if let Some(computed) = fields.computed_userset {
            return Ok(Self::ComputedUserset(computed));
        }
        if let Some(ttu) = fields.tuple_to_userset {
            return Ok(Self::TupleToUserset(ttu));
        }
        if let Some(union) = fields.union {
            return Ok(Self::Union(union));
        }
        if let Some(intersection) = fields.intersection {
            return Ok(Self::Intersection(intersection));
        }
        fields
            .difference
            .map(Self::Difference)
            .ok_or_else(|| "userset has no known rewrite".to_string())
    }
}

impl Userset {
    pub fn this() -> Self {
        Self::This(DirectUserset {})
    }

    pub fn computed(relation: &str) -> Self {
        Self::ComputedUserset(ObjectRelation::relation(relation))
    }

    pub fn tuple_to_userset(tupleset: &str, computed: &str) -> Self {
        Self::TupleToUserset(TupleToUserset {
            tupleset: ObjectRelation::relation(tupleset),
            computed_userset: ObjectRelation::relation(computed),
        })
    }

    pub fn union(child: Vec<Userset>) -> Self {
        Self::Union(Usersets { child })
    }

    pub fn intersection(child: Vec<Userset>) -> Self {
        Self::Intersection(Usersets { child })
    }

    pub fn difference(base: Userset, subtract: Userset) -> Self {
        Self::Difference(Box::new(Difference { base, subtract }))
    }
}

/// Typed wildcard marker (`type:*`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wildcard {}

/// A user type allowed on a directly assignable relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationReference {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<Wildcard>,
}

impl RelationReference {
    pub fn direct(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            relation: None,
            wildcard: None,
        }
    }

    pub fn userset(type_name: &str, relation: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            relation: Some(relation.to_string()),
            wildcard: None,
        }
    }

    pub fn wildcard(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            relation: None,
            wildcard: Some(Wildcard {}),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelationMetadata {
    #[serde(alias = "directly_related_user_types")]
    pub directly_related_user_types: Vec<RelationReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub relations: BTreeMap<String, RelationMetadata>,
}

/// Object type with its relations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub relations: BTreeMap<String, Userset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthorizationModel {
    pub id: String,
    #[serde(alias = "schema_version")]
    pub schema_version: String,
    #[serde(alias = "type_definitions")]
    pub type_definitions: Vec<TypeDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WriteAuthorizationModelRequest {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(alias = "type_definitions")]
    pub type_definitions: Vec<TypeDefinition>,
    #[serde(alias = "schema_version")]
    pub schema_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WriteAuthorizationModelResponse {
    #[serde(alias = "authorization_model_id")]
    pub authorization_model_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadAuthorizationModelsRequest {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(alias = "page_size", skip_serializing_if = "Option::is_none")]
    pub page_size: Option<i32>,
    #[serde(alias = "continuation_token")]
    pub continuation_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadAuthorizationModelsResponse {
    #[serde(alias = "authorization_models")]
    pub authorization_models: Vec<AuthorizationModel>,
    #[serde(alias = "continuation_token")]
    pub continuation_token: String,
}

/// Relationship tuple: `user` has `relation` to `object`
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TupleKey {
    pub object: String,
    pub relation: String,
    pub user: String,
}

impl TupleKey {
    pub fn new(object: &str, relation: &str, user: &str) -> Self {
        Self {
            object: object.to_string(),
            relation: relation.to_string(),
            user: user.to_string(),
        }
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.user)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TupleKeys {
    #[serde(alias = "tuple_keys")]
    pub tuple_keys: Vec<TupleKey>,
}

impl TupleKeys {
    pub fn new(tuple_keys: Vec<TupleKey>) -> Self {
        Self { tuple_keys }
    }
}

/// Tuples that exist only for the duration of one query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextualTupleKeys {
    #[serde(alias = "tuple_keys")]
    pub tuple_keys: Vec<TupleKey>,
}

impl ContextualTupleKeys {
    pub fn new(tuple_keys: Vec<TupleKey>) -> Self {
        Self { tuple_keys }
    }
}

/// Tuple shape accepted by deletes
pub type TupleKeyWithoutCondition = TupleKey;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WriteRequest {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writes: Option<TupleKeys>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletes: Option<TupleKeys>,
    #[serde(alias = "authorization_model_id")]
    pub authorization_model_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CheckRequest {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(alias = "tuple_key")]
    pub tuple_key: TupleKey,
    #[serde(alias = "contextual_tuples", skip_serializing_if = "Option::is_none")]
    pub contextual_tuples: Option<ContextualTupleKeys>,
    #[serde(alias = "authorization_model_id")]
    pub authorization_model_id: String,
    pub trace: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resolution: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListObjectsRequest {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(alias = "authorization_model_id")]
    pub authorization_model_id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub relation: String,
    pub user: String,
    #[serde(alias = "contextual_tuples", skip_serializing_if = "Option::is_none")]
    pub contextual_tuples: Option<ContextualTupleKeys>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListObjectsResponse {
    pub objects: Vec<String>,
}

/// Object reference split into type and id
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct FgaObject {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
}

impl FgaObject {
    pub fn new(type_name: &str, id: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for FgaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersetUser {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
    pub relation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct TypedWildcard {
    #[serde(rename = "type")]
    pub type_name: String,
}

/// A user returned by `ListUsers`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "UserFields")]
pub enum User {
    Object(FgaObject),
    Userset(UsersetUser),
    Wildcard(TypedWildcard),
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct UserFields {
    object: Option<FgaObject>,
    userset: Option<UsersetUser>,
    wildcard: Option<TypedWildcard>,
}

impl TryFrom<UserFields> for User {
    type Error = String;

    fn try_from(fields: UserFields) -> Result<Self, Self::Error> {
        if let Some(object) = fields.object {
            return Ok(Self::Object(object));
        }
        if let Some(userset) = fields.userset {
            return Ok(Self::Userset(userset));
        }
        fields
            .wildcard
            .map(Self::Wildcard)
            .ok_or_else(|| "user has no object, userset or wildcard".to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserTypeFilter {
    #[serde(rename = "type")]
    pub type_name: String,
    pub relation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListUsersRequest {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(alias = "authorization_model_id")]
    pub authorization_model_id: String,
    pub object: FgaObject,
    pub relation: String,
    #[serde(alias = "user_filters")]
    pub user_filters: Vec<UserTypeFilter>,
    #[serde(alias = "contextual_tuples")]
    pub contextual_tuples: Vec<TupleKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListUsersResponse {
    pub users: Vec<User>,
}
