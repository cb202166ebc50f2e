use thiserror::Error;

/// Errors reported by a datastore backing the engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatastoreError {
    #[error("cannot write a tuple which already exists: {0}")]
    TupleAlreadyExists(String),

    #[error("cannot delete a tuple which does not exist: {0}")]
    TupleNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Backend(String),
}

/// Errors reported by the authorization server
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store {0} not found")]
    StoreNotFound(String),

    #[error("Authorization model {0} not found")]
    AuthorizationModelNotFound(String),

    #[error("No authorization models found for store {0}")]
    LatestAuthorizationModelNotFound(String),

    #[error("Invalid authorization model: {0}")]
    InvalidAuthorizationModel(String),

    #[error("Invalid tuple '{tuple}': {reason}")]
    InvalidTuple { tuple: String, reason: String },

    #[error("Exceeded entity limit: {entity} count {actual} exceeds {limit}")]
    ExceededEntityLimit {
        entity: &'static str,
        actual: usize,
        limit: usize,
    },

    #[error("Duplicate tuple in write request: {0}")]
    DuplicateTuple(String),

    #[error("Cannot write a tuple which already exists: {0}")]
    TupleAlreadyExists(String),

    #[error("Cannot delete a tuple which does not exist: {0}")]
    TupleNotFound(String),

    #[error("Resolution exceeded the depth limit of {0}")]
    ResolutionDepthExceeded(u32),

    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    #[error("Datastore error: {0}")]
    Datastore(String),
}

impl ServerError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "validation_error",
            Self::StoreNotFound(_) => "store_id_not_found",
            Self::AuthorizationModelNotFound(_) => "authorization_model_not_found",
            Self::LatestAuthorizationModelNotFound(_) => "latest_authorization_model_not_found",
            Self::InvalidAuthorizationModel(_) => "invalid_authorization_model",
            Self::InvalidTuple { .. } => "invalid_tuple",
            Self::ExceededEntityLimit { .. } => "exceeded_entity_limit",
            Self::DuplicateTuple(_) => "cannot_allow_duplicate_tuples_in_one_request",
            Self::TupleAlreadyExists(_) => "write_failed_due_to_invalid_input",
            Self::TupleNotFound(_) => "write_failed_due_to_invalid_input",
            Self::ResolutionDepthExceeded(_) => "resolution_too_complex",
            Self::Unimplemented(_) => "unimplemented",
            Self::Datastore(_) => "internal_error",
        }
    }

    pub(crate) fn invalid_tuple(tuple: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidTuple {
            tuple: tuple.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<DatastoreError> for ServerError {
    fn from(err: DatastoreError) -> Self {
        match err {
            DatastoreError::TupleAlreadyExists(tuple) => Self::TupleAlreadyExists(tuple),
            DatastoreError::TupleNotFound(tuple) => Self::TupleNotFound(tuple),
            other => Self::Datastore(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

pub type DatastoreResult<T> = std::result::Result<T, DatastoreError>;
