use crate::{
    check::CheckResolver,
    datastore::TupleFilter,
    error::{Result, ServerError},
    models::{FgaObject, TupleKey, User, UserTypeFilter},
    tuple::{self, UserRef},
};
use std::collections::BTreeSet;
use tracing::debug;

/// Users of the filtered type that have `relation` to `object`.
///
/// With an empty filter relation the candidates are objects and typed
/// wildcards of the filter type; otherwise they are usersets
/// `type:id#relation`. Every candidate is confirmed with a check.
pub async fn list_users(
    resolver: &CheckResolver,
    object: &FgaObject,
    relation: &str,
    filter: &UserTypeFilter,
) -> Result<Vec<User>> {
    let typesystem = resolver.typesystem();
    if !typesystem.has_type(&filter.type_name) {
        return Err(ServerError::InvalidArgument(format!(
            "type '{}' not found",
            filter.type_name
        )));
    }
    if !filter.relation.is_empty() && !typesystem.has_relation(&filter.type_name, &filter.relation)
    {
        return Err(ServerError::InvalidArgument(format!(
            "relation '{}#{}' not found",
            filter.type_name, filter.relation
        )));
    }

    let mut candidates = BTreeSet::new();
    for stored in resolver.read(&TupleFilter::default()).await? {
        for raw in [stored.user.as_str(), stored.object.as_str()] {
            if let Some(user) = UserRef::parse(raw) {
                if let Some(candidate) = candidate_for(&user, filter) {
                    candidates.insert(candidate);
                }
            }
        }
    }
    if filter.type_name == object.type_name && filter.relation == relation {
        candidates.insert(format!("{}#{}", object, relation));
    }
    debug!(
        "Listing users of {}#{} across {} candidates",
        object,
        relation,
        candidates.len()
    );

    let object = object.to_string();
    let mut users = Vec::new();
    for candidate in candidates {
        if resolver
            .check(&TupleKey::new(&object, relation, &candidate))
            .await?
        {
            if let Some(user) = UserRef::parse(&candidate) {
                users.push(user.to_user());
            }
        }
    }
    Ok(users)
}

fn candidate_for(user: &UserRef<'_>, filter: &UserTypeFilter) -> Option<String> {
    if user.type_name() != filter.type_name {
        return None;
    }
    match *user {
        UserRef::Object { type_name, id } if filter.relation.is_empty() => {
            Some(format!("{}:{}", type_name, id))
        }
        UserRef::Wildcard { type_name } if filter.relation.is_empty() => {
            Some(tuple::wildcard_for(type_name))
        }
        UserRef::Object { type_name, id } => {
            Some(format!("{}:{}#{}", type_name, id, filter.relation))
        }
        UserRef::Userset {
            type_name,
            id,
            relation,
        } if relation == filter.relation => Some(format!("{}:{}#{}", type_name, id, relation)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{InMemoryDatastore, OpenFgaDatastore};
    use crate::models::TypedWildcard;
    use crate::schema::{tests::document_model, TypeSystem};
    use std::sync::Arc;

    async fn resolver(writes: Vec<TupleKey>) -> CheckResolver {
        let datastore = Arc::new(InMemoryDatastore::new());
        datastore.write("store", &[], &writes).await.unwrap();
        let typesystem = Arc::new(TypeSystem::validated(document_model()).unwrap());
        CheckResolver::new(datastore, typesystem, "store", vec![], 25)
    }

    fn user_filter(type_name: &str, relation: &str) -> UserTypeFilter {
        UserTypeFilter {
            type_name: type_name.to_string(),
            relation: relation.to_string(),
        }
    }

    #[tokio::test]
    async fn test_list_object_users() {
        let resolver = resolver(vec![
            TupleKey::new("document:1", "viewer", "user:anne"),
            TupleKey::new("document:1", "owner", "user:bob"),
            TupleKey::new("document:2", "viewer", "user:carl"),
            TupleKey::new("document:1", "viewer", "group:eng#member"),
            TupleKey::new("group:eng", "member", "user:dave"),
        ])
        .await;

        let users = list_users(
            &resolver,
            &FgaObject::new("document", "1"),
            "viewer",
            &user_filter("user", ""),
        )
        .await
        .unwrap();
        assert_eq!(
            users,
            vec![
                User::Object(FgaObject::new("user", "anne")),
                User::Object(FgaObject::new("user", "bob")),
                User::Object(FgaObject::new("user", "dave")),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_wildcard_and_userset_users() {
        let resolver = resolver(vec![
            TupleKey::new("document:1", "viewer", "user:*"),
            TupleKey::new("document:1", "viewer", "group:eng#member"),
        ])
        .await;

        let wildcard = list_users(
            &resolver,
            &FgaObject::new("document", "1"),
            "viewer",
            &user_filter("user", ""),
        )
        .await
        .unwrap();
        assert_eq!(
            wildcard,
            vec![User::Wildcard(TypedWildcard {
                type_name: "user".to_string()
            })]
        );

        let usersets = list_users(
            &resolver,
            &FgaObject::new("document", "1"),
            "viewer",
            &user_filter("group", "member"),
        )
        .await
        .unwrap();
        assert_eq!(usersets.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_filter_type() {
        let resolver = resolver(vec![]).await;
        let result = list_users(
            &resolver,
            &FgaObject::new("document", "1"),
            "viewer",
            &user_filter("robot", ""),
        )
        .await;
        assert!(matches!(result, Err(ServerError::InvalidArgument(_))));
    }
}
