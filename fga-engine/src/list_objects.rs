use crate::{
    check::CheckResolver,
    datastore::TupleFilter,
    error::Result,
    models::TupleKey,
};
use std::collections::BTreeSet;
use tracing::debug;

/// Objects of `object_type` on which `user` has `relation`.
///
/// Candidates are the objects of that type appearing in any stored or
/// contextual tuple. Each is confirmed with a check; the result is sorted and
/// capped at `max_results`.
pub async fn list_objects(
    resolver: &CheckResolver,
    object_type: &str,
    relation: &str,
    user: &str,
    max_results: usize,
) -> Result<Vec<String>> {
    let filter = TupleFilter {
        object_type: Some(object_type.to_string()),
        ..Default::default()
    };
    let candidates: BTreeSet<String> = resolver
        .read(&filter)
        .await?
        .into_iter()
        .map(|tuple| tuple.object)
        .collect();
    debug!(
        "Listing {}#{} for {} across {} candidates",
        object_type,
        relation,
        user,
        candidates.len()
    );

    let mut objects = Vec::new();
    for object in candidates {
        if objects.len() >= max_results {
            break;
        }
        if resolver.check(&TupleKey::new(&object, relation, user)).await? {
            objects.push(object);
        }
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{InMemoryDatastore, OpenFgaDatastore};
    use crate::schema::{tests::document_model, TypeSystem};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_list_objects_sorted_and_capped() {
        let datastore = Arc::new(InMemoryDatastore::new());
        let writes = vec![
            TupleKey::new("document:c", "viewer", "user:anne"),
            TupleKey::new("document:a", "owner", "user:anne"),
            TupleKey::new("document:b", "viewer", "user:bob"),
            TupleKey::new("document:d", "parent", "folder:x"),
            TupleKey::new("folder:x", "viewer", "user:anne"),
        ];
        datastore.write("store", &[], &writes).await.unwrap();
        let typesystem = Arc::new(TypeSystem::validated(document_model()).unwrap());
        let resolver = CheckResolver::new(datastore, typesystem, "store", vec![], 25);

        let objects = list_objects(&resolver, "document", "viewer", "user:anne", 1000)
            .await
            .unwrap();
        assert_eq!(objects, vec!["document:a", "document:c", "document:d"]);

        let capped = list_objects(&resolver, "document", "viewer", "user:anne", 2)
            .await
            .unwrap();
        assert_eq!(capped, vec!["document:a", "document:c"]);
    }
}
