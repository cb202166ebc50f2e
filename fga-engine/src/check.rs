use crate::{
    datastore::{OpenFgaDatastore, TupleFilter},
    error::{Result, ServerError},
    models::{TupleKey, Userset},
    schema::TypeSystem,
    tuple::{self, UserRef},
};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

type CheckFuture<'a> = Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

/// Resolves whether a user has a relation to an object by walking the
/// relation rewrites of one authorization model.
///
/// - `this`: stored or contextual tuples, typed wildcards and usersets
/// - `computedUserset`: another relation on the same object
/// - `tupleToUserset`: a relation on objects reached through a tupleset
/// - `union` / `intersection` / `difference`: set operations on the above
pub struct CheckResolver {
    datastore: Arc<dyn OpenFgaDatastore>,
    typesystem: Arc<TypeSystem>,
    store_id: String,
    contextual_tuples: Vec<TupleKey>,
    resolve_node_limit: u32,
}

impl CheckResolver {
    pub fn new(
        datastore: Arc<dyn OpenFgaDatastore>,
        typesystem: Arc<TypeSystem>,
        store_id: &str,
        contextual_tuples: Vec<TupleKey>,
        resolve_node_limit: u32,
    ) -> Self {
        Self {
            datastore,
            typesystem,
            store_id: store_id.to_string(),
            contextual_tuples,
            resolve_node_limit,
        }
    }

    pub fn typesystem(&self) -> &TypeSystem {
        &self.typesystem
    }

    /// Check if `tuple.user` has `tuple.relation` to `tuple.object`
    pub async fn check(&self, tuple: &TupleKey) -> Result<bool> {
        self.resolve(tuple.clone(), 0, HashSet::new()).await
    }

    /// Read tuples matching `filter` from the datastore and the contextual set
    pub async fn read(&self, filter: &TupleFilter) -> Result<Vec<TupleKey>> {
        let mut tuples: BTreeSet<TupleKey> = self
            .datastore
            .read(&self.store_id, filter)
            .await?
            .into_iter()
            .collect();
        tuples.extend(
            self.contextual_tuples
                .iter()
                .filter(|tuple| filter.matches(tuple))
                .cloned(),
        );
        Ok(tuples.into_iter().collect())
    }

    fn resolve(&self, tuple: TupleKey, depth: u32, mut visited: HashSet<String>) -> CheckFuture<'_> {
        Box::pin(async move {
            if depth >= self.resolve_node_limit {
                return Err(ServerError::ResolutionDepthExceeded(self.resolve_node_limit));
            }

            // A cycle on this path cannot grant access
            if !visited.insert(tuple.to_string()) {
                return Ok(false);
            }

            let Some(object_type) = tuple::object_type(&tuple.object) else {
                return Ok(false);
            };
            let Some(rewrite) = self.typesystem.relation(object_type, &tuple.relation) else {
                return Ok(false);
            };

            debug!("Checking: {}", tuple);
            self.evaluate(rewrite, &tuple, depth, &visited).await
        })
    }

    fn evaluate<'a>(
        &'a self,
        rewrite: &'a Userset,
        tuple: &'a TupleKey,
        depth: u32,
        visited: &'a HashSet<String>,
    ) -> CheckFuture<'a> {
        Box::pin(async move {
            match rewrite {
                Userset::This(_) => self.check_direct(tuple, depth, visited).await,
                Userset::ComputedUserset(computed) => {
                    let rewritten =
                        TupleKey::new(&tuple.object, &computed.relation, &tuple.user);
                    self.resolve(rewritten, depth + 1, visited.clone()).await
                }
                Userset::TupleToUserset(ttu) => {
                    let filter = TupleFilter::object_relation(&tuple.object, &ttu.tupleset.relation);
                    for related in self.read(&filter).await? {
                        let Some(UserRef::Object { type_name, id }) = UserRef::parse(&related.user)
                        else {
                            continue;
                        };
                        if !self
                            .typesystem
                            .has_relation(type_name, &ttu.computed_userset.relation)
                        {
                            continue;
                        }
                        let rewritten = TupleKey::new(
                            &format!("{}:{}", type_name, id),
                            &ttu.computed_userset.relation,
                            &tuple.user,
                        );
                        if self.resolve(rewritten, depth + 1, visited.clone()).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Userset::Union(set) => {
                    let mut failure = None;
                    for child in &set.child {
                        match self.evaluate(child, tuple, depth, visited).await {
                            Ok(true) => return Ok(true),
                            Ok(false) => {}
                            Err(err) => failure = failure.or(Some(err)),
                        }
                    }
                    match failure {
                        Some(err) => Err(err),
                        None => Ok(false),
                    }
                }
                Userset::Intersection(set) => {
                    for child in &set.child {
                        if !self.evaluate(child, tuple, depth, visited).await? {
                            return Ok(false);
                        }
                    }
                    Ok(!set.child.is_empty())
                }
                Userset::Difference(difference) => {
                    if !self.evaluate(&difference.base, tuple, depth, visited).await? {
                        return Ok(false);
                    }
                    Ok(!self
                        .evaluate(&difference.subtract, tuple, depth, visited)
                        .await?)
                }
            }
        })
    }

    async fn check_direct(
        &self,
        tuple: &TupleKey,
        depth: u32,
        visited: &HashSet<String>,
    ) -> Result<bool> {
        let requested = UserRef::parse(&tuple.user);
        let filter = TupleFilter::object_relation(&tuple.object, &tuple.relation);

        for stored in self.read(&filter).await? {
            if stored.user == tuple.user {
                debug!("Direct relationship found: {}", stored);
                return Ok(true);
            }
            match UserRef::parse(&stored.user) {
                Some(UserRef::Wildcard { type_name }) => {
                    if let Some(UserRef::Object {
                        type_name: user_type,
                        ..
                    }) = requested
                    {
                        if user_type == type_name {
                            return Ok(true);
                        }
                    }
                }
                Some(UserRef::Userset {
                    type_name,
                    id,
                    relation,
                }) => {
                    let rewritten =
                        TupleKey::new(&format!("{}:{}", type_name, id), relation, &tuple.user);
                    if self.resolve(rewritten, depth + 1, visited.clone()).await? {
                        return Ok(true);
                    }
                }
                _ => {}
            }
        }
        Ok(false)
    }
}
