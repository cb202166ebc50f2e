use crate::{
    error::{Result, ServerError},
    models::*,
    tuple::{self, UserRef},
};
use std::collections::{HashMap, HashSet};

pub const SCHEMA_VERSION_1_1: &str = "1.1";

/// Indexed view of an authorization model used for validation and resolution
#[derive(Debug, Clone)]
pub struct TypeSystem {
    model: AuthorizationModel,
    types: HashMap<String, TypeDefinition>,
}

impl TypeSystem {
    /// Index a model that was already validated when it was written
    pub fn new(model: AuthorizationModel) -> Self {
        let types = model
            .type_definitions
            .iter()
            .map(|definition| (definition.type_name.clone(), definition.clone()))
            .collect();
        Self { model, types }
    }

    /// Validate a model and index it
    pub fn validated(model: AuthorizationModel) -> Result<Self> {
        if model.schema_version != SCHEMA_VERSION_1_1 {
            return Err(ServerError::InvalidAuthorizationModel(format!(
                "unsupported schema version '{}'",
                model.schema_version
            )));
        }
        if model.type_definitions.is_empty() {
            return Err(ServerError::InvalidAuthorizationModel(
                "type definitions must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for definition in &model.type_definitions {
            if !is_valid_name(&definition.type_name) {
                return Err(ServerError::InvalidAuthorizationModel(format!(
                    "invalid type name '{}'",
                    definition.type_name
                )));
            }
            if !seen.insert(definition.type_name.as_str()) {
                return Err(ServerError::InvalidAuthorizationModel(format!(
                    "duplicate type '{}'",
                    definition.type_name
                )));
            }
        }

        let typesystem = Self::new(model);
        for definition in &typesystem.model.type_definitions {
            typesystem.validate_type(definition)?;
        }
        Ok(typesystem)
    }

    pub fn model(&self) -> &AuthorizationModel {
        &self.model
    }

    pub fn model_id(&self) -> &str {
        &self.model.id
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn relation(&self, type_name: &str, relation: &str) -> Option<&Userset> {
        self.types.get(type_name)?.relations.get(relation)
    }

    pub fn has_relation(&self, type_name: &str, relation: &str) -> bool {
        self.relation(type_name, relation).is_some()
    }

    pub fn is_directly_assignable(&self, type_name: &str, relation: &str) -> bool {
        self.relation(type_name, relation)
            .map(contains_this)
            .unwrap_or(false)
    }

    pub fn directly_related_user_types(
        &self,
        type_name: &str,
        relation: &str,
    ) -> &[RelationReference] {
        self.types
            .get(type_name)
            .and_then(|definition| definition.metadata.as_ref())
            .and_then(|metadata| metadata.relations.get(relation))
            .map(|metadata| metadata.directly_related_user_types.as_slice())
            .unwrap_or(&[])
    }

    /// Validate a tuple against this model
    pub fn validate_tuple(&self, tuple: &TupleKey) -> Result<()> {
        let (object_type, _) = tuple::split_object(&tuple.object)
            .ok_or_else(|| ServerError::invalid_tuple(tuple, "invalid 'object' field format"))?;
        if !self.has_type(object_type) {
            return Err(ServerError::invalid_tuple(
                tuple,
                format!("type '{}' not found", object_type),
            ));
        }
        if tuple.relation.is_empty() {
            return Err(ServerError::invalid_tuple(tuple, "the 'relation' field is empty"));
        }
        if !self.has_relation(object_type, &tuple.relation) {
            return Err(ServerError::invalid_tuple(
                tuple,
                format!(
                    "relation '{}#{}' not found",
                    object_type, tuple.relation
                ),
            ));
        }
        if !self.is_directly_assignable(object_type, &tuple.relation) {
            return Err(ServerError::invalid_tuple(
                tuple,
                format!(
                    "relation '{}#{}' is not directly assignable",
                    object_type, tuple.relation
                ),
            ));
        }

        let user = UserRef::parse(&tuple.user)
            .ok_or_else(|| ServerError::invalid_tuple(tuple, "invalid 'user' field format"))?;
        if !self.has_type(user.type_name()) {
            return Err(ServerError::invalid_tuple(
                tuple,
                format!("type '{}' not found", user.type_name()),
            ));
        }

        let allowed = self
            .directly_related_user_types(object_type, &tuple.relation)
            .iter()
            .any(|reference| reference_allows(reference, &user));
        if !allowed {
            return Err(ServerError::invalid_tuple(
                tuple,
                format!(
                    "type '{}' is not an allowed type restriction for '{}#{}'",
                    user_restriction(&user),
                    object_type,
                    tuple.relation
                ),
            ));
        }
        Ok(())
    }

    fn validate_type(&self, definition: &TypeDefinition) -> Result<()> {
        let type_name = &definition.type_name;
        for (relation, rewrite) in &definition.relations {
            if !is_valid_name(relation) {
                return Err(ServerError::InvalidAuthorizationModel(format!(
                    "invalid relation name '{}' on type '{}'",
                    relation, type_name
                )));
            }
            self.validate_rewrite(type_name, relation, rewrite)?;

            if contains_this(rewrite)
                && self
                    .directly_related_user_types(type_name, relation)
                    .is_empty()
            {
                return Err(ServerError::InvalidAuthorizationModel(format!(
                    "relation '{}#{}' is directly assignable but declares no user types",
                    type_name, relation
                )));
            }
        }

        if let Some(metadata) = &definition.metadata {
            for (relation, relation_metadata) in &metadata.relations {
                if !definition.relations.contains_key(relation) {
                    return Err(ServerError::InvalidAuthorizationModel(format!(
                        "metadata refers to undefined relation '{}#{}'",
                        type_name, relation
                    )));
                }
                for reference in &relation_metadata.directly_related_user_types {
                    self.validate_reference(type_name, relation, reference)?;
                }
            }
        }
        Ok(())
    }

    fn validate_rewrite(&self, type_name: &str, relation: &str, rewrite: &Userset) -> Result<()> {
        match rewrite {
            Userset::This(_) => Ok(()),
            Userset::ComputedUserset(computed) => {
                if self.has_relation(type_name, &computed.relation) {
                    Ok(())
                } else {
                    Err(ServerError::InvalidAuthorizationModel(format!(
                        "relation '{}#{}' refers to undefined relation '{}'",
                        type_name, relation, computed.relation
                    )))
                }
            }
            Userset::TupleToUserset(ttu) => {
                let tupleset = &ttu.tupleset.relation;
                if !self.has_relation(type_name, tupleset) {
                    return Err(ServerError::InvalidAuthorizationModel(format!(
                        "relation '{}#{}' refers to undefined tupleset '{}'",
                        type_name, relation, tupleset
                    )));
                }
                if !self.is_directly_assignable(type_name, tupleset) {
                    return Err(ServerError::InvalidAuthorizationModel(format!(
                        "tupleset '{}#{}' must be directly assignable",
                        type_name, tupleset
                    )));
                }
                let computed = &ttu.computed_userset.relation;
                let reachable = self
                    .directly_related_user_types(type_name, tupleset)
                    .iter()
                    .any(|reference| self.has_relation(&reference.type_name, computed));
                if reachable {
                    Ok(())
                } else {
                    Err(ServerError::InvalidAuthorizationModel(format!(
                        "relation '{}' is not defined on any type related through '{}#{}'",
                        computed, type_name, tupleset
                    )))
                }
            }
            Userset::Union(set) | Userset::Intersection(set) => {
                if set.child.is_empty() {
                    return Err(ServerError::InvalidAuthorizationModel(format!(
                        "relation '{}#{}' has an empty set operation",
                        type_name, relation
                    )));
                }
                set.child
                    .iter()
                    .try_for_each(|child| self.validate_rewrite(type_name, relation, child))
            }
            Userset::Difference(difference) => {
                self.validate_rewrite(type_name, relation, &difference.base)?;
                self.validate_rewrite(type_name, relation, &difference.subtract)
            }
        }
    }

    fn validate_reference(
        &self,
        type_name: &str,
        relation: &str,
        reference: &RelationReference,
    ) -> Result<()> {
        if !self.has_type(&reference.type_name) {
            return Err(ServerError::InvalidAuthorizationModel(format!(
                "'{}#{}' allows undefined type '{}'",
                type_name, relation, reference.type_name
            )));
        }
        if let Some(related) = &reference.relation {
            if !self.has_relation(&reference.type_name, related) {
                return Err(ServerError::InvalidAuthorizationModel(format!(
                    "'{}#{}' allows undefined relation '{}#{}'",
                    type_name, relation, reference.type_name, related
                )));
            }
        }
        Ok(())
    }
}

/// Whether the rewrite admits directly stored tuples anywhere in its tree
pub fn contains_this(rewrite: &Userset) -> bool {
    match rewrite {
        Userset::This(_) => true,
        Userset::ComputedUserset(_) | Userset::TupleToUserset(_) => false,
        Userset::Union(set) | Userset::Intersection(set) => set.child.iter().any(contains_this),
        Userset::Difference(difference) => {
            contains_this(&difference.base) || contains_this(&difference.subtract)
        }
    }
}

fn reference_allows(reference: &RelationReference, user: &UserRef<'_>) -> bool {
    if reference.type_name != user.type_name() {
        return false;
    }
    match user {
        UserRef::Object { .. } => reference.relation.is_none() && reference.wildcard.is_none(),
        UserRef::Wildcard { .. } => reference.wildcard.is_some(),
        UserRef::Userset { relation, .. } => reference.relation.as_deref() == Some(*relation),
    }
}

fn user_restriction(user: &UserRef<'_>) -> String {
    match user {
        UserRef::Object { type_name, .. } => type_name.to_string(),
        UserRef::Wildcard { type_name } => tuple::wildcard_for(type_name),
        UserRef::Userset {
            type_name,
            relation,
            ..
        } => format!("{}#{}", type_name, relation),
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 254
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | '#' | '*' | '@'))
}
