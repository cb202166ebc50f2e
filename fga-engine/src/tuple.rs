//! Parsing helpers for object and user strings inside tuples.

use crate::models::{FgaObject, TypedWildcard, User, UsersetUser};

pub const WILDCARD: &str = "*";

/// Split `type:id` into its parts. Both parts must be non-empty.
pub fn split_object(object: &str) -> Option<(&str, &str)> {
    let (type_name, id) = object.split_once(':')?;
    if type_name.is_empty() || id.is_empty() || id.contains('#') {
        return None;
    }
    Some((type_name, id))
}

pub fn object_type(object: &str) -> Option<&str> {
    split_object(object).map(|(type_name, _)| type_name)
}

/// The three shapes a tuple user can take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRef<'a> {
    Object { type_name: &'a str, id: &'a str },
    Userset {
        type_name: &'a str,
        id: &'a str,
        relation: &'a str,
    },
    Wildcard { type_name: &'a str },
}

impl<'a> UserRef<'a> {
    pub fn parse(user: &'a str) -> Option<Self> {
        if let Some((object, relation)) = user.split_once('#') {
            if relation.is_empty() {
                return None;
            }
            let (type_name, id) = split_object(object)?;
            if id == WILDCARD {
                return None;
            }
            return Some(Self::Userset {
                type_name,
                id,
                relation,
            });
        }

        let (type_name, id) = split_object(user)?;
        if id == WILDCARD {
            Some(Self::Wildcard { type_name })
        } else {
            Some(Self::Object { type_name, id })
        }
    }

    pub fn type_name(&self) -> &'a str {
        match self {
            Self::Object { type_name, .. }
            | Self::Userset { type_name, .. }
            | Self::Wildcard { type_name } => type_name,
        }
    }

    pub fn to_user(self) -> User {
        match self {
            Self::Object { type_name, id } => User::Object(FgaObject::new(type_name, id)),
            Self::Userset {
                type_name,
                id,
                relation,
            } => User::Userset(UsersetUser {
                type_name: type_name.to_string(),
                id: id.to_string(),
                relation: relation.to_string(),
            }),
            Self::Wildcard { type_name } => User::Wildcard(TypedWildcard {
                type_name: type_name.to_string(),
            }),
        }
    }
}

/// Render a `User` back into its tuple string form
pub fn user_string(user: &User) -> String {
    match user {
        User::Object(object) => object.to_string(),
        User::Userset(userset) => {
            format!("{}:{}#{}", userset.type_name, userset.id, userset.relation)
        }
        User::Wildcard(wildcard) => format!("{}:{}", wildcard.type_name, WILDCARD),
    }
}

pub fn wildcard_for(type_name: &str) -> String {
    format!("{}:{}", type_name, WILDCARD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_object() {
        assert_eq!(split_object("doc:1"), Some(("doc", "1")));
        assert_eq!(split_object("doc:"), None);
        assert_eq!(split_object(":1"), None);
        assert_eq!(split_object("doc"), None);
    }

    #[test]
    fn test_parse_user_shapes() {
        assert_eq!(
            UserRef::parse("user:anne"),
            Some(UserRef::Object {
                type_name: "user",
                id: "anne"
            })
        );
        assert_eq!(
            UserRef::parse("group:eng#member"),
            Some(UserRef::Userset {
                type_name: "group",
                id: "eng",
                relation: "member"
            })
        );
        assert_eq!(
            UserRef::parse("user:*"),
            Some(UserRef::Wildcard { type_name: "user" })
        );
        assert_eq!(UserRef::parse("group:*#member"), None);
        assert_eq!(UserRef::parse("anne"), None);
    }

    #[test]
    fn test_user_string_round_trip() {
        for raw in ["user:anne", "group:eng#member", "user:*"] {
            let user = UserRef::parse(raw).unwrap().to_user();
            assert_eq!(user_string(&user), raw);
        }
    }
}
