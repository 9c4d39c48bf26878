//! Strongly-typed identifiers.
//!
//! UUID-backed IDs (instances, jobs) are minted through [`crate::engine::IdGenerator`];
//! string-backed IDs (users, definition keys) are validated at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// The `uuid` flag generates a `uuid::Uuid`-backed ID with `new()` (v4),
/// `from_uuid()`, `parse()` and `as_uuid()`. The plain form generates a
/// non-empty-validated `String` wrapper with `from_string()` and `as_str()`.
macro_rules! define_id {
    ($name:ident, uuid) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            pub fn from_uuid(id: uuid::Uuid) -> Self {
                Self(id)
            }

            pub fn parse(s: &str) -> Result<Self, &'static str> {
                uuid::Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| concat!(stringify!($name), " is not a valid UUID"))
            }

            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(InstanceId, uuid);
define_id!(JobId, uuid);
define_id!(UserId);
define_id!(DefinitionKey);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        let a = InstanceId::new();
        let b = InstanceId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn uuid_id_roundtrips_through_parse() {
        let id = JobId::new();
        let parsed = JobId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn uuid_id_parse_rejects_garbage() {
        assert!(InstanceId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn string_ids_reject_empty() {
        assert!(UserId::from_string(String::new()).is_err());
        assert!(DefinitionKey::from_string(String::new()).is_err());
    }

    #[test]
    fn string_ids_expose_inner() {
        let user = UserId::from_string("bruce".to_string()).unwrap();
        assert_eq!(user.as_str(), "bruce");
        assert_eq!(user.to_string(), "bruce");
    }
}
