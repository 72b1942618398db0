//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
/// Optionally generates `new()` (UUID v4) and `Default` if `uuid` flag is passed.
macro_rules! define_id {
    ($name:ident, uuid) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

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
}

define_id!(ConnectionId, uuid);

/// A service target: the (package, class) pair naming a service implementation.
///
/// The short textual form `{package/class}` is used in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceTarget {
    package: String,
    class: String,
}

impl ServiceTarget {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Short diagnostic form, e.g. `{middleware.logging/LoggerService}`.
    pub fn to_short_string(&self) -> String {
        format!("{{{}/{}}}", self.package, self.class)
    }

    /// Fully qualified implementation name, e.g. `middleware.logging.LoggerService`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.package, self.class)
    }
}

impl fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_connection_id_from_string_rejects_empty() {
        assert!(ConnectionId::from_string(String::new()).is_err());
        assert!(ConnectionId::from_string("conn1".to_string()).is_ok());
    }

    #[test]
    fn test_service_target_forms() {
        let target = ServiceTarget::new("middleware.logging", "LoggerService");
        assert_eq!(target.package(), "middleware.logging");
        assert_eq!(target.class(), "LoggerService");
        assert_eq!(target.to_short_string(), "{middleware.logging/LoggerService}");
        assert_eq!(target.qualified_name(), "middleware.logging.LoggerService");
        assert_eq!(target.to_string(), "middleware.logging/LoggerService");
    }
}
