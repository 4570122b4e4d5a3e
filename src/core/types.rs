//! Identifier and value types for the versioned graph
//!
//! Identifiers are UUID backed so they survive save/load cycles and travel
//! unchanged between clients and the server.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parse from the hyphenated string form
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s).map(Self)
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

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

uuid_identifier!(
    /// Stable identifier of a node in the project graph
    NodeId
);

uuid_identifier!(
    /// Identifier of a persisted unit (one durable artifact)
    UnitId
);

uuid_identifier!(
    /// Identifier of a project, shared by the server and every checkout
    ProjectId
);

uuid_identifier!(
    /// Opaque identifier attached to every server version
    VersionId
);

impl NodeId {
    /// The root node of a project reuses the project's UUID, so every checkout
    /// of the same project agrees on the root identity without exchanging it.
    pub fn project_root(project: ProjectId) -> Self {
        Self(project.0)
    }
}

/// Attribute value stored on a node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Reference to another node by identifier
    NodeRef(NodeId),
    /// Ordered list of values
    List(Vec<Value>),
}

impl Value {
    /// Name of the variant, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::NodeRef(_) => "node_ref",
            Value::List(_) => "list",
        }
    }

    /// True for an empty list
    pub fn is_empty_list(&self) -> bool {
        matches!(self, Value::List(items) if items.is_empty())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NodeId> for Value {
    fn from(v: NodeId) -> Self {
        Value::NodeRef(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_root_shares_uuid() {
        let project = ProjectId::new();
        let root = NodeId::project_root(project);
        assert_eq!(root.as_uuid(), project.as_uuid());
    }

    #[test]
    fn test_id_parse_round_trip() {
        let id = NodeId::new();
        assert_eq!(NodeId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_value_serialization_is_tagged() {
        let json = serde_json::to_string(&Value::Int(7)).unwrap();
        assert_eq!(json, r#"{"type":"int","value":7}"#);
        assert!(Value::List(vec![]).is_empty_list());
        assert!(!Value::List(vec![Value::Bool(true)]).is_empty_list());
    }
}
