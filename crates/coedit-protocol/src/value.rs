//! Document values and schemas
//!
//! A document value is a text string, an ordered list, or a keyed map.
//! Composite documents are served as keyed maps; there is no separate wire
//! form for them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Which shared data type a document holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSchema {
    Text,
    List,
    #[default]
    Map,
}

impl DocumentSchema {
    /// The value a fresh document of this schema starts from.
    pub fn initial_value(self) -> DocumentValue {
        match self {
            DocumentSchema::Text => DocumentValue::Text(String::new()),
            DocumentSchema::List => DocumentValue::List(Vec::new()),
            DocumentSchema::Map => DocumentValue::Map(Map::new()),
        }
    }
}

impl fmt::Display for DocumentSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSchema::Text => f.write_str("text"),
            DocumentSchema::List => f.write_str("list"),
            DocumentSchema::Map => f.write_str("map"),
        }
    }
}

/// Current value of a document. Serializes as the bare JSON value so
/// snapshots on the wire look like the document itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentValue {
    Text(String),
    List(Vec<Value>),
    Map(Map<String, Value>),
}

impl DocumentValue {
    pub fn schema(&self) -> DocumentSchema {
        match self {
            DocumentValue::Text(_) => DocumentSchema::Text,
            DocumentValue::List(_) => DocumentSchema::List,
            DocumentValue::Map(_) => DocumentSchema::Map,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DocumentValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            DocumentValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match self {
            DocumentValue::Map(entries) => Some(entries),
            _ => None,
        }
    }
}
