//! Shared data types for Coedit
//!
//! [`SharedText`], [`SharedList`] and [`SharedMap`] wrap a current value and
//! version. Mutating calls validate their arguments, build an operation
//! based on the version the caller saw, route it through the single `apply`
//! mutation point, and hand the operation back for shipment to the
//! coordinator. Remote operations go through the same `apply`.
//!
//! Every applied operation bumps the version to
//! `max(version, op.baseVersion + 1)` and fires events; snapshot restores
//! replace value and version wholesale and fire only `change`.

mod diff;
mod events;
mod list;
mod map;
mod text;

pub use coedit_ot::OtError;
pub use events::{Event, EventEmitter, EventKind, SubscriptionId};
pub use list::SharedList;
pub use map::{MapBatchEntry, SharedMap};
pub use text::SharedText;

use coedit_common::ClientId;
use coedit_protocol::{DocumentSchema, DocumentValue, Operation};
use serde::{Deserialize, Serialize};

/// Opaque point-in-time state of a shared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub value: DocumentValue,
    pub version: u64,
}

/// A shared type of any schema, for callers that pick the shape at runtime.
#[derive(Debug)]
pub enum SharedDoc {
    Text(SharedText),
    List(SharedList),
    Map(SharedMap),
}

impl SharedDoc {
    pub fn new(client_id: ClientId, schema: DocumentSchema) -> Self {
        match schema {
            DocumentSchema::Text => SharedDoc::Text(SharedText::new(client_id)),
            DocumentSchema::List => SharedDoc::List(SharedList::new(client_id)),
            DocumentSchema::Map => SharedDoc::Map(SharedMap::new(client_id)),
        }
    }

    /// Rehydrate from a server snapshot, deciding the variant by the value's
    /// shape.
    pub fn from_snapshot(client_id: ClientId, snapshot: Snapshot) -> Self {
        let version = snapshot.version;
        match snapshot.value {
            DocumentValue::Text(value) => {
                SharedDoc::Text(SharedText::with_state(client_id, value, version))
            }
            DocumentValue::List(items) => {
                SharedDoc::List(SharedList::with_state(client_id, items, version))
            }
            DocumentValue::Map(entries) => {
                SharedDoc::Map(SharedMap::with_state(client_id, entries, version))
            }
        }
    }

    pub fn schema(&self) -> DocumentSchema {
        match self {
            SharedDoc::Text(_) => DocumentSchema::Text,
            SharedDoc::List(_) => DocumentSchema::List,
            SharedDoc::Map(_) => DocumentSchema::Map,
        }
    }

    pub fn value(&self) -> DocumentValue {
        match self {
            SharedDoc::Text(doc) => DocumentValue::Text(doc.value()),
            SharedDoc::List(doc) => DocumentValue::List(doc.value()),
            SharedDoc::Map(doc) => DocumentValue::Map(doc.value()),
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            SharedDoc::Text(doc) => doc.version(),
            SharedDoc::List(doc) => doc.version(),
            SharedDoc::Map(doc) => doc.version(),
        }
    }

    pub fn apply(&mut self, op: &Operation) -> Result<(), OtError> {
        match self {
            SharedDoc::Text(doc) => doc.apply(op),
            SharedDoc::List(doc) => doc.apply(op),
            SharedDoc::Map(doc) => doc.apply(op),
        }
    }

    pub fn observe_version(&mut self, version: u64) {
        match self {
            SharedDoc::Text(doc) => doc.observe_version(version),
            SharedDoc::List(doc) => doc.observe_version(version),
            SharedDoc::Map(doc) => doc.observe_version(version),
        }
    }

    pub fn restore(&mut self, snapshot: Snapshot) -> Result<(), OtError> {
        match self {
            SharedDoc::Text(doc) => doc.restore(snapshot),
            SharedDoc::List(doc) => doc.restore(snapshot),
            SharedDoc::Map(doc) => doc.restore(snapshot),
        }
    }

    pub fn to_snapshot(&self) -> Snapshot {
        match self {
            SharedDoc::Text(doc) => doc.to_snapshot(),
            SharedDoc::List(doc) => doc.to_snapshot(),
            SharedDoc::Map(doc) => doc.to_snapshot(),
        }
    }

    pub fn events(&self) -> &EventEmitter {
        match self {
            SharedDoc::Text(doc) => doc.events(),
            SharedDoc::List(doc) => doc.events(),
            SharedDoc::Map(doc) => doc.events(),
        }
    }
}
