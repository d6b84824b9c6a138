//! Operation payloads
//!
//! Operations travel flat on the wire: envelope fields (`id`, `clientId`,
//! `baseVersion`, `timestamp`) sit beside the `type` tag and the per-kind
//! payload fields. Fields this build does not know about are captured into
//! `extra` on decode and written back on encode, so transformed operations
//! can be relayed to newer peers without stripping their extensions.

use coedit_common::{ClientId, OperationId};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Attribute maps are opaque: carried, merged last-writer-wins, never
/// interpreted.
pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperationKind {
    #[serde(rename = "text-insert", rename_all = "camelCase")]
    TextInsert {
        position: usize,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    #[serde(rename = "text-delete", rename_all = "camelCase")]
    TextDelete { position: usize, length: usize },
    #[serde(rename = "text-retain", rename_all = "camelCase")]
    TextRetain {
        position: usize,
        length: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    #[serde(rename = "list-insert", rename_all = "camelCase")]
    ListInsert { index: usize, item: Value },
    #[serde(rename = "list-delete", rename_all = "camelCase")]
    ListDelete {
        index: usize,
        #[serde(default = "default_count")]
        count: usize,
    },
    #[serde(rename = "list-replace", rename_all = "camelCase")]
    ListReplace {
        index: usize,
        item: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_item: Option<Value>,
    },
    #[serde(rename = "list-move", rename_all = "camelCase")]
    ListMove { index: usize, target_index: usize },
    #[serde(rename = "map-set", rename_all = "camelCase")]
    MapSet {
        key: String,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_value: Option<Value>,
    },
    #[serde(rename = "map-delete", rename_all = "camelCase")]
    MapDelete {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_value: Option<Value>,
    },
    #[serde(rename = "map-batch", rename_all = "camelCase")]
    MapBatch { operations: Vec<Operation> },
    /// An operation neutralized by transformation. Applies as identity but
    /// still occupies its version slot.
    #[serde(rename = "noop")]
    Noop,
}

fn default_count() -> usize {
    1
}

impl OperationKind {
    /// Wire tag for this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            OperationKind::TextInsert { .. } => "text-insert",
            OperationKind::TextDelete { .. } => "text-delete",
            OperationKind::TextRetain { .. } => "text-retain",
            OperationKind::ListInsert { .. } => "list-insert",
            OperationKind::ListDelete { .. } => "list-delete",
            OperationKind::ListReplace { .. } => "list-replace",
            OperationKind::ListMove { .. } => "list-move",
            OperationKind::MapSet { .. } => "map-set",
            OperationKind::MapDelete { .. } => "map-delete",
            OperationKind::MapBatch { .. } => "map-batch",
            OperationKind::Noop => "noop",
        }
    }

    /// Payload field names each kind owns on the wire.
    fn wire_fields(&self) -> &'static [&'static str] {
        match self {
            OperationKind::TextInsert { .. } => &["position", "text", "attributes"],
            OperationKind::TextDelete { .. } => &["position", "length"],
            OperationKind::TextRetain { .. } => &["position", "length", "attributes"],
            OperationKind::ListInsert { .. } => &["index", "item"],
            OperationKind::ListDelete { .. } => &["index", "count"],
            OperationKind::ListReplace { .. } => &["index", "item", "oldItem"],
            OperationKind::ListMove { .. } => &["index", "targetIndex"],
            OperationKind::MapSet { .. } => &["key", "value", "previousValue"],
            OperationKind::MapDelete { .. } => &["key", "previousValue"],
            OperationKind::MapBatch { .. } => &["operations"],
            OperationKind::Noop => &[],
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, OperationKind::Noop)
    }
}

/// One operation: envelope plus payload plus preserved unknown fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: OperationId,
    pub client_id: ClientId,
    /// The document version the author observed when building this op.
    pub base_version: u64,
    /// Author wall clock, ms since epoch.
    pub timestamp: i64,
    pub kind: OperationKind,
    /// Fields this build does not understand, round-tripped verbatim.
    pub extra: Map<String, Value>,
}

impl Operation {
    pub fn new(
        id: OperationId,
        client_id: ClientId,
        base_version: u64,
        timestamp: i64,
        kind: OperationKind,
    ) -> Self {
        Self {
            id,
            client_id,
            base_version,
            timestamp,
            kind,
            extra: Map::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.kind.is_noop()
    }

    /// Replace the payload, keeping envelope and extra fields.
    pub fn with_kind(&self, kind: OperationKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// Total order on authors used for tie-breaking: `(timestamp, clientId)`.
    pub fn author_order(&self) -> (i64, &str) {
        (self.timestamp, self.client_id.as_str())
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Extras first so known fields win any collision.
        let mut out = self.extra.clone();
        let kind = serde_json::to_value(&self.kind).map_err(serde::ser::Error::custom)?;
        if let Value::Object(fields) = kind {
            for (k, v) in fields {
                out.insert(k, v);
            }
        }
        out.insert("id".into(), Value::String(self.id.as_str().to_owned()));
        out.insert(
            "clientId".into(),
            Value::String(self.client_id.as_str().to_owned()),
        );
        out.insert("baseVersion".into(), Value::from(self.base_version));
        out.insert("timestamp".into(), Value::from(self.timestamp));
        out.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;

        let id: OperationId = take_field(&mut fields, "id")?;
        let client_id: ClientId = take_field(&mut fields, "clientId")?;
        let base_version: u64 = take_field(&mut fields, "baseVersion")?;
        let timestamp: i64 = take_field(&mut fields, "timestamp")?;

        let kind: OperationKind = serde_json::from_value(Value::Object(fields.clone()))
            .map_err(DeError::custom)?;

        fields.remove("type");
        for name in kind.wire_fields() {
            fields.remove(*name);
        }

        Ok(Operation {
            id,
            client_id,
            base_version,
            timestamp,
            kind,
            extra: fields,
        })
    }
}

fn take_field<T: serde::de::DeserializeOwned, E: DeError>(
    fields: &mut Map<String, Value>,
    name: &str,
) -> Result<T, E> {
    let value = fields
        .remove(name)
        .ok_or_else(|| E::custom(format!("operation missing field `{name}`")))?;
    serde_json::from_value(value).map_err(|e| E::custom(format!("operation field `{name}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coedit_common::{mint_operation_id, ClientId};

    fn op(kind: OperationKind) -> Operation {
        Operation::new(
            mint_operation_id(),
            ClientId::parse("c1").unwrap(),
            4,
            1700000000000,
            kind,
        )
    }

    #[test]
    fn wire_layout_is_flat() {
        let op = op(OperationKind::TextInsert {
            position: 2,
            text: "hi".into(),
            attributes: None,
        });
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], "text-insert");
        assert_eq!(value["position"], 2);
        assert_eq!(value["text"], "hi");
        assert_eq!(value["baseVersion"], 4);
        assert_eq!(value["clientId"], "c1");
    }

    #[test]
    fn unknown_fields_round_trip() {
        let raw = serde_json::json!({
            "id": "op1",
            "clientId": "c1",
            "baseVersion": 0,
            "timestamp": 1,
            "type": "text-delete",
            "position": 3,
            "length": 2,
            "origin": "plugin-x",
            "trace": {"hop": 2}
        });
        let op: Operation = serde_json::from_value(raw).unwrap();
        assert_eq!(
            op.kind,
            OperationKind::TextDelete {
                position: 3,
                length: 2
            }
        );
        assert_eq!(op.extra["origin"], "plugin-x");

        let back = serde_json::to_value(&op).unwrap();
        assert_eq!(back["origin"], "plugin-x");
        assert_eq!(back["trace"]["hop"], 2);
        assert_eq!(back["position"], 3);
    }

    #[test]
    fn list_delete_count_defaults_to_one() {
        let raw = serde_json::json!({
            "id": "op2", "clientId": "c1", "baseVersion": 0, "timestamp": 1,
            "type": "list-delete", "index": 5
        });
        let op: Operation = serde_json::from_value(raw).unwrap();
        assert_eq!(op.kind, OperationKind::ListDelete { index: 5, count: 1 });
    }

    #[test]
    fn map_batch_nests_operations() {
        let sub = op(OperationKind::MapSet {
            key: "x".into(),
            value: serde_json::json!(1),
            previous_value: None,
        });
        let batch = op(OperationKind::MapBatch {
            operations: vec![sub],
        });
        let json = serde_json::to_string(&batch).unwrap();
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, batch);
    }
}
