//! Map operation algebra
//!
//! Keys are independent: operations on distinct keys never transform. On a
//! shared key, set/set and delete/delete resolve by author order; a set
//! survives a concurrent delete (resurrecting the key), while a delete that
//! follows a winning set carries that set's value as its `previousValue`.

use crate::OtError;
use coedit_protocol::{Operation, OperationKind};
use serde_json::{Map, Value};

fn key_of(kind: &OperationKind) -> Option<&str> {
    match kind {
        OperationKind::MapSet { key, .. } | OperationKind::MapDelete { key, .. } => Some(key),
        _ => None,
    }
}

pub(crate) fn conflicts(a: &OperationKind, b: &OperationKind) -> bool {
    match (key_of(a), key_of(b)) {
        (Some(ka), Some(kb)) => ka == kb,
        _ => false,
    }
}

pub(crate) fn transform(a: &Operation, b: &Operation) -> Operation {
    let same_key = match (key_of(&a.kind), key_of(&b.kind)) {
        (Some(ka), Some(kb)) => ka == kb,
        _ => false,
    };
    if !same_key {
        return a.clone();
    }

    match (&a.kind, &b.kind) {
        (
            OperationKind::MapSet { key, value, .. },
            OperationKind::MapSet {
                value: applied_value,
                ..
            },
        ) => {
            if a.author_order() > b.author_order() {
                a.with_kind(OperationKind::MapSet {
                    key: key.clone(),
                    value: value.clone(),
                    previous_value: Some(applied_value.clone()),
                })
            } else {
                a.with_kind(OperationKind::Noop)
            }
        }
        // A set wins over a prior delete and resurrects the key; there is no
        // previous value left to record.
        (OperationKind::MapSet { key, value, .. }, OperationKind::MapDelete { .. }) => {
            a.with_kind(OperationKind::MapSet {
                key: key.clone(),
                value: value.clone(),
                previous_value: None,
            })
        }
        // A delete after a winning set removes the value that set wrote.
        (OperationKind::MapDelete { key, .. }, OperationKind::MapSet { value, .. }) => {
            a.with_kind(OperationKind::MapDelete {
                key: key.clone(),
                previous_value: Some(value.clone()),
            })
        }
        (OperationKind::MapDelete { key, .. }, OperationKind::MapDelete { .. }) => {
            if a.author_order() > b.author_order() {
                a.with_kind(OperationKind::MapDelete {
                    key: key.clone(),
                    previous_value: None,
                })
            } else {
                a.with_kind(OperationKind::Noop)
            }
        }
        _ => a.clone(),
    }
}

fn apply_entry(entries: &mut Map<String, Value>, kind: &OperationKind) -> Result<(), OtError> {
    match kind {
        OperationKind::MapSet { key, value, .. } => {
            entries.insert(key.clone(), value.clone());
            Ok(())
        }
        // Deleting an absent key is harmless: a concurrent delete may have
        // won the race.
        OperationKind::MapDelete { key, .. } => {
            entries.remove(key);
            Ok(())
        }
        OperationKind::Noop => Ok(()),
        other => Err(OtError::InvalidOperation(format!(
            "{} is not allowed inside a map batch",
            other.tag()
        ))),
    }
}

pub(crate) fn apply(entries: &mut Map<String, Value>, kind: &OperationKind) -> Result<(), OtError> {
    match kind {
        OperationKind::MapSet { .. } | OperationKind::MapDelete { .. } => {
            apply_entry(entries, kind)
        }
        // Batches are atomic: stage on a copy, commit only when every
        // sub-operation applies.
        OperationKind::MapBatch { operations } => {
            let mut staged = entries.clone();
            for sub in operations {
                apply_entry(&mut staged, &sub.kind)?;
            }
            *entries = staged;
            Ok(())
        }
        other => Err(OtError::InvalidOperation(format!(
            "{} is not a map operation",
            other.tag()
        ))),
    }
}
