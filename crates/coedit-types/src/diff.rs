//! Minimal diffs between two values of the same shape
//!
//! These produce the payload kinds only; the owning shared type stamps
//! envelopes with consecutive base versions so the sequence replays cleanly.

use coedit_protocol::OperationKind;
use serde_json::{Map, Value};

/// Common-prefix/common-suffix split: at most one delete followed by one
/// insert, positions in chars.
pub(crate) fn text_diff(old: &str, new: &str) -> Vec<OperationKind> {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    let max_prefix = old_chars.len().min(new_chars.len());
    let mut prefix = 0;
    while prefix < max_prefix && old_chars[prefix] == new_chars[prefix] {
        prefix += 1;
    }

    let max_suffix = max_prefix - prefix;
    let mut suffix = 0;
    while suffix < max_suffix
        && old_chars[old_chars.len() - 1 - suffix] == new_chars[new_chars.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let mut ops = Vec::new();
    let deleted = old_chars.len() - prefix - suffix;
    if deleted > 0 {
        ops.push(OperationKind::TextDelete {
            position: prefix,
            length: deleted,
        });
    }
    let inserted: String = new_chars[prefix..new_chars.len() - suffix].iter().collect();
    if !inserted.is_empty() {
        ops.push(OperationKind::TextInsert {
            position: prefix,
            text: inserted,
            attributes: None,
        });
    }
    ops
}

/// Per-index replaces over the shared prefix, then one tail insert run or a
/// single tail delete.
pub(crate) fn list_diff(old: &[Value], new: &[Value]) -> Vec<OperationKind> {
    let mut ops = Vec::new();
    let common = old.len().min(new.len());
    for index in 0..common {
        if old[index] != new[index] {
            ops.push(OperationKind::ListReplace {
                index,
                item: new[index].clone(),
                old_item: Some(old[index].clone()),
            });
        }
    }
    if new.len() > old.len() {
        for index in old.len()..new.len() {
            ops.push(OperationKind::ListInsert {
                index,
                item: new[index].clone(),
            });
        }
    } else if old.len() > new.len() {
        ops.push(OperationKind::ListDelete {
            index: new.len(),
            count: old.len() - new.len(),
        });
    }
    ops
}

/// Deletes for removed keys, sets for added or changed keys.
pub(crate) fn map_diff(old: &Map<String, Value>, new: &Map<String, Value>) -> Vec<OperationKind> {
    let mut ops = Vec::new();
    for (key, previous) in old {
        if !new.contains_key(key) {
            ops.push(OperationKind::MapDelete {
                key: key.clone(),
                previous_value: Some(previous.clone()),
            });
        }
    }
    for (key, value) in new {
        if old.get(key) != Some(value) {
            ops.push(OperationKind::MapSet {
                key: key.clone(),
                value: value.clone(),
                previous_value: old.get(key).cloned(),
            });
        }
    }
    ops
}
