//! Operational transformation algebra
//!
//! Pure functions over [`coedit_protocol::Operation`]: no I/O, no state.
//!
//! The contract is TP1: for concurrent operations `a`, `b` with the same
//! base version,
//!
//! ```text
//! apply(b); apply(transform(a, b))  ==  apply(a); apply(transform(b, a))
//! ```
//!
//! Ties that positions cannot decide fall back to the total order on
//! authors, `(timestamp, clientId)` lexicographic. An operation that a
//! transformation neutralizes (empty delete residual, conflict loser, moved
//! item deleted underneath) becomes `noop`: it applies as identity but still
//! occupies a version slot.

mod list;
mod map;
mod text;

use coedit_protocol::{DocumentValue, Operation, OperationKind};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OtError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl OtError {
    pub(crate) fn range(what: &str) -> Self {
        OtError::InvalidOperation(format!("{what} out of range"))
    }
}

fn is_text(kind: &OperationKind) -> bool {
    matches!(
        kind,
        OperationKind::TextInsert { .. }
            | OperationKind::TextDelete { .. }
            | OperationKind::TextRetain { .. }
    )
}

fn is_list(kind: &OperationKind) -> bool {
    matches!(
        kind,
        OperationKind::ListInsert { .. }
            | OperationKind::ListDelete { .. }
            | OperationKind::ListReplace { .. }
            | OperationKind::ListMove { .. }
    )
}

fn is_map(kind: &OperationKind) -> bool {
    matches!(
        kind,
        OperationKind::MapSet { .. }
            | OperationKind::MapDelete { .. }
            | OperationKind::MapBatch { .. }
    )
}

/// Transform `a` to apply after `b`: `T(A, B) -> A'`.
///
/// `b` is the operation that reached the canonical history first; the result
/// is `a` rewritten to have the same effect on a state where `b` has already
/// been applied.
pub fn transform(a: &Operation, b: &Operation) -> Operation {
    if a.is_noop() || b.is_noop() {
        return a.clone();
    }
    // A batch transforms element-wise; opposing a batch transforms against
    // each of its sub-operations in order.
    if let OperationKind::MapBatch { operations } = &a.kind {
        let transformed = operations.iter().map(|sub| transform(sub, b)).collect();
        return a.with_kind(OperationKind::MapBatch {
            operations: transformed,
        });
    }
    if let OperationKind::MapBatch { operations } = &b.kind {
        let mut acc = a.clone();
        for sub in operations {
            acc = transform(&acc, sub);
        }
        return acc;
    }

    if is_text(&a.kind) && is_text(&b.kind) {
        text::transform(a, b)
    } else if is_list(&a.kind) && is_list(&b.kind) {
        list::transform(a, b)
    } else if is_map(&a.kind) && is_map(&b.kind) {
        map::transform(a, b)
    } else {
        // Operations of different families target different documents and
        // never interact positionally.
        a.clone()
    }
}

/// Whether two consecutive operations from the same author can merge into
/// one.
pub fn can_merge(first: &Operation, second: &Operation) -> bool {
    first.client_id == second.client_id && text::mergeable(&first.kind, &second.kind)
}

/// Merge two consecutive same-author operations, if [`can_merge`] allows.
///
/// The merged operation keeps the first operation's id and base version and
/// takes the second's timestamp.
pub fn compose(first: &Operation, second: &Operation) -> Option<Operation> {
    if !can_merge(first, second) {
        return None;
    }
    let kind = text::merge(&first.kind, &second.kind)?;
    let mut merged = first.with_kind(kind);
    merged.timestamp = second.timestamp;
    Some(merged)
}

/// Whether the affected ranges of two operations overlap. Inserts occupy a
/// zero-width range at their position; map operations conflict on key
/// equality.
pub fn conflicts(a: &Operation, b: &Operation) -> bool {
    if a.is_noop() || b.is_noop() {
        return false;
    }
    if let OperationKind::MapBatch { operations } = &a.kind {
        return operations.iter().any(|sub| conflicts(sub, b));
    }
    if let OperationKind::MapBatch { operations } = &b.kind {
        return operations.iter().any(|sub| conflicts(a, sub));
    }
    if is_text(&a.kind) && is_text(&b.kind) {
        text::conflicts(&a.kind, &b.kind)
    } else if is_list(&a.kind) && is_list(&b.kind) {
        list::conflicts(&a.kind, &b.kind)
    } else if is_map(&a.kind) && is_map(&b.kind) {
        map::conflicts(&a.kind, &b.kind)
    } else {
        false
    }
}

/// Apply `op` to `value`, mutating it in place.
///
/// Application is total: it either succeeds or fails with
/// [`OtError::InvalidOperation`] leaving the value untouched.
pub fn apply(value: &mut DocumentValue, op: &Operation) -> Result<(), OtError> {
    if op.is_noop() {
        return Ok(());
    }
    match (&op.kind, value) {
        (kind, DocumentValue::Text(text)) if is_text(kind) => text::apply(text, kind),
        (kind, DocumentValue::List(items)) if is_list(kind) => list::apply(items, kind),
        (kind, DocumentValue::Map(entries)) if is_map(kind) => map::apply(entries, kind),
        (kind, value) => Err(OtError::InvalidOperation(format!(
            "{} cannot apply to a {} document",
            kind.tag(),
            value.schema()
        ))),
    }
}
