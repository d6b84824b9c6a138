//! Text operation algebra
//!
//! Positions and lengths count chars, not bytes. Byte offsets for splicing
//! are derived with `str_indices` at application time.

use crate::OtError;
use coedit_protocol::operation::Attributes;
use coedit_protocol::{Operation, OperationKind};
use str_indices::chars;

fn char_len(s: &str) -> usize {
    chars::count(s)
}

/// Overlap test over half-open ranges, where a zero-width range is an
/// insertion point.
pub(crate) fn ranges_overlap(a: (usize, usize), b: (usize, usize)) -> bool {
    match (a.0 == a.1, b.0 == b.1) {
        (true, true) => a.0 == b.0,
        (true, false) => b.0 <= a.0 && a.0 < b.1,
        (false, true) => a.0 <= b.0 && b.0 < a.1,
        (false, false) => a.0 < b.1 && b.0 < a.1,
    }
}

fn affected_range(kind: &OperationKind) -> Option<(usize, usize)> {
    match kind {
        OperationKind::TextInsert { position, .. } => Some((*position, *position)),
        OperationKind::TextDelete { position, length }
        | OperationKind::TextRetain {
            position, length, ..
        } => Some((*position, position + length)),
        _ => None,
    }
}

pub(crate) fn conflicts(a: &OperationKind, b: &OperationKind) -> bool {
    match (affected_range(a), affected_range(b)) {
        (Some(ra), Some(rb)) => ranges_overlap(ra, rb),
        _ => false,
    }
}

/// Keep `a`'s attribute map consistent with last-writer-wins per key after
/// `b` has been applied: keys the later writer `b` also set are dropped.
fn lww_attributes(a: &Operation, a_attrs: &Attributes, b: &Operation, b_attrs: &Attributes) -> Attributes {
    let mut merged = a_attrs.clone();
    if b.author_order() > a.author_order() {
        merged.retain(|key, _| !b_attrs.contains_key(key));
    }
    merged
}

pub(crate) fn transform(a: &Operation, b: &Operation) -> Operation {
    match (&a.kind, &b.kind) {
        (
            OperationKind::TextInsert {
                position: pa,
                text,
                attributes,
            },
            OperationKind::TextInsert {
                position: pb,
                text: tb,
                ..
            },
        ) => {
            let shift = pa > pb || (pa == pb && a.author_order() > b.author_order());
            if shift {
                a.with_kind(OperationKind::TextInsert {
                    position: pa + char_len(tb),
                    text: text.clone(),
                    attributes: attributes.clone(),
                })
            } else {
                a.clone()
            }
        }

        (
            OperationKind::TextInsert {
                position: pa,
                text,
                attributes,
            },
            OperationKind::TextDelete {
                position: pb,
                length: lb,
            },
        ) => {
            let position = if *pa <= *pb {
                *pa
            } else if *pa >= pb + lb {
                pa - lb
            } else {
                // Insertion point swallowed by the delete: snap to its start.
                *pb
            };
            a.with_kind(OperationKind::TextInsert {
                position,
                text: text.clone(),
                attributes: attributes.clone(),
            })
        }

        (
            OperationKind::TextDelete {
                position: pa,
                length: la,
            },
            OperationKind::TextInsert {
                position: pb,
                text: tb,
                ..
            },
        ) => {
            let inserted = char_len(tb);
            if *pb <= *pa {
                a.with_kind(OperationKind::TextDelete {
                    position: pa + inserted,
                    length: *la,
                })
            } else if *pb >= pa + la {
                a.clone()
            } else {
                // Insert landed inside the deleted range: the delete now
                // covers the inserted text too.
                a.with_kind(OperationKind::TextDelete {
                    position: *pa,
                    length: la + inserted,
                })
            }
        }

        (
            OperationKind::TextDelete {
                position: pa,
                length: la,
            },
            OperationKind::TextDelete {
                position: pb,
                length: lb,
            },
        ) => {
            let (a_start, a_end) = (*pa, pa + la);
            let (b_start, b_end) = (*pb, pb + lb);
            if b_end <= a_start {
                a.with_kind(OperationKind::TextDelete {
                    position: pa - lb,
                    length: *la,
                })
            } else if b_start >= a_end {
                a.clone()
            } else {
                let overlap = a_end.min(b_end) - a_start.max(b_start);
                let length = la - overlap;
                if length == 0 {
                    a.with_kind(OperationKind::Noop)
                } else {
                    a.with_kind(OperationKind::TextDelete {
                        position: a_start.min(b_start),
                        length,
                    })
                }
            }
        }

        // Retain is identity under transformation in the plain-text model;
        // overlapping retains only reconcile their attribute maps.
        (
            OperationKind::TextRetain {
                position: pa,
                length: la,
                attributes: Some(a_attrs),
            },
            OperationKind::TextRetain {
                position: pb,
                length: lb,
                attributes: Some(b_attrs),
            },
        ) if ranges_overlap((*pa, pa + la), (*pb, pb + lb)) => {
            a.with_kind(OperationKind::TextRetain {
                position: *pa,
                length: *la,
                attributes: Some(lww_attributes(a, a_attrs, b, b_attrs)),
            })
        }

        _ => a.clone(),
    }
}

pub(crate) fn mergeable(first: &OperationKind, second: &OperationKind) -> bool {
    match (first, second) {
        (
            OperationKind::TextInsert {
                position: p1,
                text,
                attributes: attrs1,
            },
            OperationKind::TextInsert {
                position: p2,
                attributes: attrs2,
                ..
            },
        ) => *p2 == p1 + char_len(text) && attrs1 == attrs2,
        (
            OperationKind::TextDelete { position: p1, .. },
            OperationKind::TextDelete { position: p2, .. },
        ) => p1 == p2,
        _ => false,
    }
}

pub(crate) fn merge(first: &OperationKind, second: &OperationKind) -> Option<OperationKind> {
    match (first, second) {
        (
            OperationKind::TextInsert {
                position,
                text,
                attributes,
            },
            OperationKind::TextInsert { text: tail, .. },
        ) => Some(OperationKind::TextInsert {
            position: *position,
            text: format!("{text}{tail}"),
            attributes: attributes.clone(),
        }),
        (
            OperationKind::TextDelete { position, length },
            OperationKind::TextDelete { length: more, .. },
        ) => Some(OperationKind::TextDelete {
            position: *position,
            length: length + more,
        }),
        _ => None,
    }
}

pub(crate) fn apply(text: &mut String, kind: &OperationKind) -> Result<(), OtError> {
    let total = char_len(text);
    match kind {
        OperationKind::TextInsert {
            position, text: insert, ..
        } => {
            if *position > total {
                return Err(OtError::range("text-insert position"));
            }
            let at = chars::to_byte_idx(text, *position);
            text.insert_str(at, insert);
            Ok(())
        }
        OperationKind::TextDelete { position, length } => {
            if position + length > total {
                return Err(OtError::range("text-delete range"));
            }
            let start = chars::to_byte_idx(text, *position);
            let end = chars::to_byte_idx(text, position + length);
            text.replace_range(start..end, "");
            Ok(())
        }
        OperationKind::TextRetain { position, length, .. } => {
            if position + length > total {
                return Err(OtError::range("text-retain range"));
            }
            Ok(())
        }
        other => Err(OtError::InvalidOperation(format!(
            "{} is not a text operation",
            other.tag()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{apply as apply_op, compose, transform as transform_op};
    use coedit_protocol::DocumentValue;
    use coedit_common::{ClientId, OperationId};

    fn op(client: &str, ts: i64, base: u64, kind: OperationKind) -> Operation {
        Operation::new(
            OperationId::new_unchecked(format!("{client}-{ts}")),
            ClientId::parse(client).unwrap(),
            base,
            ts,
            kind,
        )
    }

    fn insert(client: &str, ts: i64, position: usize, text: &str) -> Operation {
        op(
            client,
            ts,
            0,
            OperationKind::TextInsert {
                position,
                text: text.into(),
                attributes: None,
            },
        )
    }

    fn delete(client: &str, ts: i64, position: usize, length: usize) -> Operation {
        op(client, ts, 0, OperationKind::TextDelete { position, length })
    }

    fn text_doc(s: &str) -> DocumentValue {
        DocumentValue::Text(s.into())
    }

    #[test]
    fn concurrent_inserts_no_overlap() {
        // doc "AC": insert(1, "B") then insert(2, "D") based on the same
        // version converge to "ABCD".
        let mut doc = text_doc("AC");
        let b = insert("c1", 100, 1, "B");
        let d = insert("c2", 101, 2, "D");

        apply_op(&mut doc, &b).unwrap();
        let d2 = transform_op(&d, &b);
        match &d2.kind {
            OperationKind::TextInsert { position, .. } => assert_eq!(*position, 3),
            other => panic!("unexpected kind {other:?}"),
        }
        apply_op(&mut doc, &d2).unwrap();
        assert_eq!(doc, text_doc("ABCD"));
    }

    #[test]
    fn same_position_tie_breaks_on_author() {
        // Equal timestamps: higher clientId shifts behind the lower one.
        let x = insert("a", 100, 0, "X");
        let y = insert("b", 100, 0, "Y");

        let mut doc = text_doc("");
        apply_op(&mut doc, &x).unwrap();
        apply_op(&mut doc, &transform_op(&y, &x)).unwrap();
        assert_eq!(doc, text_doc("XY"));

        // Opposite application order converges to the same string.
        let mut doc = text_doc("");
        apply_op(&mut doc, &y).unwrap();
        apply_op(&mut doc, &transform_op(&x, &y)).unwrap();
        assert_eq!(doc, text_doc("XY"));
    }

    #[test]
    fn insert_inside_concurrent_delete_snaps_to_start() {
        let mut doc = text_doc("hello");
        let del = delete("c1", 100, 1, 3);
        let ins = insert("c2", 101, 3, "X");

        apply_op(&mut doc, &del).unwrap();
        assert_eq!(doc, text_doc("ho"));

        let ins2 = transform_op(&ins, &del);
        match &ins2.kind {
            OperationKind::TextInsert { position, .. } => assert_eq!(*position, 1),
            other => panic!("unexpected kind {other:?}"),
        }
        apply_op(&mut doc, &ins2).unwrap();
        assert_eq!(doc, text_doc("hXo"));
    }

    #[test]
    fn overlapping_deletes_keep_residual() {
        let mut doc = text_doc("abcdef");
        let first = delete("c1", 100, 1, 3);
        let second = delete("c2", 101, 2, 3);

        apply_op(&mut doc, &first).unwrap();
        assert_eq!(doc, text_doc("aef"));

        let second2 = transform_op(&second, &first);
        assert_eq!(
            second2.kind,
            OperationKind::TextDelete {
                position: 1,
                length: 1
            }
        );
        apply_op(&mut doc, &second2).unwrap();
        assert_eq!(doc, text_doc("af"));
    }

    #[test]
    fn fully_covered_delete_becomes_noop() {
        let small = delete("c1", 100, 2, 1);
        let big = delete("c2", 99, 1, 4);
        let transformed = transform_op(&small, &big);
        assert!(transformed.is_noop());
    }

    #[test]
    fn insert_inside_delete_grows_the_delete() {
        let del = delete("c1", 100, 1, 3);
        let ins = insert("c2", 101, 2, "xy");
        let del2 = transform_op(&del, &ins);
        assert_eq!(
            del2.kind,
            OperationKind::TextDelete {
                position: 1,
                length: 5
            }
        );
    }

    #[test]
    fn char_positions_not_bytes() {
        let mut doc = text_doc("héllo");
        let del = delete("c1", 1, 1, 2);
        apply_op(&mut doc, &del).unwrap();
        assert_eq!(doc, text_doc("hlo"));
    }

    #[test]
    fn apply_rejects_out_of_range() {
        let mut doc = text_doc("ab");
        assert!(apply_op(&mut doc, &insert("c1", 1, 3, "x")).is_err());
        assert!(apply_op(&mut doc, &delete("c1", 1, 1, 2)).is_err());
        // Failed application leaves the value untouched.
        assert_eq!(doc, text_doc("ab"));
    }

    #[test]
    fn adjacent_inserts_compose() {
        let first = insert("c1", 100, 3, "ab");
        let second = insert("c1", 101, 5, "cd");
        let merged = compose(&first, &second).expect("mergeable");
        assert_eq!(
            merged.kind,
            OperationKind::TextInsert {
                position: 3,
                text: "abcd".into(),
                attributes: None,
            }
        );
        assert_eq!(merged.timestamp, 101);
        assert_eq!(merged.id, first.id);

        // Applying the merged op equals applying both in sequence.
        let mut stepwise = text_doc("xyz");
        apply_op(&mut stepwise, &first).unwrap();
        apply_op(&mut stepwise, &second).unwrap();
        let mut composed = text_doc("xyz");
        apply_op(&mut composed, &merged).unwrap();
        assert_eq!(stepwise, composed);
    }

    #[test]
    fn same_position_deletes_compose() {
        let first = delete("c1", 100, 3, 2);
        let second = delete("c1", 101, 3, 4);
        let merged = compose(&first, &second).expect("mergeable");
        assert_eq!(
            merged.kind,
            OperationKind::TextDelete {
                position: 3,
                length: 6
            }
        );

        let mut stepwise = text_doc("abcdefghij");
        apply_op(&mut stepwise, &first).unwrap();
        apply_op(&mut stepwise, &second).unwrap();
        let mut composed = text_doc("abcdefghij");
        apply_op(&mut composed, &merged).unwrap();
        assert_eq!(stepwise, composed);
        assert_eq!(stepwise, text_doc("abcj"));
    }

    #[test]
    fn cross_author_operations_never_compose() {
        let first = insert("c1", 100, 3, "ab");
        let second = insert("c2", 101, 5, "cd");
        assert!(compose(&first, &second).is_none());
    }

    #[test]
    fn conflict_is_range_overlap() {
        let a = delete("c1", 1, 1, 3);
        let b = insert("c2", 2, 2, "x");
        assert!(crate::conflicts(&a, &b));

        let far = insert("c2", 2, 4, "x");
        assert!(!crate::conflicts(&a, &far));

        let same_point = insert("c2", 2, 1, "y");
        let other_point = insert("c3", 3, 1, "z");
        assert!(crate::conflicts(&same_point, &other_point));
    }

    #[test]
    fn retain_transform_is_identity() {
        let retain = op(
            "c1",
            100,
            0,
            OperationKind::TextRetain {
                position: 0,
                length: 3,
                attributes: None,
            },
        );
        let ins = insert("c2", 101, 0, "x");
        assert_eq!(transform_op(&retain, &ins).kind, retain.kind);
        assert_eq!(transform_op(&ins, &retain).kind, ins.kind);
    }

    #[test]
    fn overlapping_retain_attributes_last_writer_wins() {
        let mut early = serde_json::Map::new();
        early.insert("bold".into(), serde_json::json!(true));
        early.insert("color".into(), serde_json::json!("red"));
        let mut late = serde_json::Map::new();
        late.insert("color".into(), serde_json::json!("blue"));

        let a = op(
            "c1",
            100,
            0,
            OperationKind::TextRetain {
                position: 0,
                length: 4,
                attributes: Some(early),
            },
        );
        let b = op(
            "c2",
            200,
            0,
            OperationKind::TextRetain {
                position: 2,
                length: 4,
                attributes: Some(late),
            },
        );

        // The later writer owns "color"; "bold" survives on the earlier op.
        let a2 = transform_op(&a, &b);
        match &a2.kind {
            OperationKind::TextRetain {
                attributes: Some(attrs),
                ..
            } => {
                assert!(attrs.contains_key("bold"));
                assert!(!attrs.contains_key("color"));
            }
            other => panic!("unexpected kind {other:?}"),
        }

        // The later writer keeps its keys no matter the order it transforms.
        let b2 = transform_op(&b, &a);
        match &b2.kind {
            OperationKind::TextRetain {
                attributes: Some(attrs),
                ..
            } => assert!(attrs.contains_key("color")),
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
