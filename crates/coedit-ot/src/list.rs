//! List operation algebra
//!
//! Mirrors the text rules with item counts in place of char lengths.
//! `list-move(s, t)` is an atomic relocation: concurrent operations see the
//! index mapping `s -> t`, with the displaced span shifting by one.

use crate::text::ranges_overlap;
use crate::OtError;
use coedit_protocol::{Operation, OperationKind};
use serde_json::Value;

/// Where an item reference lands after `move(s, t)` has been applied.
fn map_item_index(i: usize, s: usize, t: usize) -> usize {
    if i == s {
        t
    } else if s < t && i > s && i <= t {
        i - 1
    } else if s > t && i >= t && i < s {
        i + 1
    } else {
        i
    }
}

/// Where an insertion point lands after `move(s, t)` has been applied.
fn map_insert_point(p: usize, s: usize, t: usize) -> usize {
    if s < t && p > s && p <= t {
        p - 1
    } else if s > t && p >= t && p < s {
        p + 1
    } else {
        p
    }
}

fn affected_range(kind: &OperationKind) -> Option<(usize, usize)> {
    match kind {
        OperationKind::ListInsert { index, .. } => Some((*index, *index)),
        OperationKind::ListDelete { index, count } => Some((*index, index + count)),
        OperationKind::ListReplace { index, .. } => Some((*index, index + 1)),
        OperationKind::ListMove {
            index,
            target_index,
        } => Some((
            *index.min(target_index),
            index.max(target_index) + 1,
        )),
        _ => None,
    }
}

pub(crate) fn conflicts(a: &OperationKind, b: &OperationKind) -> bool {
    match (affected_range(a), affected_range(b)) {
        (Some(ra), Some(rb)) => ranges_overlap(ra, rb),
        _ => false,
    }
}

pub(crate) fn transform(a: &Operation, b: &Operation) -> Operation {
    match (&a.kind, &b.kind) {
        (
            OperationKind::ListInsert { index: ia, item },
            OperationKind::ListInsert { index: ib, .. },
        ) => {
            let shift = ia > ib || (ia == ib && a.author_order() > b.author_order());
            if shift {
                a.with_kind(OperationKind::ListInsert {
                    index: ia + 1,
                    item: item.clone(),
                })
            } else {
                a.clone()
            }
        }
        (
            OperationKind::ListInsert { index: ia, item },
            OperationKind::ListDelete {
                index: ib,
                count: cb,
            },
        ) => {
            let index = if *ia <= *ib {
                *ia
            } else if *ia >= ib + cb {
                ia - cb
            } else {
                *ib
            };
            a.with_kind(OperationKind::ListInsert {
                index,
                item: item.clone(),
            })
        }
        (
            OperationKind::ListInsert { index, item },
            OperationKind::ListMove {
                index: s,
                target_index: t,
            },
        ) => a.with_kind(OperationKind::ListInsert {
            index: map_insert_point(*index, *s, *t),
            item: item.clone(),
        }),

        (
            OperationKind::ListDelete {
                index: ia,
                count: ca,
            },
            OperationKind::ListInsert { index: ib, .. },
        ) => {
            if *ib <= *ia {
                a.with_kind(OperationKind::ListDelete {
                    index: ia + 1,
                    count: *ca,
                })
            } else if *ib >= ia + ca {
                a.clone()
            } else {
                a.with_kind(OperationKind::ListDelete {
                    index: *ia,
                    count: ca + 1,
                })
            }
        }
        (
            OperationKind::ListDelete {
                index: ia,
                count: ca,
            },
            OperationKind::ListDelete {
                index: ib,
                count: cb,
            },
        ) => {
            let (a_start, a_end) = (*ia, ia + ca);
            let (b_start, b_end) = (*ib, ib + cb);
            if b_end <= a_start {
                a.with_kind(OperationKind::ListDelete {
                    index: ia - cb,
                    count: *ca,
                })
            } else if b_start >= a_end {
                a.clone()
            } else {
                let overlap = a_end.min(b_end) - a_start.max(b_start);
                let count = ca - overlap;
                if count == 0 {
                    a.with_kind(OperationKind::Noop)
                } else {
                    a.with_kind(OperationKind::ListDelete {
                        index: a_start.min(b_start),
                        count,
                    })
                }
            }
        }
        (
            OperationKind::ListDelete {
                index: ia,
                count: ca,
            },
            OperationKind::ListMove {
                index: s,
                target_index: t,
            },
        ) => {
            let index = if *ca == 1 {
                map_item_index(*ia, *s, *t)
            } else {
                map_insert_point(*ia, *s, *t)
            };
            a.with_kind(OperationKind::ListDelete { index, count: *ca })
        }

        (
            OperationKind::ListReplace {
                index: ia,
                item,
                old_item,
            },
            OperationKind::ListInsert { index: ib, .. },
        ) => {
            if *ib <= *ia {
                a.with_kind(OperationKind::ListReplace {
                    index: ia + 1,
                    item: item.clone(),
                    old_item: old_item.clone(),
                })
            } else {
                a.clone()
            }
        }
        (
            OperationKind::ListReplace {
                index: ia,
                item,
                old_item,
            },
            OperationKind::ListDelete {
                index: ib,
                count: cb,
            },
        ) => {
            if *ia < *ib {
                a.clone()
            } else if *ia >= ib + cb {
                a.with_kind(OperationKind::ListReplace {
                    index: ia - cb,
                    item: item.clone(),
                    old_item: old_item.clone(),
                })
            } else {
                // The replaced item was deleted underneath.
                a.with_kind(OperationKind::Noop)
            }
        }
        (
            OperationKind::ListReplace {
                index: ia, item, ..
            },
            OperationKind::ListReplace {
                index: ib,
                item: item_b,
                ..
            },
        ) => {
            if ia != ib {
                a.clone()
            } else if a.author_order() > b.author_order() {
                // Later author wins; the current item is b's.
                a.with_kind(OperationKind::ListReplace {
                    index: *ia,
                    item: item.clone(),
                    old_item: Some(item_b.clone()),
                })
            } else {
                a.with_kind(OperationKind::Noop)
            }
        }
        (
            OperationKind::ListReplace {
                index,
                item,
                old_item,
            },
            OperationKind::ListMove {
                index: s,
                target_index: t,
            },
        ) => a.with_kind(OperationKind::ListReplace {
            index: map_item_index(*index, *s, *t),
            item: item.clone(),
            old_item: old_item.clone(),
        }),

        (
            OperationKind::ListMove {
                index: sa,
                target_index: ta,
            },
            OperationKind::ListInsert { index: ib, .. },
        ) => {
            let source = if *ib <= *sa { sa + 1 } else { *sa };
            // The target is an index in the list with the source already
            // spliced out, so map the insert into those coordinates first.
            // At a tie the moved item stays in front of the inserted one.
            let ib_post = if *sa < *ib { ib - 1 } else { *ib };
            let target = if ib_post < *ta { ta + 1 } else { *ta };
            normalize_move(a, source, target)
        }
        (
            OperationKind::ListMove {
                index: sa,
                target_index: ta,
            },
            OperationKind::ListDelete {
                index: ib,
                count: cb,
            },
        ) => {
            if *sa >= *ib && *sa < ib + cb {
                // Source item deleted concurrently.
                return a.with_kind(OperationKind::Noop);
            }
            let source = if *sa >= ib + cb { sa - cb } else { *sa };
            // Map the deleted range into source-removed coordinates before
            // shifting the target landing point.
            let ib_post = if *sa < *ib { ib - 1 } else { *ib };
            let target = if *ta <= ib_post {
                *ta
            } else if *ta >= ib_post + cb {
                ta - cb
            } else {
                ib_post
            };
            normalize_move(a, source, target)
        }
        (
            OperationKind::ListMove {
                index: sa,
                target_index: ta,
            },
            OperationKind::ListMove {
                index: sb,
                target_index: tb,
            },
        ) => {
            if sa == sb {
                if a.author_order() > b.author_order() {
                    // b already relocated the item to tb; a re-moves it.
                    normalize_move(a, *tb, map_insert_point(*ta, *sb, *tb))
                } else {
                    a.with_kind(OperationKind::Noop)
                }
            } else {
                normalize_move(
                    a,
                    map_item_index(*sa, *sb, *tb),
                    map_insert_point(*ta, *sb, *tb),
                )
            }
        }

        _ => a.clone(),
    }
}

fn normalize_move(a: &Operation, source: usize, target: usize) -> Operation {
    if source == target {
        a.with_kind(OperationKind::Noop)
    } else {
        a.with_kind(OperationKind::ListMove {
            index: source,
            target_index: target,
        })
    }
}

pub(crate) fn apply(items: &mut Vec<Value>, kind: &OperationKind) -> Result<(), OtError> {
    match kind {
        OperationKind::ListInsert { index, item } => {
            if *index > items.len() {
                return Err(OtError::range("list-insert index"));
            }
            items.insert(*index, item.clone());
            Ok(())
        }
        OperationKind::ListDelete { index, count } => {
            if index + count > items.len() {
                return Err(OtError::range("list-delete range"));
            }
            items.drain(*index..index + count);
            Ok(())
        }
        OperationKind::ListReplace { index, item, .. } => {
            if *index >= items.len() {
                return Err(OtError::range("list-replace index"));
            }
            items[*index] = item.clone();
            Ok(())
        }
        OperationKind::ListMove {
            index,
            target_index,
        } => {
            if *index >= items.len() || *target_index >= items.len() {
                return Err(OtError::range("list-move index"));
            }
            let item = items.remove(*index);
            items.insert(*target_index, item);
            Ok(())
        }
        other => Err(OtError::InvalidOperation(format!(
            "{} is not a list operation",
            other.tag()
        ))),
    }
}
