//! The apply layer: executes a merged flush plan against the shared
//! document, inside the scheduler's tagged transaction.
//!
//! Sequence sets carry the two insertion strategies:
//!
//! - contiguous head/tail batches coalesce into a single ranged insert when
//!   every item is a scalar (containers are created through prelims one
//!   call each, so mixed batches do not coalesce);
//! - everything else goes through the tail cursor: indices at or past the
//!   start-of-batch length, past the first delete, or past the current
//!   length append sequentially; in-bounds indices insert at their clamped
//!   position.

use std::collections::{BTreeMap, BTreeSet};

use yrs::{Any, Array, ArrayRef, In, Map, MapRef, Out, TransactionMut};

use crate::convert::value_to_prelim;
use crate::error::SyncError;
use crate::scheduler::{ListEntry, MapSetEntry, UpgradeCallback};
use crate::shared::SharedContainer;

/// Pending key deletions for one map.
pub(crate) struct MapDeleteWork {
    pub target: MapRef,
    pub keys: Vec<String>,
}

/// Pending key writes for one map.
pub(crate) struct MapSetWork {
    pub target: MapRef,
    pub entries: Vec<(String, MapSetEntry)>,
}

/// The merged sequence plan for one target.
pub(crate) struct SequenceWork {
    pub target: ArrayRef,
    pub replaces: BTreeMap<u32, ListEntry>,
    pub deletes: BTreeSet<u32>,
    pub sets: BTreeMap<u32, ListEntry>,
}

impl SequenceWork {
    pub fn new(target: ArrayRef) -> Self {
        Self {
            target,
            replaces: BTreeMap::new(),
            deletes: BTreeSet::new(),
            sets: BTreeMap::new(),
        }
    }
}

/// Delete every still-present key in each map bucket.
pub(crate) fn apply_map_deletes(
    txn: &mut TransactionMut<'_>,
    work: Vec<MapDeleteWork>,
) -> Result<(), SyncError> {
    for bucket in work {
        for key in bucket.keys {
            if bucket.target.contains_key(txn, &key) {
                let _ = bucket.target.remove(txn, &key);
            }
        }
    }
    Ok(())
}

/// Convert and write each map entry, queueing the upgrade callback with the
/// final shared value, then request a structural finalize on the map.
pub(crate) fn apply_map_sets(
    txn: &mut TransactionMut<'_>,
    work: Vec<MapSetWork>,
    callbacks: &mut Vec<(UpgradeCallback, Out)>,
    finalize: &mut Vec<SharedContainer>,
) -> Result<(), SyncError> {
    for bucket in work {
        for (key, entry) in bucket.entries {
            let prelim = value_to_prelim(&entry.value)?;
            let _ = bucket.target.insert(txn, key.clone(), prelim);
            if let Some(callback) = entry.callback {
                if let Some(out) = bucket.target.get(txn, &key) {
                    callbacks.push((callback, out));
                }
            }
        }
        finalize.push(SharedContainer::Map(bucket.target));
    }
    Ok(())
}

/// Execute one sequence batch: replaces in descending index order, then
/// pure deletes in descending order, then pure sets.
pub(crate) fn apply_sequences(
    txn: &mut TransactionMut<'_>,
    work: Vec<SequenceWork>,
    callbacks: &mut Vec<(UpgradeCallback, Out)>,
    finalize: &mut Vec<SharedContainer>,
) -> Result<(), SyncError> {
    for batch in work {
        apply_one_sequence(txn, batch, callbacks, finalize)?;
    }
    Ok(())
}

fn apply_one_sequence(
    txn: &mut TransactionMut<'_>,
    batch: SequenceWork,
    callbacks: &mut Vec<(UpgradeCallback, Out)>,
    finalize: &mut Vec<SharedContainer>,
) -> Result<(), SyncError> {
    let target = batch.target;
    let start_len = target.len(txn);
    let first_delete = batch.deletes.iter().next().copied();

    // Replaces, descending so later deletions do not shift earlier indices.
    let mut replaces: Vec<(u32, ListEntry)> = batch.replaces.into_iter().collect();
    replaces.reverse();
    for (index, entry) in replaces {
        let prelim = value_to_prelim(&entry.value)?;
        let len = target.len(txn);
        let position = if index < len {
            target.remove_range(txn, index, 1);
            index.min(target.len(txn))
        } else {
            // Defensive: the scheduler demotes these, but clamp anyway.
            index.min(len)
        };
        let _ = target.insert(txn, position, prelim);
        if let Some(callback) = entry.callback {
            if let Some(out) = target.get(txn, position) {
                callbacks.push((callback, out));
            }
        }
    }

    // Pure deletes, descending.
    for &index in batch.deletes.iter().rev() {
        if index < target.len(txn) {
            target.remove_range(txn, index, 1);
        }
    }

    // Pure sets.
    if !batch.sets.is_empty() {
        apply_sequence_sets(txn, &target, batch.sets, start_len, first_delete, callbacks)?;
    }

    finalize.push(SharedContainer::List(target));
    Ok(())
}

fn apply_sequence_sets(
    txn: &mut TransactionMut<'_>,
    target: &ArrayRef,
    sets: BTreeMap<u32, ListEntry>,
    start_len: u32,
    first_delete: Option<u32>,
    callbacks: &mut Vec<(UpgradeCallback, Out)>,
) -> Result<(), SyncError> {
    let entries: Vec<(u32, ListEntry)> = sets.into_iter().collect();
    let indices: Vec<u32> = entries.iter().map(|(index, _)| *index).collect();
    let len = target.len(txn);

    let contiguous = indices.windows(2).all(|pair| pair[1] == pair[0] + 1);
    let head = contiguous && indices[0] == 0;
    let tail = contiguous && indices[0] == len;

    if head || tail {
        let at = indices[0].min(len);
        return bulk_insert(txn, target, at, entries, callbacks);
    }

    // Tail-cursor strategy: indices that cannot land in-bounds append
    // sequentially at the end.
    let mut tail_cursor = target.len(txn);
    for (index, entry) in entries {
        let prelim = value_to_prelim(&entry.value)?;
        let len_now = target.len(txn);
        let append = index >= start_len
            || first_delete.is_some_and(|first| index >= first)
            || index >= len_now;
        let position = if append {
            let position = tail_cursor.min(len_now);
            tail_cursor += 1;
            position
        } else {
            index.min(len_now)
        };
        let _ = target.insert(txn, position, prelim);
        if let Some(callback) = entry.callback {
            if let Some(out) = target.get(txn, position) {
                callbacks.push((callback, out));
            }
        }
    }
    Ok(())
}

/// Insert a contiguous batch starting at `at`. All-scalar batches coalesce
/// into a single ranged insert; batches with containers insert one by one.
fn bulk_insert(
    txn: &mut TransactionMut<'_>,
    target: &ArrayRef,
    at: u32,
    entries: Vec<(u32, ListEntry)>,
    callbacks: &mut Vec<(UpgradeCallback, Out)>,
) -> Result<(), SyncError> {
    let mut prelims: Vec<(In, Option<UpgradeCallback>)> = Vec::with_capacity(entries.len());
    for (_, entry) in entries {
        prelims.push((value_to_prelim(&entry.value)?, entry.callback));
    }

    let all_scalars = prelims.iter().all(|(prelim, _)| matches!(prelim, In::Any(_)));
    if all_scalars {
        let scalars: Vec<Any> = prelims
            .iter()
            .filter_map(|(prelim, _)| match prelim {
                In::Any(any) => Some(any.clone()),
                _ => None,
            })
            .collect();
        let count = scalars.len() as u32;
        target.insert_range(txn, at, scalars);
        for (offset, (_, callback)) in prelims.into_iter().enumerate() {
            if let Some(callback) = callback {
                if let Some(out) = target.get(txn, at + offset as u32) {
                    callbacks.push((callback, out));
                }
            }
        }
        debug_assert!(at + count <= target.len(txn));
    } else {
        for (offset, (prelim, callback)) in prelims.into_iter().enumerate() {
            let position = at + offset as u32;
            let _ = target.insert(txn, position, prelim);
            if let Some(callback) = callback {
                if let Some(out) = target.get(txn, position) {
                    callbacks.push((callback, out));
                }
            }
        }
    }
    Ok(())
}
