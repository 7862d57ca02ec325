//! The write scheduler.
//!
//! Local writes enqueue into per-target dedup maps and are committed at an
//! explicit commit point ([`crate::DocMirror::flush`]), the host's stand-in
//! for a microtask. One flush runs the whole pipeline over the batch:
//!
//! 1. temporal merge of sequence ops by sequence number (push+pop cancels,
//!    a delete over an older set promotes to a replace, a delete over an
//!    existing replace is redundant),
//! 2. demotion of out-of-bounds replaces to plain sets,
//! 3. purge of every pending op targeting a subtree that a replace or
//!    delete will detach in this same flush,
//! 4. removal of sets made redundant by replaces,
//! 5. empty-batch short-circuit,
//! 6. a single document transaction tagged with the mirror's origin,
//!    applying map deletes, then map sets, then sequence operations,
//! 7. the post-transaction callback queue, run under the reconciling lock,
//!    followed by the structural finalize reconciles the apply layer
//!    requested.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tracing::{debug, trace};
use yrs::branch::BranchID;
use yrs::{Array, ArrayRef, Map, MapRef, Out, ReadTxn, Transact};

use crate::apply::{self, MapDeleteWork, MapSetWork, SequenceWork};
use crate::error::{ApplyBucket, TransactionError};
use crate::mirror::MirrorCore;
use crate::reactive::value_meta;
use crate::reconcile;
use crate::shared::{branch_id, SharedContainer};
use crate::value::Value;

/// Runs after the flush transaction closes, under the reconciling lock,
/// with the final shared value the apply layer produced for the op.
pub(crate) type UpgradeCallback = Box<dyn FnOnce(&Out) + Send>;

/// A pending map set for one key.
pub(crate) struct MapSetEntry {
    pub value: Value,
    pub callback: Option<UpgradeCallback>,
}

/// A pending sequence set or replace for one index.
pub(crate) struct ListEntry {
    pub value: Value,
    pub callback: Option<UpgradeCallback>,
    pub seq: u64,
}

struct MapSetBucket {
    target: MapRef,
    entries: IndexMap<String, MapSetEntry>,
}

struct MapDeleteBucket {
    target: MapRef,
    keys: IndexSet<String>,
}

struct ListBucket {
    target: ArrayRef,
    entries: BTreeMap<u32, ListEntry>,
}

struct ListDeleteBucket {
    target: ArrayRef,
    entries: BTreeMap<u32, u64>,
}

#[derive(Default)]
struct SchedulerInner {
    map_sets: HashMap<BranchID, MapSetBucket>,
    map_deletes: HashMap<BranchID, MapDeleteBucket>,
    list_sets: HashMap<BranchID, ListBucket>,
    list_deletes: HashMap<BranchID, ListDeleteBucket>,
    list_replaces: HashMap<BranchID, ListBucket>,
    /// Controllers displaced by local writes; evicted post-flush once the
    /// flush confirms their containers left the document. (The original
    /// model leans on GC-weak caches here; explicit eviction needs the
    /// explicit hook.)
    retired: Vec<Value>,
    next_seq: u64,
}

impl SchedulerInner {
    fn is_empty(&self) -> bool {
        self.map_sets.is_empty()
            && self.map_deletes.is_empty()
            && self.list_sets.is_empty()
            && self.list_deletes.is_empty()
            && self.list_replaces.is_empty()
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Step 1: temporal merge of sequence ops, per target, by sequence
    /// number.
    fn merge_sequences(&mut self) {
        let targets: Vec<BranchID> = self.list_deletes.keys().cloned().collect();
        for id in targets {
            let Some(delete_bucket) = self.list_deletes.get_mut(&id) else {
                continue;
            };
            let deletes: Vec<(u32, u64)> =
                delete_bucket.entries.iter().map(|(&i, &s)| (i, s)).collect();
            let target = delete_bucket.target.clone();

            for (index, delete_seq) in deletes {
                let pending_set_seq = self
                    .list_sets
                    .get(&id)
                    .and_then(|bucket| bucket.entries.get(&index))
                    .map(|entry| entry.seq);

                if let Some(set_seq) = pending_set_seq {
                    let removed_entry = self
                        .list_sets
                        .get_mut(&id)
                        .and_then(|bucket| bucket.entries.remove(&index));
                    if set_seq >= delete_seq {
                        // Splice pattern: the newer set survives the delete
                        // as a replace. (An older set cancels against the
                        // delete instead: push followed by pop.)
                        if let Some(entry) = removed_entry {
                            let replace_bucket = self
                                .list_replaces
                                .entry(id.clone())
                                .or_insert_with(|| ListBucket {
                                    target: target.clone(),
                                    entries: BTreeMap::new(),
                                });
                            keep_newer(&mut replace_bucket.entries, index, entry);
                        }
                    }
                    if self
                        .list_sets
                        .get(&id)
                        .is_some_and(|bucket| bucket.entries.is_empty())
                    {
                        let _ = self.list_sets.remove(&id);
                    }
                    remove_delete(&mut self.list_deletes, &id, index);
                } else if let Some(replace_seq) = self
                    .list_replaces
                    .get(&id)
                    .and_then(|bucket| bucket.entries.get(&index))
                    .map(|entry| entry.seq)
                {
                    if replace_seq > delete_seq {
                        // The newer replace already deletes at this index;
                        // the delete was its first half.
                        remove_delete(&mut self.list_deletes, &id, index);
                    } else {
                        // The delete came after the replace: the net effect
                        // is deleting the original element.
                        if let Some(bucket) = self.list_replaces.get_mut(&id) {
                            let _ = bucket.entries.remove(&index);
                            if bucket.entries.is_empty() {
                                let _ = self.list_replaces.remove(&id);
                            }
                        }
                    }
                }
            }
        }

        // Set/replace conflicts at the same index: the newer op wins.
        let targets: Vec<BranchID> = self.list_replaces.keys().cloned().collect();
        for id in targets {
            let Some(replace_bucket) = self.list_replaces.get_mut(&id) else {
                continue;
            };
            let Some(set_bucket) = self.list_sets.get_mut(&id) else {
                continue;
            };
            let indices: Vec<u32> = replace_bucket
                .entries
                .keys()
                .filter(|index| set_bucket.entries.contains_key(index))
                .copied()
                .collect();
            for index in indices {
                let replace_seq = replace_bucket.entries[&index].seq;
                let set_seq = set_bucket.entries[&index].seq;
                if set_seq > replace_seq {
                    let _ = replace_bucket.entries.remove(&index);
                } else {
                    let _ = set_bucket.entries.remove(&index);
                }
            }
            if set_bucket.entries.is_empty() {
                let _ = self.list_sets.remove(&id);
            }
            if replace_bucket.entries.is_empty() {
                let _ = self.list_replaces.remove(&id);
            }
        }
    }

    /// Step 2: a replace at an index past the current sequence length
    /// cannot delete-then-insert; rewrite it as a plain set.
    fn demote_out_of_bounds<T: ReadTxn>(&mut self, txn: &T) {
        let targets: Vec<BranchID> = self.list_replaces.keys().cloned().collect();
        for id in targets {
            let Some(replace_bucket) = self.list_replaces.get_mut(&id) else {
                continue;
            };
            let len = replace_bucket.target.len(txn);
            let out_of_bounds: Vec<u32> = replace_bucket
                .entries
                .keys()
                .filter(|&&index| index >= len)
                .copied()
                .collect();
            if out_of_bounds.is_empty() {
                continue;
            }
            let target = replace_bucket.target.clone();
            for index in out_of_bounds {
                if let Some(entry) = replace_bucket.entries.remove(&index) {
                    trace!(index, "demoting out-of-bounds replace to set");
                    let set_bucket =
                        self.list_sets
                            .entry(id.clone())
                            .or_insert_with(|| ListBucket {
                                target: target.clone(),
                                entries: BTreeMap::new(),
                            });
                    keep_newer(&mut set_bucket.entries, index, entry);
                }
            }
            if replace_bucket.entries.is_empty() {
                let _ = self.list_replaces.remove(&id);
            }
        }
    }

    /// Step 3: no op may target a container that a replace or delete in
    /// this same flush will detach. Walk each doomed child subtree and
    /// sweep every pending bucket keyed inside it.
    fn purge_doomed_subtrees<T: ReadTxn>(&mut self, txn: &T) {
        let mut doomed: HashSet<BranchID> = HashSet::new();

        for bucket in self.list_replaces.values() {
            for &index in bucket.entries.keys() {
                if let Some(out) = bucket.target.get(txn, index) {
                    collect_subtree_ids(txn, &out, &mut doomed);
                }
            }
        }
        for bucket in self.list_deletes.values() {
            for &index in bucket.entries.keys() {
                if let Some(out) = bucket.target.get(txn, index) {
                    collect_subtree_ids(txn, &out, &mut doomed);
                }
            }
        }

        if doomed.is_empty() {
            return;
        }
        trace!(count = doomed.len(), "purging ops under doomed subtrees");
        self.map_sets.retain(|id, _| !doomed.contains(id));
        self.map_deletes.retain(|id, _| !doomed.contains(id));
        self.list_sets.retain(|id, _| !doomed.contains(id));
        self.list_deletes.retain(|id, _| !doomed.contains(id));
        self.list_replaces.retain(|id, _| !doomed.contains(id));
    }

    /// Step 4: a set at an index that also carries a replace is redundant.
    fn drop_redundant_sets(&mut self) {
        let targets: Vec<BranchID> = self.list_replaces.keys().cloned().collect();
        for id in targets {
            let Some(replace_bucket) = self.list_replaces.get(&id) else {
                continue;
            };
            let replaced: Vec<u32> = replace_bucket.entries.keys().copied().collect();
            if let Some(set_bucket) = self.list_sets.get_mut(&id) {
                for index in replaced {
                    let _ = set_bucket.entries.remove(&index);
                }
                if set_bucket.entries.is_empty() {
                    let _ = self.list_sets.remove(&id);
                }
            }
        }
    }

    fn op_count(&self) -> usize {
        self.map_sets.values().map(|b| b.entries.len()).sum::<usize>()
            + self.map_deletes.values().map(|b| b.keys.len()).sum::<usize>()
            + self.list_sets.values().map(|b| b.entries.len()).sum::<usize>()
            + self.list_deletes.values().map(|b| b.entries.len()).sum::<usize>()
            + self.list_replaces.values().map(|b| b.entries.len()).sum::<usize>()
    }
}

fn keep_newer(entries: &mut BTreeMap<u32, ListEntry>, index: u32, entry: ListEntry) {
    match entries.get(&index) {
        Some(existing) if existing.seq > entry.seq => {}
        _ => {
            let _ = entries.insert(index, entry);
        }
    }
}

fn remove_delete(
    deletes: &mut HashMap<BranchID, ListDeleteBucket>,
    id: &BranchID,
    index: u32,
) {
    if let Some(bucket) = deletes.get_mut(id) {
        let _ = bucket.entries.remove(&index);
        if bucket.entries.is_empty() {
            let _ = deletes.remove(id);
        }
    }
}

/// Collect the identities of every shared container in the subtree rooted
/// at `out`, including `out` itself.
fn collect_subtree_ids<T: ReadTxn>(txn: &T, out: &Out, acc: &mut HashSet<BranchID>) {
    match out {
        Out::YMap(map) => {
            let _ = acc.insert(branch_id(map));
            let keys: Vec<String> = map.keys(txn).map(|key| key.to_string()).collect();
            for key in keys {
                if let Some(child) = map.get(txn, &key) {
                    collect_subtree_ids(txn, &child, acc);
                }
            }
        }
        Out::YArray(list) => {
            let _ = acc.insert(branch_id(list));
            for index in 0..list.len(txn) {
                if let Some(child) = list.get(txn, index) {
                    collect_subtree_ids(txn, &child, acc);
                }
            }
        }
        Out::YText(text) => {
            let _ = acc.insert(branch_id(text));
        }
        _ => {}
    }
}

/// The per-mirror write queue and flush pipeline.
pub(crate) struct WriteScheduler {
    inner: Mutex<SchedulerInner>,
}

impl WriteScheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SchedulerInner::default()),
        }
    }

    /// True when no ops are pending.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Queue a map set. Cancels a pending delete of the same key.
    pub fn enqueue_map_set(
        &self,
        target: &MapRef,
        key: String,
        value: Value,
        callback: Option<UpgradeCallback>,
    ) {
        let id = branch_id(target);
        let mut inner = self.inner.lock();
        if let Some(bucket) = inner.map_deletes.get_mut(&id) {
            let _ = bucket.keys.shift_remove(&key);
            if bucket.keys.is_empty() {
                let _ = inner.map_deletes.remove(&id);
            }
        }
        let bucket = inner.map_sets.entry(id).or_insert_with(|| MapSetBucket {
            target: target.clone(),
            entries: IndexMap::new(),
        });
        let _ = bucket.entries.insert(key, MapSetEntry { value, callback });
    }

    /// Queue a map delete. Cancels a pending set of the same key.
    pub fn enqueue_map_delete(&self, target: &MapRef, key: String) {
        let id = branch_id(target);
        let mut inner = self.inner.lock();
        if let Some(bucket) = inner.map_sets.get_mut(&id) {
            let _ = bucket.entries.shift_remove(&key);
            if bucket.entries.is_empty() {
                let _ = inner.map_sets.remove(&id);
            }
        }
        let bucket = inner
            .map_deletes
            .entry(id)
            .or_insert_with(|| MapDeleteBucket {
                target: target.clone(),
                keys: IndexSet::new(),
            });
        let _ = bucket.keys.insert(key);
    }

    /// Queue a sequence set. Sequence ops do not cancel at enqueue time;
    /// the flush pipeline merges them by sequence number.
    pub fn enqueue_list_set(
        &self,
        target: &ArrayRef,
        index: u32,
        value: Value,
        callback: Option<UpgradeCallback>,
    ) {
        let id = branch_id(target);
        let mut inner = self.inner.lock();
        let seq = inner.next_seq();
        let bucket = inner.list_sets.entry(id).or_insert_with(|| ListBucket {
            target: target.clone(),
            entries: BTreeMap::new(),
        });
        let _ = bucket
            .entries
            .insert(index, ListEntry { value, callback, seq });
    }

    /// Queue a sequence replace (delete-then-insert at one index).
    pub fn enqueue_list_replace(
        &self,
        target: &ArrayRef,
        index: u32,
        value: Value,
        callback: Option<UpgradeCallback>,
    ) {
        let id = branch_id(target);
        let mut inner = self.inner.lock();
        let seq = inner.next_seq();
        let bucket = inner.list_replaces.entry(id).or_insert_with(|| ListBucket {
            target: target.clone(),
            entries: BTreeMap::new(),
        });
        let _ = bucket
            .entries
            .insert(index, ListEntry { value, callback, seq });
    }

    /// Queue a sequence delete.
    pub fn enqueue_list_delete(&self, target: &ArrayRef, index: u32) {
        let id = branch_id(target);
        let mut inner = self.inner.lock();
        let seq = inner.next_seq();
        let bucket = inner
            .list_deletes
            .entry(id)
            .or_insert_with(|| ListDeleteBucket {
                target: target.clone(),
                entries: BTreeMap::new(),
            });
        let _ = bucket.entries.insert(index, seq);
    }

    /// Remember a controller a local write displaced; the post-flush phase
    /// evicts it once the flush confirms its container left the document.
    pub fn retire(&self, value: Value) {
        self.inner.lock().retired.push(value);
    }

    /// Drop every pending op. Used at dispose.
    pub fn clear(&self) {
        *self.inner.lock() = SchedulerInner::default();
    }

    /// Run the flush pipeline over everything queued so far.
    pub fn flush(&self, core: &Arc<MirrorCore>) -> crate::Result<()> {
        let (map_delete_work, map_set_work, sequence_work, retired) = {
            let mut inner = self.inner.lock();
            if inner.is_empty() && inner.retired.is_empty() {
                return Ok(());
            }

            {
                let txn = core.doc.transact();
                inner.merge_sequences();
                inner.demote_out_of_bounds(&txn);
                inner.purge_doomed_subtrees(&txn);
                inner.drop_redundant_sets();
            }

            let retired = std::mem::take(&mut inner.retired);
            if inner.is_empty() {
                trace!("flush batch merged away entirely");
                (Vec::new(), Vec::new(), Vec::new(), retired)
            } else {
                debug!(ops = inner.op_count(), "flushing write batch");

                let map_delete_work: Vec<MapDeleteWork> = inner
                    .map_deletes
                    .drain()
                    .map(|(_, bucket)| MapDeleteWork {
                        target: bucket.target,
                        keys: bucket.keys.into_iter().collect(),
                    })
                    .collect();
                let map_set_work: Vec<MapSetWork> = inner
                    .map_sets
                    .drain()
                    .map(|(_, bucket)| MapSetWork {
                        target: bucket.target,
                        entries: bucket.entries.into_iter().collect(),
                    })
                    .collect();

                // Union the three sequence buckets per target.
                let mut sequences: HashMap<BranchID, SequenceWork> = HashMap::new();
                for (id, bucket) in inner.list_replaces.drain() {
                    let work = sequences
                        .entry(id)
                        .or_insert_with(|| SequenceWork::new(bucket.target.clone()));
                    work.replaces = bucket.entries;
                }
                for (id, bucket) in inner.list_deletes.drain() {
                    let work = sequences
                        .entry(id)
                        .or_insert_with(|| SequenceWork::new(bucket.target.clone()));
                    work.deletes = bucket.entries.into_keys().collect::<BTreeSet<u32>>();
                }
                for (id, bucket) in inner.list_sets.drain() {
                    let work = sequences
                        .entry(id)
                        .or_insert_with(|| SequenceWork::new(bucket.target.clone()));
                    work.sets = bucket.entries;
                }
                let sequence_work: Vec<SequenceWork> = sequences.into_values().collect();

                (map_delete_work, map_set_work, sequence_work, retired)
            }
        };

        let has_work =
            !(map_delete_work.is_empty() && map_set_work.is_empty() && sequence_work.is_empty());
        if !has_work && retired.is_empty() {
            return Ok(());
        }

        let mut callbacks: Vec<(UpgradeCallback, Out)> = Vec::new();
        let mut finalize: Vec<SharedContainer> = Vec::new();

        let apply_result: Result<(), TransactionError> = if has_work {
            let mut txn = core.doc.transact_mut_with(core.origin.clone());
            run_apply(
                &mut txn,
                map_delete_work,
                map_set_work,
                sequence_work,
                &mut callbacks,
                &mut finalize,
            )
        } else {
            Ok(())
        };

        // The transaction has committed (the document has no partial-abort);
        // run upgrades and finalize reconciles even after a bucket failure
        // so the reactive side re-syncs from whatever state the document
        // reached.
        {
            let _guard = core.state.begin_reconcile();
            for (callback, out) in callbacks {
                callback(&out);
            }
            for value in &retired {
                // Still parented means the write only shifted the node.
                let parentless = value_meta(value)
                    .is_some_and(|meta| meta.parent.read().is_none());
                if parentless {
                    reconcile::cleanup_removed(core, value);
                }
            }
            for target in dedup_targets(finalize) {
                let txn = core.doc.transact();
                reconcile::reconcile_container(core, &txn, &target)?;
            }
        }

        apply_result?;
        Ok(())
    }
}

/// Step 6: the three apply buckets, in order, each rethrown as a typed
/// transaction error naming the bucket.
fn run_apply(
    txn: &mut yrs::TransactionMut<'_>,
    map_deletes: Vec<MapDeleteWork>,
    map_sets: Vec<MapSetWork>,
    sequences: Vec<SequenceWork>,
    callbacks: &mut Vec<(UpgradeCallback, Out)>,
    finalize: &mut Vec<SharedContainer>,
) -> Result<(), TransactionError> {
    apply::apply_map_deletes(txn, map_deletes)
        .map_err(|err| TransactionError::wrap(ApplyBucket::MapDeletes, err))?;
    apply::apply_map_sets(txn, map_sets, callbacks, finalize)
        .map_err(|err| TransactionError::wrap(ApplyBucket::MapSets, err))?;
    apply::apply_sequences(txn, sequences, callbacks, finalize)
        .map_err(|err| TransactionError::wrap(ApplyBucket::SequenceOperations, err))?;
    Ok(())
}

fn dedup_targets(targets: Vec<SharedContainer>) -> Vec<SharedContainer> {
    let mut seen: HashSet<BranchID> = HashSet::new();
    targets
        .into_iter()
        .filter(|target| seen.insert(target.id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::Doc;

    fn scheduler_with_list() -> (Doc, ArrayRef, WriteScheduler) {
        let doc = Doc::new();
        let list = doc.get_or_insert_array("list");
        (doc, list, WriteScheduler::new())
    }

    fn merged(scheduler: &WriteScheduler, doc: &Doc) -> SchedulerInner {
        let mut inner = std::mem::take(&mut *scheduler.inner.lock());
        let txn = doc.transact();
        inner.merge_sequences();
        inner.demote_out_of_bounds(&txn);
        inner.purge_doomed_subtrees(&txn);
        inner.drop_redundant_sets();
        inner
    }

    #[test]
    fn push_then_pop_cancels_both_ops() {
        let (doc, list, scheduler) = scheduler_with_list();
        scheduler.enqueue_list_set(&list, 0, Value::from(1.0), None);
        scheduler.enqueue_list_delete(&list, 0);

        let inner = merged(&scheduler, &doc);
        assert!(inner.is_empty());
    }

    #[test]
    fn delete_then_set_promotes_to_replace() {
        let (doc, list, scheduler) = scheduler_with_list();
        {
            let mut txn = doc.transact_mut();
            list.insert_range(&mut txn, 0, [1.0, 2.0]);
        }
        scheduler.enqueue_list_delete(&list, 1);
        scheduler.enqueue_list_set(&list, 1, Value::from(9.0), None);

        let inner = merged(&scheduler, &doc);
        assert!(inner.list_deletes.is_empty());
        assert!(inner.list_sets.is_empty());
        let replaces: Vec<&ListBucket> = inner.list_replaces.values().collect();
        assert_eq!(replaces.len(), 1);
        assert!(replaces[0].entries.contains_key(&1));
    }

    #[test]
    fn delete_after_a_replace_supersedes_it() {
        let (doc, list, scheduler) = scheduler_with_list();
        {
            let mut txn = doc.transact_mut();
            list.insert_range(&mut txn, 0, [1.0]);
        }
        scheduler.enqueue_list_replace(&list, 0, Value::from(5.0), None);
        scheduler.enqueue_list_delete(&list, 0);

        // Replacing and then deleting nets out to deleting the original.
        let inner = merged(&scheduler, &doc);
        assert!(inner.list_replaces.is_empty());
        assert_eq!(inner.list_deletes.len(), 1);
    }

    #[test]
    fn delete_older_than_a_replace_is_redundant() {
        let (doc, list, scheduler) = scheduler_with_list();
        {
            let mut txn = doc.transact_mut();
            list.insert_range(&mut txn, 0, [1.0]);
        }
        scheduler.enqueue_list_delete(&list, 0);
        scheduler.enqueue_list_replace(&list, 0, Value::from(5.0), None);

        // The replace's first half is that delete; it survives alone.
        let inner = merged(&scheduler, &doc);
        assert!(inner.list_deletes.is_empty());
        assert_eq!(inner.list_replaces.len(), 1);
    }

    #[test]
    fn out_of_bounds_replace_demotes_to_set() {
        let (doc, list, scheduler) = scheduler_with_list();
        // The sequence is empty: index 3 cannot delete-then-insert.
        scheduler.enqueue_list_replace(&list, 3, Value::from(7.0), None);

        let inner = merged(&scheduler, &doc);
        assert!(inner.list_replaces.is_empty());
        let sets: Vec<&ListBucket> = inner.list_sets.values().collect();
        assert_eq!(sets.len(), 1);
        assert!(sets[0].entries.contains_key(&3));
    }

    #[test]
    fn map_set_and_delete_cancel_at_enqueue() {
        let doc = Doc::new();
        let map = doc.get_or_insert_map("map");
        let scheduler = WriteScheduler::new();

        scheduler.enqueue_map_delete(&map, "a".into());
        scheduler.enqueue_map_set(&map, "a".into(), Value::from(1.0), None);
        {
            let inner = scheduler.inner.lock();
            assert!(inner.map_deletes.is_empty());
            assert_eq!(inner.map_sets.len(), 1);
        }

        scheduler.enqueue_map_delete(&map, "a".into());
        {
            let inner = scheduler.inner.lock();
            assert!(inner.map_sets.is_empty());
            assert_eq!(inner.map_deletes.len(), 1);
        }
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let (_doc, list, scheduler) = scheduler_with_list();
        scheduler.enqueue_list_set(&list, 0, Value::Null, None);
        scheduler.enqueue_list_set(&list, 1, Value::Null, None);
        scheduler.enqueue_list_delete(&list, 0);

        let inner = scheduler.inner.lock();
        let set_bucket = inner.list_sets.values().next().expect("sets queued");
        let delete_bucket = inner.list_deletes.values().next().expect("delete queued");
        assert!(set_bucket.entries[&0].seq < set_bucket.entries[&1].seq);
        assert!(set_bucket.entries[&1].seq < delete_bucket.entries[&0]);
    }
}
