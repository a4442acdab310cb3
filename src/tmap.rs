use crate::bptree::BPTree;
use crate::comparator::{Comparator, Natural};
use crate::error::StmResult;
use crate::transaction::Transaction;
use crate::tvar::TVar;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

// Every key the map has ever been asked about owns a slot, a TVar holding
// Some(value) or None. The slots live in a copy-on-write B+ tree that only
// serves as a directory: sections never read or write the tree itself, they
// read and write slots. Two sections working on different keys therefore
// touch different cells and never conflict.
//
// A lookup of an absent key still creates its slot. A section that saw the
// key as absent has then read the slot, so a later insert of that key by
// someone else is a conflict like any other write after read.
//
// Slots a section creates are tentative. Once the section is over, committed
// or not, each of them that still holds None is retired and leaves the
// directory again, so neither aborted inserts nor lookups of absent keys
// make the directory grow. Slots emptied by a remove stay until `compact`.

type Slot<V> = TVar<Option<V>>;

/// A transactional ordered map.
///
/// Keys are unique and ordered by the map's comparator. All operations run
/// inside a section and see the committed state plus the section's own
/// writes.
///
/// ## Example:
/// ```
/// use stamp_stm::{atomically, TMap};
///
/// let rooms: TMap<u32, u32> = TMap::new();
/// atomically(|tx| {
///     assert!(rooms.insert(tx, 101, 2)?);
///     assert!(!rooms.insert(tx, 101, 5)?);
///     assert_eq!(rooms.find(tx, &101)?, Some(2));
///     Ok(())
/// });
///
/// let removed = atomically(|tx| rooms.remove(tx, &101));
/// assert!(removed);
/// assert_eq!(rooms.get_committed(&101), None);
/// ```
pub struct TMap<K, V, C = Natural> {
    slots: Arc<BPTree<K, Slot<V>, C>>,
}

impl<K, V> TMap<K, V, Natural>
where
    K: Ord + Clone + 'static,
    V: Any + Send + Sync + Clone,
{
    pub fn new() -> Self {
        Self::with_comparator(Natural)
    }
}

impl<K, V> Default for TMap<K, V, Natural>
where
    K: Ord + Clone + 'static,
    V: Any + Send + Sync + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C> TMap<K, V, C>
where
    K: Clone + 'static,
    V: Any + Send + Sync + Clone,
    C: Comparator<K> + 'static,
{
    pub fn with_comparator(cmp: C) -> Self {
        Self {
            slots: Arc::new(BPTree::with_comparator(cmp)),
        }
    }

    /// The value stored for `key`.
    pub fn find(&self, tx: &mut Transaction, key: &K) -> StmResult<Option<V>> {
        self.slot(tx, key).read(tx)
    }

    pub fn contains(&self, tx: &mut Transaction, key: &K) -> StmResult<bool> {
        Ok(self.find(tx, key)?.is_some())
    }

    /// Store `value` for `key` unless the key is present. Returns whether
    /// the value was stored.
    pub fn insert(&self, tx: &mut Transaction, key: K, value: V) -> StmResult<bool> {
        let slot = self.slot(tx, &key);
        if slot.read(tx)?.is_some() {
            return Ok(false);
        }
        slot.write(tx, Some(value))?;
        Ok(true)
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&self, tx: &mut Transaction, key: &K) -> StmResult<bool> {
        Ok(self.take(tx, key)?.is_some())
    }

    /// Remove `key`, returning its value.
    pub fn take(&self, tx: &mut Transaction, key: &K) -> StmResult<Option<V>> {
        let slot = self.slot(tx, key);
        let value = slot.read(tx)?;
        if value.is_some() {
            slot.write(tx, None)?;
        }
        Ok(value)
    }

    /// Store `value` for `key` whether or not it is present, returning the
    /// previous value.
    pub fn update(&self, tx: &mut Transaction, key: K, value: V) -> StmResult<Option<V>> {
        self.slot(tx, &key).replace(tx, Some(value))
    }

    /// Committed value for `key`, outside of any section.
    pub fn get_committed(&self, key: &K) -> Option<V> {
        self.slots.read().search(key).and_then(|slot| slot.read_atomic())
    }

    /// Number of committed entries. Only exact while no section commits.
    pub fn len_committed(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.read_atomic().is_some())
            .count()
    }

    /// Committed entries in key order. Only consistent while no section
    /// commits.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.slots
            .read()
            .iter()
            .filter_map(|(key, slot)| slot.read_atomic().map(|value| (key.clone(), value)))
            .collect()
    }

    /// Drop the slots of absent keys from the directory. Returns how many
    /// were dropped.
    ///
    /// Safe while sections run: a dropped slot is retired first, so a
    /// section that read it cannot commit and one that touches it later
    /// aborts and comes back to a fresh slot.
    pub fn compact(&self) -> usize {
        let mut write = self.slots.write();
        let retired: Vec<K> = write
            .iter()
            .filter(|(_, slot)| slot.is_retired() || slot.retire_if(Option::is_none))
            .map(|(key, _)| key.clone())
            .collect();
        for key in retired.iter() {
            write.remove(key);
        }
        let remaining = write.len();
        write.commit();
        debug!(dropped = retired.len(), remaining, "compacted map directory");
        retired.len()
    }

    /// Number of slots in the directory, present keys or not.
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    fn slot(&self, tx: &mut Transaction, key: &K) -> Slot<V> {
        if let Some(slot) = self.slots.read().search(key) {
            if !slot.is_retired() {
                return slot.clone();
            }
        }
        let slot = {
            let mut write = self.slots.write();
            if let Some(slot) = write.search(key) {
                if !slot.is_retired() {
                    return slot.clone();
                }
            }
            let slot = TVar::new(None);
            write.update(key.clone(), slot.clone());
            write.commit();
            slot
        };
        tx.on_commit(self.cleanup(key, &slot));
        tx.on_abort(self.cleanup(key, &slot));
        slot
    }

    fn cleanup(&self, key: &K, slot: &Slot<V>) -> impl FnOnce() + 'static {
        let slots = self.slots.clone();
        let key = key.clone();
        let slot = slot.clone();
        move || drop_if_empty(&slots, &key, &slot)
    }
}

// Remove `slot` from the directory if it is still the slot of `key` and
// holds no value. A slot that is being committed to is left alone.
fn drop_if_empty<K, V, C>(slots: &BPTree<K, Slot<V>, C>, key: &K, slot: &Slot<V>)
where
    K: Clone,
    V: Any + Send + Sync + Clone,
    C: Comparator<K>,
{
    let mut write = slots.write();
    match write.search(key) {
        Some(current) if current.ptr_eq(slot) => {}
        _ => return,
    }
    if slot.is_retired() || slot.retire_if(Option::is_none) {
        write.remove(key);
        write.commit();
    }
}

impl<K: fmt::Debug, V, C> fmt::Debug for TMap<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TMap").field("slots", &self.slots).finish()
    }
}

// Test:
