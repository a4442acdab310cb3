use crate::comparator::{Comparator, Natural};
use crate::error::StmResult;
use crate::transaction::Transaction;
use crate::tvar::TVar;
use parking_lot::RwLock;
use std::any::Any;
use std::cmp::Ordering;
use tracing::debug;

// Array heap: position i has children 2i + 1 and 2i + 2. Each position is a
// TVar and so is the size; positions at or above the size hold None.
//
// The array of positions only ever grows. Growing is not part of any
// section: a position appended for a section that later aborts stays None
// and gets used by the next insert.

/// A transactional priority heap.
///
/// `remove_min` returns the least item according to the heap's comparator;
/// pass `Reverse(..)` to get the greatest first. Items the comparator
/// considers equal come out in no particular order, so tie-breaks belong
/// in the comparator.
///
/// ## Example:
/// ```
/// use stamp_stm::comparator::{Natural, Reverse};
/// use stamp_stm::{atomically, THeap};
///
/// let heap = THeap::with_comparator(Reverse(Natural));
/// atomically(|tx| {
///     for score in [3, 9, 1] {
///         heap.insert(tx, score)?;
///     }
///     Ok(())
/// });
/// assert_eq!(atomically(|tx| heap.remove_min(tx)), Some(9));
/// assert_eq!(atomically(|tx| heap.len(tx)), 2);
/// ```
pub struct THeap<T, C = Natural> {
    size: TVar<usize>,
    slots: RwLock<Vec<TVar<Option<T>>>>,
    cmp: C,
}

impl<T> THeap<T, Natural>
where
    T: Any + Send + Sync + Clone + Ord,
{
    pub fn new() -> Self {
        Self::with_comparator(Natural)
    }
}

impl<T> Default for THeap<T, Natural>
where
    T: Any + Send + Sync + Clone + Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C> THeap<T, C>
where
    T: Any + Send + Sync + Clone,
    C: Comparator<T>,
{
    pub fn with_comparator(cmp: C) -> Self {
        Self {
            size: TVar::new(0),
            slots: RwLock::new(Vec::new()),
            cmp,
        }
    }

    pub fn insert(&self, tx: &mut Transaction, item: T) -> StmResult<()> {
        let size = self.size.read(tx)?;
        let mut pos = size;
        let mut slot = self.slot(pos)?;
        while pos > 0 {
            let parent_pos = (pos - 1) / 2;
            let parent_slot = self.slot(parent_pos)?;
            let parent = Self::occupied(&parent_slot, tx)?;
            if self.cmp.compare(&item, &parent) != Ordering::Less {
                break;
            }
            slot.write(tx, Some(parent))?;
            pos = parent_pos;
            slot = parent_slot;
        }
        slot.write(tx, Some(item))?;
        self.size.write(tx, size + 1)
    }

    /// Remove and return the least item.
    pub fn remove_min(&self, tx: &mut Transaction) -> StmResult<Option<T>> {
        let size = self.size.read(tx)?;
        if size == 0 {
            return Ok(None);
        }
        let root = self.slot(0)?;
        let min = Self::occupied(&root, tx)?;
        let last_slot = self.slot(size - 1)?;
        let last = Self::occupied(&last_slot, tx)?;
        last_slot.write(tx, None)?;
        let size = size - 1;
        self.size.write(tx, size)?;
        if size == 0 {
            return Ok(Some(min));
        }

        let mut pos = 0;
        let mut slot = root;
        loop {
            let left = 2 * pos + 1;
            if left >= size {
                break;
            }
            let (mut child_pos, mut child_slot) = (left, self.slot(left)?);
            let mut child = Self::occupied(&child_slot, tx)?;
            if left + 1 < size {
                let right_slot = self.slot(left + 1)?;
                let right = Self::occupied(&right_slot, tx)?;
                if self.cmp.compare(&right, &child) == Ordering::Less {
                    child_pos = left + 1;
                    child_slot = right_slot;
                    child = right;
                }
            }
            if self.cmp.compare(&child, &last) != Ordering::Less {
                break;
            }
            slot.write(tx, Some(child))?;
            pos = child_pos;
            slot = child_slot;
        }
        slot.write(tx, Some(last))?;
        Ok(Some(min))
    }

    /// The least item, without removing it.
    pub fn peek_min(&self, tx: &mut Transaction) -> StmResult<Option<T>> {
        if self.size.read(tx)? == 0 {
            return Ok(None);
        }
        let root = self.slot(0)?;
        Self::occupied(&root, tx).map(Some)
    }

    pub fn len(&self, tx: &mut Transaction) -> StmResult<usize> {
        self.size.read(tx)
    }

    pub fn is_empty(&self, tx: &mut Transaction) -> StmResult<bool> {
        Ok(self.size.read(tx)? == 0)
    }

    pub fn clear(&self, tx: &mut Transaction) -> StmResult<()> {
        let size = self.size.read(tx)?;
        for pos in 0..size {
            self.slot(pos)?.write(tx, None)?;
        }
        self.size.write(tx, 0)
    }

    pub fn len_committed(&self) -> usize {
        self.size.read_atomic()
    }

    fn occupied(slot: &TVar<Option<T>>, tx: &mut Transaction) -> StmResult<T> {
        match slot.read(tx)? {
            Some(item) => Ok(item),
            None => unreachable!("heap position below the size is empty"),
        }
    }

    fn slot(&self, pos: usize) -> StmResult<TVar<Option<T>>> {
        if let Some(slot) = self.slots.read().get(pos) {
            return Ok(slot.clone());
        }
        let mut slots = self.slots.write();
        if pos >= slots.capacity() {
            let additional = (pos + 1).max(slots.len()) - slots.len();
            slots.try_reserve(additional)?;
            debug!(capacity = slots.capacity(), "grew heap");
        }
        while slots.len() <= pos {
            slots.push(TVar::new(None));
        }
        Ok(slots[pos].clone())
    }
}

// Test:
