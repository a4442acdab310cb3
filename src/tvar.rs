use crate::error::StmResult;
use crate::transaction::{self, Transaction};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

// A TVar is a shared handle to a VarCell. The cell holds the last committed
// value together with the version (a reading of the global clock) of the
// commit that wrote it. Committing sections hold the cell's write lock from
// before they tick the clock until their value is published, so a reader
// that takes the read lock always sees a value consistent with its version.
//
// A cell may be retired (see TMap::compact). A retired cell never takes a
// new value: sections that touch it abort and go look for its replacement.

pub(crate) type Value = Arc<dyn Any + Send + Sync>;

pub(crate) struct Slot {
    pub(crate) version: u64,
    pub(crate) retired: bool,
    pub(crate) value: Value,
}

pub(crate) struct VarCell {
    pub(crate) slot: RwLock<Slot>,
}

impl VarCell {
    fn new(value: Value) -> Self {
        Self {
            slot: RwLock::new(Slot {
                version: 0,
                retired: false,
                value,
            }),
        }
    }

    /// Identity of the cell, also the order in which commits lock cells.
    pub(crate) fn addr(cell: &Arc<VarCell>) -> usize {
        Arc::as_ptr(cell) as usize
    }
}

/// A transactional memory cell.
///
/// Every shared container in this crate is assembled from `TVar`s: a map
/// slot per key, a `next` link per list node, a cell per heap position.
/// Cloning a `TVar` clones the handle, not the value; all clones observe
/// the same cell.
///
/// Inside a section, `read` and `write` go through the section's log and
/// only become visible to others when the section commits. `read_atomic`
/// and `write_atomic` bypass sections and are meant for single-threaded
/// setup, teardown and inspection.
///
/// ## Example:
/// ```
/// use stamp_stm::{atomically, TVar};
///
/// let num_free = TVar::new(1u32);
/// let reserved = atomically(|tx| {
///     let free = num_free.read(tx)?;
///     if free == 0 {
///         return Ok(false);
///     }
///     num_free.write(tx, free - 1)?;
///     Ok(true)
/// });
/// assert!(reserved);
/// assert_eq!(num_free.read_atomic(), 0);
/// ```
pub struct TVar<T> {
    cell: Arc<VarCell>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TVar<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> TVar<T>
where
    T: Any + Send + Sync + Clone,
{
    pub fn new(value: T) -> Self {
        Self {
            cell: Arc::new(VarCell::new(Arc::new(value))),
            _marker: PhantomData,
        }
    }

    /// Read the value as seen by `tx` (its own writes included).
    pub fn read(&self, tx: &mut Transaction) -> StmResult<T> {
        let value = tx.read(&self.cell)?;
        Ok(unpack(&value))
    }

    /// Provisionally store `value`; it becomes visible at commit.
    pub fn write(&self, tx: &mut Transaction, value: T) -> StmResult<()> {
        tx.write(&self.cell, Arc::new(value))
    }

    /// Store `value` and return what `tx` saw before.
    pub fn replace(&self, tx: &mut Transaction, value: T) -> StmResult<T> {
        let old = self.read(tx)?;
        self.write(tx, value)?;
        Ok(old)
    }

    pub fn modify<F>(&self, tx: &mut Transaction, f: F) -> StmResult<()>
    where
        F: FnOnce(T) -> T,
    {
        let old = self.read(tx)?;
        self.write(tx, f(old))
    }

    /// The last committed value, outside of any section.
    pub fn read_atomic(&self) -> T {
        unpack(&self.cell.slot.read().value)
    }

    /// Publish `value` immediately, outside of any section.
    pub fn write_atomic(&self, value: T) {
        let mut slot = self.cell.slot.write();
        slot.value = Arc::new(value);
        slot.version = transaction::tick();
    }

    /// Retire the cell if its committed value satisfies `predicate` and no
    /// commit is in flight on it. Returns whether the cell got retired.
    pub(crate) fn retire_if<P>(&self, predicate: P) -> bool
    where
        P: FnOnce(&T) -> bool,
    {
        let mut slot = match self.cell.slot.try_write() {
            Some(slot) => slot,
            None => return false,
        };
        if slot.retired || !predicate(&unpack::<T>(&slot.value)) {
            return false;
        }
        slot.retired = true;
        slot.version = transaction::tick();
        true
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.cell.slot.read().retired
    }
}

impl<T> TVar<T> {
    /// Whether both handles refer to the same cell.
    pub fn ptr_eq(&self, other: &TVar<T>) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T> fmt::Debug for TVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TVar")
            .field("cell", &Arc::as_ptr(&self.cell))
            .finish()
    }
}

fn unpack<T: Any + Clone>(value: &Value) -> T {
    match value.downcast_ref::<T>() {
        Some(value) => value.clone(),
        None => unreachable!("TVar cell holds a value of another type"),
    }
}

// Test:
