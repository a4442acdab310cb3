use crate::error::StmResult;
use crate::transaction::Transaction;
use crate::tvar::TVar;
use crossbeam::queue::SegQueue;
use parking_lot::RwLock;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

// Objects that other shared structures point at (mesh elements, graph
// nodes) live in arena slots and are referred to by Handle. A handle carries
// the generation of the slot at allocation time; freeing a slot bumps the
// generation, so every handle to the old object goes stale at once instead
// of dangling.
//
// Slot indices only move through the free list outside of sections:
// a freed index is pushed once the freeing section commits, an index taken
// by an allocating section that aborts is pushed back. A section therefore
// never sees a slot that another section is still using.

#[derive(Clone)]
struct SlotState<T> {
    generation: u64,
    value: Option<T>,
}

/// Reference to an object in a `TArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: usize,
    generation: u64,
}

impl Handle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A transactional arena with generation-checked handles.
///
/// ## Example:
/// ```
/// use stamp_stm::{atomically, TArena};
///
/// let arena = TArena::new();
/// let element = atomically(|tx| arena.alloc(tx, "triangle"));
/// assert_eq!(atomically(|tx| arena.get(tx, element)), Some("triangle"));
///
/// atomically(|tx| arena.free(tx, element));
/// // the handle is stale now, even once the slot is reused
/// let other = atomically(|tx| arena.alloc(tx, "segment"));
/// assert_eq!(other.index(), element.index());
/// assert_eq!(atomically(|tx| arena.get(tx, element)), None);
/// ```
pub struct TArena<T> {
    slots: RwLock<Vec<TVar<SlotState<T>>>>,
    free: Arc<SegQueue<usize>>,
}

impl<T> TArena<T>
where
    T: Any + Send + Sync + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            free: Arc::new(SegQueue::new()),
        }
    }

    /// Store `value` in a free slot. The slot is only taken for good if the
    /// section commits.
    pub fn alloc(&self, tx: &mut Transaction, value: T) -> StmResult<Handle> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => self.grow()?,
        };
        let free = self.free.clone();
        tx.on_abort(move || free.push(index));

        let slot = self.slot(index);
        let generation = match slot.read(tx)? {
            SlotState { value: None, generation } => generation,
            SlotState { value: Some(_), .. } => unreachable!("free list holds a live slot"),
        };
        slot.write(
            tx,
            SlotState {
                generation,
                value: Some(value),
            },
        )?;
        Ok(Handle { index, generation })
    }

    /// The object `handle` refers to, or `None` if it was freed.
    pub fn get(&self, tx: &mut Transaction, handle: Handle) -> StmResult<Option<T>> {
        match self.live(tx, handle)? {
            Some((_, state)) => Ok(state.value),
            None => Ok(None),
        }
    }

    /// Replace the object `handle` refers to. Returns `false` if it was
    /// freed.
    pub fn set(&self, tx: &mut Transaction, handle: Handle, value: T) -> StmResult<bool> {
        match self.live(tx, handle)? {
            Some((slot, state)) => {
                slot.write(
                    tx,
                    SlotState {
                        generation: state.generation,
                        value: Some(value),
                    },
                )?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_live(&self, tx: &mut Transaction, handle: Handle) -> StmResult<bool> {
        Ok(self.live(tx, handle)?.is_some())
    }

    /// Free the object `handle` refers to, returning it. Freeing a stale
    /// handle does nothing. The slot becomes reusable once the section
    /// commits.
    pub fn free(&self, tx: &mut Transaction, handle: Handle) -> StmResult<Option<T>> {
        let (slot, state) = match self.live(tx, handle)? {
            Some(live) => live,
            None => return Ok(None),
        };
        slot.write(
            tx,
            SlotState {
                generation: state.generation + 1,
                value: None,
            },
        )?;
        let free = self.free.clone();
        let index = handle.index;
        tx.on_commit(move || free.push(index));
        Ok(state.value)
    }

    /// Number of slots, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }

    /// Number of committed live objects, outside of any section.
    pub fn live_committed(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|slot| slot.read_atomic().value.is_some())
            .count()
    }

    fn live(
        &self,
        tx: &mut Transaction,
        handle: Handle,
    ) -> StmResult<Option<(TVar<SlotState<T>>, SlotState<T>)>> {
        let slot = match self.slots.read().get(handle.index) {
            Some(slot) => slot.clone(),
            None => return Ok(None),
        };
        let state = slot.read(tx)?;
        if state.generation != handle.generation || state.value.is_none() {
            return Ok(None);
        }
        Ok(Some((slot, state)))
    }

    fn slot(&self, index: usize) -> TVar<SlotState<T>> {
        self.slots.read()[index].clone()
    }

    fn grow(&self) -> StmResult<usize> {
        let mut slots = self.slots.write();
        if slots.len() == slots.capacity() {
            let additional = slots.len().max(16);
            slots.try_reserve(additional)?;
            debug!(capacity = slots.capacity(), "grew arena");
        }
        slots.push(TVar::new(SlotState {
            generation: 0,
            value: None,
        }));
        Ok(slots.len() - 1)
    }
}

impl<T> Default for TArena<T>
where
    T: Any + Send + Sync + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

// Test:

#[cfg(test)]
mod test {
    use super::TArena;
    use crate::error::StmResult;
    use crate::runtime::atomically;
    use crate::transaction::{run_transaction, Transaction};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn stale_handles() {
        let arena = TArena::new();
        let a = atomically(|tx| arena.alloc(tx, 1u32));
        let b = atomically(|tx| arena.alloc(tx, 2u32));
        assert_ne!(a.index(), b.index());

        assert!(atomically(|tx| arena.set(tx, a, 10)));
        assert_eq!(atomically(|tx| arena.free(tx, a)), Some(10));
        assert_eq!(atomically(|tx| arena.free(tx, a)), None);
        assert!(!atomically(|tx| arena.is_live(tx, a)));
        assert!(!atomically(|tx| arena.set(tx, a, 11)));

        let c = atomically(|tx| arena.alloc(tx, 3u32));
        assert_eq!(c.index(), a.index());
        assert_eq!(c.generation(), a.generation() + 1);
        assert_eq!(atomically(|tx| arena.get(tx, a)), None);
        assert_eq!(atomically(|tx| arena.get(tx, c)), Some(3));
        assert_eq!(arena.live_committed(), 2);
        assert_eq!(arena.capacity(), 2);
    }

    #[test]
    fn aborted_alloc_returns_the_slot() {
        let arena = TArena::new();
        let result = run_transaction(|tx| {
            let handle = arena.alloc(tx, 'x')?;
            assert!(arena.is_live(tx, handle)?);
            crate::transaction::cancel::<()>()
        });
        assert!(result.is_err());
        assert_eq!(arena.live_committed(), 0);
        let handle = atomically(|tx| arena.alloc(tx, 'y'));
        assert_eq!(handle.index(), 0);
        assert_eq!(arena.capacity(), 1);
    }

    #[test]
    fn aborted_free_keeps_the_object() {
        let arena = TArena::new();
        let handle = atomically(|tx| arena.alloc(tx, 5u8));
        {
            let mut tx = Transaction::begin();
            assert_eq!(arena.free(&mut tx, handle).unwrap(), Some(5));
        }
        assert_eq!(atomically(|tx| arena.get(tx, handle)), Some(5));
        // the slot was not handed out again
        let other = atomically(|tx| arena.alloc(tx, 6u8));
        assert_ne!(other.index(), handle.index());
    }

    #[test]
    fn concurrent_alloc_free() {
        let arena = Arc::new(TArena::new());
        let handles: Vec<_> = (0..4u64)
            .map(|id| {
                let arena = arena.clone();
                thread::spawn(move || {
                    let mut kept = Vec::new();
                    for i in 0..300u64 {
                        let handle = atomically(|tx| arena.alloc(tx, id * 1000 + i));
                        if i % 3 == 0 {
                            kept.push((handle, id * 1000 + i));
                        } else {
                            atomically(|tx| arena.free(tx, handle));
                        }
                    }
                    kept
                })
            })
            .collect();
        let mut kept = Vec::new();
        for handle in handles {
            kept.extend(handle.join().unwrap());
        }
        assert_eq!(arena.live_committed(), kept.len());
        for (handle, value) in kept {
            assert_eq!(atomically(|tx| arena.get(tx, handle)), Some(value));
        }
    }

    #[test]
    fn grows_across_reservations() {
        let arena = TArena::new();
        let handles = atomically(|tx| {
            (0..100u32)
                .map(|i| arena.alloc(tx, i))
                .collect::<StmResult<Vec<_>>>()
        });
        assert_eq!(arena.capacity(), 100);
        assert_eq!(arena.live_committed(), 100);
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.index(), i);
            assert_eq!(atomically(|tx| arena.get(tx, handle)), Some(i as u32));
        }
    }
}
