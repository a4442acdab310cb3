use crate::comparator::{Comparator, Natural};
use crate::error::StmResult;
use crate::transaction::Transaction;
use crate::tvar::TVar;
use std::any::Any;
use std::cmp::Ordering;
use std::sync::Arc;

// A sorted singly linked list whose links are TVars. Walking the list reads
// the links up to the insertion point, so a section conflicts only with
// sections that changed one of those links: two inserts far apart in the
// list do not conflict on the links. They do conflict on the size counter,
// which every insert and remove writes.

type Link<T> = Option<Arc<ListNode<T>>>;

struct ListNode<T> {
    item: T,
    next: TVar<Link<T>>,
}

/// Whether a list keeps items that compare equal to one already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Duplicates {
    /// Equal items are stored next to each other, newest first.
    Allow,
    /// Inserting an item equal to a stored one is refused.
    #[default]
    Reject,
}

/// A transactional sorted list.
///
/// `TList` is a handle: clones refer to the same list, which makes it easy
/// to keep lists inside other containers (a list of reservations per
/// customer, a list of fragments per flow).
///
/// ## Example:
/// ```
/// use stamp_stm::{atomically, TList};
///
/// let list = TList::new();
/// atomically(|tx| {
///     list.insert(tx, 30)?;
///     list.insert(tx, 10)?;
///     list.insert(tx, 20)?;
///     // duplicates are rejected by default
///     assert!(!list.insert(tx, 20)?);
///     Ok(())
/// });
/// assert_eq!(list.to_vec_committed(), vec![10, 20, 30]);
/// ```
pub struct TList<T, C = Natural> {
    head: TVar<Link<T>>,
    size: TVar<usize>,
    cmp: Arc<C>,
    duplicates: Duplicates,
}

impl<T, C> Clone for TList<T, C> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
            size: self.size.clone(),
            cmp: self.cmp.clone(),
            duplicates: self.duplicates,
        }
    }
}

impl<T> TList<T, Natural>
where
    T: Any + Send + Sync + Clone + Ord,
{
    pub fn new() -> Self {
        Self::with_comparator(Natural)
    }
}

impl<T> Default for TList<T, Natural>
where
    T: Any + Send + Sync + Clone + Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C> TList<T, C>
where
    T: Any + Send + Sync + Clone,
    C: Comparator<T>,
{
    pub fn with_comparator(cmp: C) -> Self {
        Self {
            head: TVar::new(None),
            size: TVar::new(0),
            cmp: Arc::new(cmp),
            duplicates: Duplicates::default(),
        }
    }

    pub fn with_duplicates(mut self, duplicates: Duplicates) -> Self {
        self.duplicates = duplicates;
        self
    }

    pub fn duplicates(&self) -> Duplicates {
        self.duplicates
    }

    /// The stored item equal to `item`.
    pub fn find(&self, tx: &mut Transaction, item: &T) -> StmResult<Option<T>> {
        let (_, next) = self.seek(tx, item)?;
        Ok(next
            .filter(|node| self.equal(&node.item, item))
            .map(|node| node.item.clone()))
    }

    pub fn contains(&self, tx: &mut Transaction, item: &T) -> StmResult<bool> {
        Ok(self.find(tx, item)?.is_some())
    }

    /// Insert `item` in order. Returns `false` if duplicates are rejected
    /// and an equal item is stored.
    pub fn insert(&self, tx: &mut Transaction, item: T) -> StmResult<bool> {
        let (link, next) = self.seek(tx, &item)?;
        if self.duplicates == Duplicates::Reject {
            if let Some(node) = &next {
                if self.equal(&node.item, &item) {
                    return Ok(false);
                }
            }
        }
        let node = ListNode {
            item,
            next: TVar::new(next),
        };
        link.write(tx, Some(Arc::new(node)))?;
        self.size.modify(tx, |size| size + 1)?;
        Ok(true)
    }

    /// Remove one item equal to `item`. Returns whether one was found.
    pub fn remove(&self, tx: &mut Transaction, item: &T) -> StmResult<bool> {
        Ok(self.take(tx, item)?.is_some())
    }

    /// Remove one item equal to `item`, returning it.
    pub fn take(&self, tx: &mut Transaction, item: &T) -> StmResult<Option<T>> {
        let (link, next) = self.seek(tx, item)?;
        match next {
            Some(node) if self.equal(&node.item, item) => {
                self.unlink(tx, &link, &node)?;
                Ok(Some(node.item.clone()))
            }
            _ => Ok(None),
        }
    }

    /// Remove and return the first item.
    pub fn pop_front(&self, tx: &mut Transaction) -> StmResult<Option<T>> {
        match self.head.read(tx)? {
            Some(node) => {
                self.unlink(tx, &self.head, &node)?;
                Ok(Some(node.item.clone()))
            }
            None => Ok(None),
        }
    }

    /// The first item, without removing it.
    pub fn first(&self, tx: &mut Transaction) -> StmResult<Option<T>> {
        Ok(self.head.read(tx)?.map(|node| node.item.clone()))
    }

    pub fn len(&self, tx: &mut Transaction) -> StmResult<usize> {
        self.size.read(tx)
    }

    pub fn is_empty(&self, tx: &mut Transaction) -> StmResult<bool> {
        Ok(self.head.read(tx)?.is_none())
    }

    pub fn clear(&self, tx: &mut Transaction) -> StmResult<()> {
        self.head.write(tx, None)?;
        self.size.write(tx, 0)
    }

    /// All items in order.
    pub fn to_vec(&self, tx: &mut Transaction) -> StmResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = self.head.read(tx)?;
        while let Some(node) = next {
            items.push(node.item.clone());
            next = node.next.read(tx)?;
        }
        Ok(items)
    }

    /// Committed items in order, outside of any section.
    pub fn to_vec_committed(&self) -> Vec<T> {
        let mut items = Vec::new();
        let mut next = self.head.read_atomic();
        while let Some(node) = next {
            items.push(node.item.clone());
            next = node.next.read_atomic();
        }
        items
    }

    pub fn len_committed(&self) -> usize {
        self.size.read_atomic()
    }

    /// Whether both handles refer to the same list.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.head.ptr_eq(&other.head)
    }

    // Returns the link that points at the first node not less than `item`,
    // together with what it points at.
    fn seek(&self, tx: &mut Transaction, item: &T) -> StmResult<(TVar<Link<T>>, Link<T>)> {
        let mut link = self.head.clone();
        loop {
            let next = link.read(tx)?;
            let advance = match &next {
                Some(node) if self.cmp.compare(&node.item, item) == Ordering::Less => {
                    Some(node.next.clone())
                }
                _ => None,
            };
            match advance {
                Some(further) => link = further,
                None => return Ok((link, next)),
            }
        }
    }

    fn unlink(
        &self,
        tx: &mut Transaction,
        link: &TVar<Link<T>>,
        node: &Arc<ListNode<T>>,
    ) -> StmResult<()> {
        let after = node.next.read(tx)?;
        link.write(tx, after)?;
        self.size.modify(tx, |size| size - 1)
    }

    fn equal(&self, a: &T, b: &T) -> bool {
        self.cmp.compare(a, b) == Ordering::Equal
    }
}

// Test:
