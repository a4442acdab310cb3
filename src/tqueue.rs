use crate::error::StmResult;
use crate::queue::Queue;
use crate::transaction::Transaction;
use crate::tvar::TVar;
use std::any::Any;
use std::sync::Arc;

// The queue always holds a sentinel node: `head` points at it and the first
// element lives in the node after it. Popping turns the first element's
// node into the new sentinel. Push works at `tail` and on the last node's
// link, pop at `head` and on the sentinel's link, so the two only meet when
// the sentinel is also the last node, that is when the queue is empty.
// There is no element counter for the same reason; `len` walks the list.

type Link<T> = Option<Arc<QueueNode<T>>>;

struct QueueNode<T> {
    item: Option<T>,
    next: TVar<Link<T>>,
}

impl<T> QueueNode<T>
where
    T: Any + Send + Sync + Clone,
{
    fn new(item: Option<T>) -> Arc<Self> {
        Arc::new(Self {
            item,
            next: TVar::new(None),
        })
    }
}

/// A transactional FIFO queue.
///
/// ## Example:
/// ```
/// use stamp_stm::queue::Queue;
/// use stamp_stm::{atomically, TQueue};
///
/// let work: Queue<u32> = (1..=3).collect();
/// let queue = TQueue::from(work);
///
/// let first = atomically(|tx| {
///     queue.push(tx, 4)?;
///     queue.pop(tx)
/// });
/// assert_eq!(first, Some(1));
/// assert_eq!(queue.drain_committed(), vec![2, 3, 4]);
/// ```
pub struct TQueue<T> {
    head: TVar<Arc<QueueNode<T>>>,
    tail: TVar<Arc<QueueNode<T>>>,
}

impl<T> TQueue<T>
where
    T: Any + Send + Sync + Clone,
{
    pub fn new() -> Self {
        let sentinel = QueueNode::new(None);
        Self {
            head: TVar::new(sentinel.clone()),
            tail: TVar::new(sentinel),
        }
    }

    /// Append `item` at the back.
    pub fn push(&self, tx: &mut Transaction, item: T) -> StmResult<()> {
        let last = self.tail.read(tx)?;
        let node = QueueNode::new(Some(item));
        last.next.write(tx, Some(node.clone()))?;
        self.tail.write(tx, node)
    }

    /// Remove the front item.
    pub fn pop(&self, tx: &mut Transaction) -> StmResult<Option<T>> {
        let sentinel = self.head.read(tx)?;
        match sentinel.next.read(tx)? {
            Some(first) => {
                let item = first.item.clone();
                self.head.write(tx, first)?;
                Ok(item)
            }
            None => Ok(None),
        }
    }

    /// The front item, without removing it.
    pub fn peek(&self, tx: &mut Transaction) -> StmResult<Option<T>> {
        let sentinel = self.head.read(tx)?;
        Ok(sentinel
            .next
            .read(tx)?
            .and_then(|first| first.item.clone()))
    }

    pub fn is_empty(&self, tx: &mut Transaction) -> StmResult<bool> {
        let sentinel = self.head.read(tx)?;
        Ok(sentinel.next.read(tx)?.is_none())
    }

    /// Number of queued items. Reads every link, so it conflicts with any
    /// concurrent push or pop.
    pub fn len(&self, tx: &mut Transaction) -> StmResult<usize> {
        let mut count = 0;
        let mut next = self.head.read(tx)?.next.read(tx)?;
        while let Some(node) = next {
            count += 1;
            next = node.next.read(tx)?;
        }
        Ok(count)
    }

    pub fn clear(&self, tx: &mut Transaction) -> StmResult<()> {
        let last = self.tail.read(tx)?;
        self.head.write(tx, last)
    }

    /// Take every committed item, outside of any section.
    pub fn drain_committed(&self) -> Vec<T> {
        let mut items = Vec::new();
        let mut sentinel = self.head.read_atomic();
        while let Some(first) = sentinel.next.read_atomic() {
            items.extend(first.item.clone());
            sentinel = first;
        }
        self.head.write_atomic(sentinel);
        items
    }
}

impl<T> Default for TQueue<T>
where
    T: Any + Send + Sync + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<Queue<T>> for TQueue<T>
where
    T: Any + Send + Sync + Clone,
{
    fn from(queue: Queue<T>) -> Self {
        let sentinel = QueueNode::new(None);
        let mut last = sentinel.clone();
        for item in queue {
            let node = QueueNode::new(Some(item));
            last.next.write_atomic(Some(node.clone()));
            last = node;
        }
        Self {
            head: TVar::new(sentinel),
            tail: TVar::new(last),
        }
    }
}

// Test:

#[cfg(test)]
mod test {
    use super::TQueue;
    use crate::queue::Queue;
    use crate::runtime::atomically;
    use crate::transaction::Transaction;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order() {
        let queue = TQueue::new();
        atomically(|tx| {
            assert!(queue.is_empty(tx)?);
            for i in 0..5 {
                queue.push(tx, i)?;
            }
            assert_eq!(queue.len(tx)?, 5);
            assert_eq!(queue.peek(tx)?, Some(0));
            assert_eq!(queue.pop(tx)?, Some(0));
            Ok(())
        });
        assert_eq!(atomically(|tx| queue.pop(tx)), Some(1));
        atomically(|tx| queue.clear(tx));
        assert_eq!(atomically(|tx| queue.pop(tx)), None);
        atomically(|tx| queue.push(tx, 9));
        assert_eq!(queue.drain_committed(), vec![9]);
    }

    #[test]
    fn push_and_pop_of_non_empty_queue_are_disjoint() {
        let queue: TQueue<u8> = TQueue::from((0..1).collect::<Queue<u8>>());
        let mut producer = Transaction::begin();
        let mut consumer = Transaction::begin();
        queue.push(&mut producer, 1).unwrap();
        assert_eq!(queue.pop(&mut consumer).unwrap(), Some(0));
        consumer.commit().unwrap();
        producer.commit().unwrap();
        assert_eq!(queue.drain_committed(), vec![1]);
    }

    #[test]
    fn aborted_pop_keeps_the_item() {
        let queue = TQueue::from((0..3).collect::<Queue<u32>>());
        {
            let mut tx = Transaction::begin();
            assert_eq!(queue.pop(&mut tx).unwrap(), Some(0));
            queue.push(&mut tx, 99).unwrap();
        }
        assert_eq!(queue.drain_committed(), vec![0, 1, 2]);
    }

    #[test]
    fn every_item_popped_once() {
        let queue = Arc::new(TQueue::from((0..2000).collect::<Queue<u32>>()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(item) = atomically(|tx| queue.pop(tx)) {
                        taken.push(item);
                    }
                    taken
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for item in handle.join().unwrap() {
                assert!(seen.insert(item), "item {} popped twice", item);
            }
        }
        assert_eq!(seen.len(), 2000);
    }
}
