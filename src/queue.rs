use rand::RngCore;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

type Link<T> = Option<NonNull<QueueNode<T>>>;

struct QueueNode<T> {
    next: Link<T>,
    elem: T,
}

/// A sequential FIFO queue.
///
/// This is the queue work lists are prepared in before worker threads
/// start: fill it, `shuffle` it with a seeded generator, then hand it to a
/// `TQueue` (`TQueue::from(queue)`) for the threads to consume inside
/// sections.
///
/// ## Example:
/// ```
/// use stamp_stm::queue::Queue;
/// use stamp_stm::rng::SeededRng;
///
/// let mut a: Queue<u32> = (0..50).collect();
/// let mut b: Queue<u32> = (0..50).collect();
/// a.shuffle(&mut SeededRng::new(1));
/// b.shuffle(&mut SeededRng::new(1));
/// assert!(a.iter().eq(b.iter()));
///
/// assert_eq!(a.len(), 50);
/// while let Some(item) = a.pop() {
///     assert!(item < 50);
/// }
/// assert!(a.is_empty());
/// ```
pub struct Queue<T> {
    head: Link<T>,
    tail: Link<T>,
    size: usize,
    _owns: PhantomData<Box<QueueNode<T>>>,
}

// Nodes are owned exclusively by the queue, so it can move and be shared
// whenever its elements can
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Sync> Sync for Queue<T> {}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            head: None,
            tail: None,
            size: 0,
            _owns: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Append `elem` at the back.
    pub fn push(&mut self, elem: T) {
        let node = NonNull::from(Box::leak(Box::new(QueueNode { next: None, elem })));
        match self.tail {
            None => self.head = Some(node),
            Some(mut tail) => unsafe {
                tail.as_mut().next = Some(node);
            },
        }
        self.tail = Some(node);
        self.size += 1;
    }

    /// Remove the front element.
    pub fn pop(&mut self) -> Option<T> {
        let head = mem::take(&mut self.head);
        head.map(|node| unsafe {
            let node = Box::from_raw(node.as_ptr());
            self.head = node.next;
            if self.head.is_none() {
                self.tail = None;
            }
            self.size -= 1;
            node.elem
        })
    }

    /// Get a reference to the front element (if there are any elements).
    pub fn peek(&self) -> Option<&T> {
        self.head.map(|node| unsafe { &(*node.as_ptr()).elem })
    }

    pub fn clear(&mut self) {
        while self.pop().is_some() {}
    }

    /// Reorder the elements: `len` swaps of the positions `r1 % len` and
    /// `r2 % len`, two draws from `rng` per swap. The same generator state
    /// and contents always give the same order.
    pub fn shuffle<R: RngCore + ?Sized>(&mut self, rng: &mut R) {
        let count = self.size;
        if count == 0 {
            return;
        }
        let mut elems: Vec<T> = Vec::with_capacity(count);
        while let Some(elem) = self.pop() {
            elems.push(elem);
        }
        let modulus = count as u64;
        for _ in 0..count {
            let r1 = (rng.next_u64() % modulus) as usize;
            let r2 = (rng.next_u64() % modulus) as usize;
            elems.swap(r1, r2);
        }
        self.extend(elems);
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            current: &self.head,
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        let mut current = self.head;
        while let Some(node) = current {
            unsafe {
                let node = Box::from_raw(node.as_ptr());
                current = node.next;
            }
        }
    }
}

impl<T> Extend<T> for Queue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for elem in iter {
            self.push(elem);
        }
    }
}

impl<T> FromIterator<T> for Queue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Queue::new();
        queue.extend(iter);
        queue
    }
}

impl<T> IntoIterator for Queue<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter(self)
    }
}

impl<T: fmt::Debug> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Front-to-back iterator over a queue's elements.
pub struct Iter<'a, T> {
    current: &'a Link<T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current {
            Some(ref node_ptr) => unsafe {
                self.current = &node_ptr.as_ref().next;
                Some(&node_ptr.as_ref().elem)
            },
            None => None,
        }
    }
}

/// Consuming iterator, popping from the front.
pub struct IntoIter<T>(Queue<T>);

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.0.pop()
    }
}

// Test:
