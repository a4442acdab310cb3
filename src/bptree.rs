use crate::comparator::{Comparator, Natural};
use parking_lot::{Mutex, MutexGuard};
use std::cmp::Ordering;
use std::fmt;
use std::slice;
use std::sync::Arc;

// A concurrently readable, copy-on-write B+ tree

// Readers take a snapshot (a clone of the root Arc) and never block writers.
// A single write transaction at a time works on its own root: every node on
// the path to a modification goes through Arc::make_mut, so nodes still
// shared with a snapshot or with the committed tree are copied, while nodes
// the transaction already copied are modified in place.
//
// Branch keys are separators: every key in children[i] is <= keys[i] and
// every key in children[i + 1] is > keys[i].

// # HOW REMOVE WORKS:
// The branch above the leaf that held the key checks whether the child it
// recursed into underflowed. If it did, we first try to rotate an entry in
// from the right sibling, then from the left one; if neither has entries to
// spare, the child is merged with its right sibling, or with its left one
// when it is the last child. Merges remove one separator from the branch,
// which may underflow in turn and gets fixed by its own parent.

// The maximum number of children of a branch and of entries of a leaf
const B_PARAMETER: usize = 8;
// Non-root leaves hold at least this many entries
const MIN_LEAF: usize = (B_PARAMETER / 2) + (B_PARAMETER % 2);
// Non-root branches hold at least this many keys
const MIN_BRANCH: usize = (B_PARAMETER / 2) - 1 + (B_PARAMETER % 2);

#[derive(Clone)]
struct Branch<K, V> {
    keys: Vec<K>,
    children: Vec<Arc<Node<K, V>>>,
}

#[derive(Clone)]
struct Leaf<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
}

#[derive(Clone)]
enum Node<K, V> {
    Branch(Branch<K, V>),
    Leaf(Leaf<K, V>),
}

// What a parent has to do about a child that underflowed
enum Rebalance {
    RotateRight,
    RotateLeft,
    MergeRight,
    MergeLeft,
}

#[derive(Clone)]
struct Root<K, V> {
    node: Option<Arc<Node<K, V>>>,
    len: usize,
}

/// A concurrently readable B+ tree with copy-on-write transactions, keyed
/// through a `Comparator`.
///
/// `BPTree` itself works only as a handle. Modifications go through a
/// `WriteTxn` and become visible when it gets committed. A `Snapshot` shows
/// the tree as it was when the snapshot was taken, no matter what gets
/// committed afterwards.
///
/// ## Example:
/// ```
/// use stamp_stm::bptree::BPTree;
///
/// let tree = BPTree::new();
///
/// let mut write = tree.write();
/// // only one write transaction can exist at a time
/// assert!(tree.try_write().is_none());
/// write.update(1, 'A');
/// write.update(2, 'B');
/// write.update(3, 'C');
/// assert_eq!(write.update(2, 'D'), Some('B'));
/// assert_eq!(write.remove(&3), Some('C'));
///
/// // not committed yet
/// assert!(tree.read().search(&1).is_none());
///
/// // dropping the transaction instead would roll it back
/// write.commit();
///
/// let read = tree.read();
/// assert_eq!(read.search(&1), Some(&'A'));
/// assert_eq!(read.search(&2), Some(&'D'));
/// assert_eq!(read.search(&3), None);
/// assert_eq!(read.len(), 2);
/// ```
pub struct BPTree<K, V, C = Natural> {
    root: Mutex<Root<K, V>>,
    write: Mutex<()>,
    cmp: C,
}

/// A read-only view of a `BPTree` at one point in time.
pub struct Snapshot<'a, K, V, C> {
    root: Root<K, V>,
    cmp: &'a C,
}

/// The single write transaction of a `BPTree`.
pub struct WriteTxn<'a, K, V, C> {
    caller: &'a BPTree<K, V, C>,
    root: Root<K, V>,
    _guard: MutexGuard<'a, ()>,
}

/// In-order iterator over the entries of a snapshot or write transaction.
pub struct Iter<'s, K, V> {
    stack: Vec<slice::Iter<'s, Arc<Node<K, V>>>>,
    leaf: Option<std::iter::Zip<slice::Iter<'s, K>, slice::Iter<'s, V>>>,
}

// IMPLEMENTATION:

impl<K, V> BPTree<K, V, Natural>
where
    K: Ord + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::with_comparator(Natural)
    }
}

impl<K, V> Default for BPTree<K, V, Natural>
where
    K: Ord + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C> BPTree<K, V, C>
where
    K: Clone,
    V: Clone,
    C: Comparator<K>,
{
    pub fn with_comparator(cmp: C) -> Self {
        Self {
            root: Mutex::new(Root { node: None, len: 0 }),
            write: Mutex::new(()),
            cmp,
        }
    }

    pub fn comparator(&self) -> &C {
        &self.cmp
    }

    /// Take a snapshot of the committed tree.
    pub fn read(&self) -> Snapshot<'_, K, V, C> {
        Snapshot {
            root: self.root.lock().clone(),
            cmp: &self.cmp,
        }
    }

    /// Start a write transaction.
    ///
    /// If another write transaction is still active, this will wait for it
    /// to get committed or rolled back.
    pub fn write(&self) -> WriteTxn<'_, K, V, C> {
        let guard = self.write.lock();
        self.prepare_write_txn(guard)
    }

    /// Start a write transaction, but only if no other one is active.
    pub fn try_write(&self) -> Option<WriteTxn<'_, K, V, C>> {
        self.write
            .try_lock()
            .map(|guard| self.prepare_write_txn(guard))
    }

    fn prepare_write_txn<'a>(&'a self, guard: MutexGuard<'a, ()>) -> WriteTxn<'a, K, V, C> {
        WriteTxn {
            caller: self,
            root: self.root.lock().clone(),
            _guard: guard,
        }
    }
}

impl<'a, K, V, C> Snapshot<'a, K, V, C>
where
    C: Comparator<K>,
{
    pub fn search(&self, key: &K) -> Option<&V> {
        self.root.search(key, self.cmp)
    }

    pub fn len(&self) -> usize {
        self.root.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.len == 0
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        self.root.iter()
    }
}

impl<'a, K, V, C> WriteTxn<'a, K, V, C>
where
    K: Clone,
    V: Clone,
    C: Comparator<K>,
{
    pub fn search(&self, key: &K) -> Option<&V> {
        self.root.search(key, &self.caller.cmp)
    }

    pub fn len(&self) -> usize {
        self.root.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.len == 0
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        self.root.iter()
    }

    /// Insert `val` for `key`, or replace the value already stored for it.
    /// Returns the replaced value.
    pub fn update(&mut self, key: K, val: V) -> Option<V> {
        let cmp = &self.caller.cmp;
        let (previous, split) = match self.root.node.as_mut() {
            None => {
                self.root.node = Some(Arc::new(Node::Leaf(Leaf {
                    keys: vec![key],
                    values: vec![val],
                })));
                (None, None)
            }
            Some(arc) => Arc::make_mut(arc).update(key, val, cmp),
        };
        if let Some((separator, right)) = split {
            if let Some(left) = self.root.node.take() {
                self.root.node = Some(Arc::new(Node::Branch(Branch {
                    keys: vec![separator],
                    children: vec![left, right],
                })));
            }
        }
        if previous.is_none() {
            self.root.len += 1;
        }
        previous
    }

    /// Remove the entry for `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        // leave the shared nodes alone when there is nothing to remove
        self.search(key)?;
        let cmp = &self.caller.cmp;
        let arc = self.root.node.as_mut()?;
        let removed = Arc::make_mut(arc).remove(key, cmp);
        // the root may shrink by one level, or disappear
        let collapse = match &**arc {
            Node::Branch(branch) if branch.children.len() == 1 => {
                Some(Some(branch.children[0].clone()))
            }
            Node::Leaf(leaf) if leaf.keys.is_empty() => Some(None),
            _ => None,
        };
        if let Some(node) = collapse {
            self.root.node = node;
        }
        if removed.is_some() {
            self.root.len -= 1;
        }
        removed
    }

    pub fn commit(self) {
        *self.caller.root.lock() = self.root;
    }

    #[cfg(test)]
    fn check_bptree_properties(&self, expect_record_count: usize)
    where
        K: fmt::Debug,
    {
        self.root.check_bptree_properties(expect_record_count, &self.caller.cmp);
    }
}

impl<K, V> Root<K, V> {
    fn search<C: Comparator<K>>(&self, key: &K, cmp: &C) -> Option<&V> {
        let mut node = self.node.as_ref()?;
        loop {
            match &**node {
                Node::Branch(branch) => node = &branch.children[branch.child_index(key, cmp)],
                Node::Leaf(leaf) => {
                    return match leaf.position(key, cmp) {
                        Ok(idx) => Some(&leaf.values[idx]),
                        Err(_) => None,
                    }
                }
            }
        }
    }

    fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            stack: match &self.node {
                None => Vec::new(),
                Some(node) => vec![slice::from_ref(node).iter()],
            },
            leaf: None,
        }
    }

    #[cfg(test)]
    fn check_bptree_properties<C: Comparator<K>>(&self, expect_record_count: usize, cmp: &C)
    where
        K: fmt::Debug,
    {
        let count = match &self.node {
            None => 0,
            Some(node) => node.check_bptree_properties(None, None, true, cmp).1,
        };
        assert_eq!(
            expect_record_count, count,
            "Tree was expected to hold {} elements. Actually detected {}.",
            expect_record_count, count
        );
        assert_eq!(self.len, count, "Stored length {} disagrees with the tree", self.len);
    }
}

impl<'s, K, V> Iterator for Iter<'s, K, V> {
    type Item = (&'s K, &'s V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(leaf) = self.leaf.as_mut() {
                if let Some(entry) = leaf.next() {
                    return Some(entry);
                }
                self.leaf = None;
            }
            let next = self.stack.last_mut()?.next();
            match next {
                None => {
                    self.stack.pop();
                }
                Some(node) => match &**node {
                    Node::Branch(branch) => self.stack.push(branch.children.iter()),
                    Node::Leaf(leaf) => self.leaf = Some(leaf.keys.iter().zip(leaf.values.iter())),
                },
            }
        }
    }
}

impl<K, V> Branch<K, V> {
    /// Index of the child whose subtree may hold `key`.
    fn child_index<C: Comparator<K>>(&self, key: &K, cmp: &C) -> usize {
        self.keys
            .iter()
            .position(|separator| cmp.compare(key, separator) != Ordering::Greater)
            .unwrap_or(self.keys.len())
    }
}

impl<K, V> Leaf<K, V> {
    fn position<C: Comparator<K>>(&self, key: &K, cmp: &C) -> Result<usize, usize> {
        self.keys.binary_search_by(|probe| cmp.compare(probe, key))
    }
}

impl<K, V> Node<K, V>
where
    K: Clone,
    V: Clone,
{
    fn underflows(&self) -> bool {
        match self {
            Node::Branch(branch) => branch.keys.len() < MIN_BRANCH,
            Node::Leaf(leaf) => leaf.keys.len() < MIN_LEAF,
        }
    }

    fn can_lend(&self) -> bool {
        match self {
            Node::Branch(branch) => branch.keys.len() > MIN_BRANCH,
            Node::Leaf(leaf) => leaf.keys.len() > MIN_LEAF,
        }
    }

    /// Inserts or (if present) updates val for given key. If the node is
    /// split, it keeps the left half and the separator travelling up is
    /// returned with the right half.
    fn update<C: Comparator<K>>(
        &mut self,
        key: K,
        val: V,
        cmp: &C,
    ) -> (Option<V>, Option<(K, Arc<Node<K, V>>)>) {
        match self {
            Node::Branch(branch) => {
                let idx = branch.child_index(&key, cmp);
                let (previous, split) = Arc::make_mut(&mut branch.children[idx]).update(key, val, cmp);
                if let Some((separator, right)) = split {
                    branch.keys.insert(idx, separator);
                    branch.children.insert(idx + 1, right);
                    if branch.children.len() > B_PARAMETER {
                        return (previous, Some(Self::split_branch(branch)));
                    }
                }
                (previous, None)
            }
            Node::Leaf(leaf) => match leaf.position(&key, cmp) {
                Ok(idx) => (Some(std::mem::replace(&mut leaf.values[idx], val)), None),
                Err(idx) => {
                    leaf.keys.insert(idx, key);
                    leaf.values.insert(idx, val);
                    if leaf.keys.len() > B_PARAMETER {
                        return (None, Some(Self::split_leaf(leaf)));
                    }
                    (None, None)
                }
            },
        }
    }

    // The left leaf keeps one entry more than the right one; its last key
    // becomes the separator.
    fn split_leaf(leaf: &mut Leaf<K, V>) -> (K, Arc<Node<K, V>>) {
        let keep = (B_PARAMETER / 2) + 1;
        let right = Leaf {
            keys: leaf.keys.split_off(keep),
            values: leaf.values.split_off(keep),
        };
        let separator = leaf.keys[keep - 1].clone();
        (separator, Arc::new(Node::Leaf(right)))
    }

    // The median key moves up; the left branch keeps the larger half.
    fn split_branch(branch: &mut Branch<K, V>) -> (K, Arc<Node<K, V>>) {
        let keep = B_PARAMETER / 2;
        let mut right_keys = branch.keys.split_off(keep);
        let separator = right_keys.remove(0);
        let right = Branch {
            keys: right_keys,
            children: branch.children.split_off(keep + 1),
        };
        (separator, Arc::new(Node::Branch(right)))
    }

    fn remove<C: Comparator<K>>(&mut self, key: &K, cmp: &C) -> Option<V> {
        match self {
            Node::Leaf(leaf) => {
                let idx = leaf.position(key, cmp).ok()?;
                leaf.keys.remove(idx);
                Some(leaf.values.remove(idx))
            }
            Node::Branch(branch) => {
                let idx = branch.child_index(key, cmp);
                let child = Arc::make_mut(&mut branch.children[idx]);
                let removed = child.remove(key, cmp);
                if child.underflows() {
                    Self::fix_child(branch, idx);
                }
                removed
            }
        }
    }

    fn fix_child(branch: &mut Branch<K, V>, idx: usize) {
        let has_right = idx + 1 < branch.children.len();
        let action = if has_right && branch.children[idx + 1].can_lend() {
            Rebalance::RotateRight
        } else if idx > 0 && branch.children[idx - 1].can_lend() {
            Rebalance::RotateLeft
        } else if has_right {
            Rebalance::MergeRight
        } else if idx > 0 {
            Rebalance::MergeLeft
        } else {
            panic!("Invalid remove case: a branch child with no siblings underflowed.");
        };

        match action {
            Rebalance::RotateRight => {
                let (left, right) = branch.children.split_at_mut(idx + 1);
                let separator = Self::rotate_from_right(
                    Arc::make_mut(&mut left[idx]),
                    Arc::make_mut(&mut right[0]),
                    &branch.keys[idx],
                );
                branch.keys[idx] = separator;
            }
            Rebalance::RotateLeft => {
                let (left, right) = branch.children.split_at_mut(idx);
                let separator = Self::rotate_from_left(
                    Arc::make_mut(&mut right[0]),
                    Arc::make_mut(&mut left[idx - 1]),
                    &branch.keys[idx - 1],
                );
                branch.keys[idx - 1] = separator;
            }
            Rebalance::MergeRight => Self::merge_children(branch, idx),
            Rebalance::MergeLeft => Self::merge_children(branch, idx - 1),
        }
    }

    /// Moves the first entry of `right` to the end of `node`, returning the
    /// new separator between them.
    fn rotate_from_right(node: &mut Self, right: &mut Self, separator: &K) -> K {
        match (node, right) {
            (Node::Leaf(leaf), Node::Leaf(right_leaf)) => {
                let key = right_leaf.keys.remove(0);
                leaf.values.push(right_leaf.values.remove(0));
                leaf.keys.push(key.clone());
                key
            }
            (Node::Branch(branch), Node::Branch(right_branch)) => {
                branch.keys.push(separator.clone());
                branch.children.push(right_branch.children.remove(0));
                right_branch.keys.remove(0)
            }
            _ => panic!("Unreachable."),
        }
    }

    /// Moves the last entry of `left` to the front of `node`, returning the
    /// new separator between them.
    fn rotate_from_left(node: &mut Self, left: &mut Self, separator: &K) -> K {
        match (node, left) {
            (Node::Leaf(leaf), Node::Leaf(left_leaf)) => {
                let last = left_leaf.keys.len() - 1;
                leaf.keys.insert(0, left_leaf.keys.remove(last));
                leaf.values.insert(0, left_leaf.values.remove(last));
                left_leaf.keys[last - 1].clone()
            }
            (Node::Branch(branch), Node::Branch(left_branch)) => {
                let last = left_branch.keys.len() - 1;
                branch.keys.insert(0, separator.clone());
                branch
                    .children
                    .insert(0, left_branch.children.remove(last + 1));
                left_branch.keys.remove(last)
            }
            _ => panic!("Unreachable."),
        }
    }

    /// Merges children `idx` and `idx + 1` of `branch` into child `idx`.
    fn merge_children(branch: &mut Branch<K, V>, idx: usize) {
        let separator = branch.keys.remove(idx);
        let right = branch.children.remove(idx + 1);
        let right = Arc::try_unwrap(right).unwrap_or_else(|shared| (*shared).clone());
        match (Arc::make_mut(&mut branch.children[idx]), right) {
            (Node::Leaf(leaf), Node::Leaf(right_leaf)) => {
                leaf.keys.extend(right_leaf.keys);
                leaf.values.extend(right_leaf.values);
            }
            (Node::Branch(left_branch), Node::Branch(right_branch)) => {
                left_branch.keys.push(separator);
                left_branch.keys.extend(right_branch.keys);
                left_branch.children.extend(right_branch.children);
            }
            _ => panic!("Unreachable."),
        }
    }
}

impl<K, V> Node<K, V> {
    /// Checks B+ tree invariants;
    /// Returns the depth and number of elements of the subtree rooted in given node
    #[cfg(test)]
    fn check_bptree_properties<C: Comparator<K>>(
        &self,
        least_lim: Option<&K>,
        most_lim: Option<&K>,
        root: bool,
        cmp: &C,
    ) -> (usize, usize)
    where
        K: fmt::Debug,
    {
        let in_limits = |key: &K| {
            if let Some(least) = least_lim {
                assert!(
                    cmp.compare(least, key) == Ordering::Less,
                    "Key {:?} expected to be over {:?}.",
                    key,
                    least
                );
            }
            if let Some(most) = most_lim {
                assert!(
                    cmp.compare(key, most) != Ordering::Greater,
                    "Key {:?} expected to be at most {:?}.",
                    key,
                    most
                );
            }
        };
        match self {
            Node::Branch(branch) => {
                if !root {
                    assert!(
                        branch.keys.len() >= MIN_BRANCH,
                        "Non-root branch nodes are expected to hold at least {} keys, found one with {}.",
                        MIN_BRANCH,
                        branch.keys.len()
                    );
                }
                assert!(
                    branch.children.len() <= B_PARAMETER,
                    "Found branch node with {} children. Maximum is {}.",
                    branch.children.len(),
                    B_PARAMETER
                );
                assert_eq!(branch.children.len(), branch.keys.len() + 1);
                branch.keys.iter().for_each(in_limits);
                for pair in branch.keys.windows(2) {
                    assert_eq!(cmp.compare(&pair[0], &pair[1]), Ordering::Less);
                }
                let mut depth = None;
                let mut count = 0;
                for (i, child) in branch.children.iter().enumerate() {
                    let least = if i == 0 { least_lim } else { Some(&branch.keys[i - 1]) };
                    let most = branch.keys.get(i).or(most_lim);
                    let (d, cnt) = child.check_bptree_properties(least, most, false, cmp);
                    if let Some(expected) = depth {
                        assert_eq!(expected, d, "Nonequal depths of branch subtrees ({} and {}).", expected, d);
                    }
                    depth = Some(d);
                    count += cnt;
                }
                (depth.unwrap_or(0) + 1, count)
            }
            Node::Leaf(leaf) => {
                if !root {
                    assert!(
                        leaf.keys.len() >= MIN_LEAF,
                        "Non-root leaves are expected to hold at least {} keys, found one with {}.",
                        MIN_LEAF,
                        leaf.keys.len()
                    );
                }
                assert!(
                    leaf.keys.len() <= B_PARAMETER,
                    "Found leaf node with {} keys. Maximum is {}.",
                    leaf.keys.len(),
                    B_PARAMETER
                );
                assert_eq!(leaf.keys.len(), leaf.values.len());
                leaf.keys.iter().for_each(in_limits);
                for pair in leaf.keys.windows(2) {
                    assert_eq!(cmp.compare(&pair[0], &pair[1]), Ordering::Less);
                }
                (1, leaf.keys.len())
            }
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C> fmt::Debug for BPTree<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = self.root.lock();
        f.debug_map().entries(root.iter()).finish()
    }
}

// Test:
