use std::cmp::Ordering;

// Ordered containers take their order from a Comparator rather than from
// an `Ord` bound, so the same item type can sit in a list ordered by id and
// in a heap ordered by score. Comparators are called from inside sections
// and may run again on retry, so they must be pure.

/// A strict weak order over `T`.
pub trait Comparator<T: ?Sized>: Send + Sync {
    fn compare(&self, a: &T, b: &T) -> Ordering;
}

/// The order given by `T: Ord`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Natural;

impl<T: Ord + ?Sized> Comparator<T> for Natural {
    fn compare(&self, a: &T, b: &T) -> Ordering {
        a.cmp(b)
    }
}

impl<T: ?Sized, F> Comparator<T> for F
where
    F: Fn(&T, &T) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &T, b: &T) -> Ordering {
        self(a, b)
    }
}

/// The opposite order of `C`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reverse<C>(pub C);

impl<T: ?Sized, C: Comparator<T>> Comparator<T> for Reverse<C> {
    fn compare(&self, a: &T, b: &T) -> Ordering {
        self.0.compare(b, a)
    }
}

/// Order by `A`, falling back to `B` on ties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Then<A, B>(pub A, pub B);

impl<T: ?Sized, A: Comparator<T>, B: Comparator<T>> Comparator<T> for Then<A, B> {
    fn compare(&self, a: &T, b: &T) -> Ordering {
        self.0.compare(a, b).then_with(|| self.1.compare(a, b))
    }
}

/// Compare by a projected key.
pub fn by_key<T, K, F>(key: F) -> impl Comparator<T> + Clone
where
    K: Ord,
    F: Fn(&T) -> K + Send + Sync + Clone,
{
    move |a: &T, b: &T| key(a).cmp(&key(b))
}

// Test:
