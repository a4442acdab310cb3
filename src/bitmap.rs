use std::fmt;

const WORD_BITS: usize = u64::BITS as usize;

/// A fixed-size bit vector.
///
/// A plain value: clone it into a `TVar<Bitmap>` to share it between
/// sections, or keep it local to one thread.
///
/// ## Example:
/// ```
/// use stamp_stm::Bitmap;
///
/// let mut visited = Bitmap::new(100);
/// assert!(visited.set(3));
/// assert!(visited.set(70));
/// assert!(!visited.set(100)); // out of range
/// assert_eq!(visited.find_set(4), Some(70));
/// assert_eq!(visited.find_clear(3), Some(4));
/// assert_eq!(visited.num_set(), 2);
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// `len` bits, all clear.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set bit `i`. Returns `false` if `i` is out of range.
    pub fn set(&mut self, i: usize) -> bool {
        if i >= self.len {
            return false;
        }
        self.words[i / WORD_BITS] |= 1 << (i % WORD_BITS);
        true
    }

    /// Clear bit `i`. Returns `false` if `i` is out of range.
    pub fn clear(&mut self, i: usize) -> bool {
        if i >= self.len {
            return false;
        }
        self.words[i / WORD_BITS] &= !(1 << (i % WORD_BITS));
        true
    }

    /// Out-of-range bits are neither set nor clear.
    pub fn is_set(&self, i: usize) -> bool {
        i < self.len && self.words[i / WORD_BITS] & (1 << (i % WORD_BITS)) != 0
    }

    pub fn is_clear(&self, i: usize) -> bool {
        i < self.len && !self.is_set(i)
    }

    /// First clear bit at or after `start`.
    pub fn find_clear(&self, start: usize) -> Option<usize> {
        self.find(start, |word| !word)
    }

    /// First set bit at or after `start`.
    pub fn find_set(&self, start: usize) -> Option<usize> {
        self.find(start, |word| word)
    }

    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|word| *word = 0);
    }

    pub fn toggle_all(&mut self) {
        self.words.iter_mut().for_each(|word| *word = !*word);
        self.mask_tail();
    }

    pub fn num_set(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn num_clear(&self) -> usize {
        self.len - self.num_set()
    }

    /// Copy the bits of `other`. Returns `false`, copying nothing, when the
    /// lengths differ.
    pub fn copy_from(&mut self, other: &Bitmap) -> bool {
        if self.len != other.len {
            return false;
        }
        self.words.copy_from_slice(&other.words);
        true
    }

    // `view` maps a word so that the wanted bits are ones
    fn find<F: Fn(u64) -> u64>(&self, start: usize, view: F) -> Option<usize> {
        if start >= self.len {
            return None;
        }
        let mut idx = start / WORD_BITS;
        // drop the bits below start in the first word
        let mut word = view(self.words[idx]) & (u64::MAX << (start % WORD_BITS));
        loop {
            if word != 0 {
                let bit = idx * WORD_BITS + word.trailing_zeros() as usize;
                return if bit < self.len { Some(bit) } else { None };
            }
            idx += 1;
            if idx == self.words.len() {
                return None;
            }
            word = view(self.words[idx]);
        }
    }

    // keep the unused high bits of the last word clear
    fn mask_tail(&mut self) {
        let used = self.len % WORD_BITS;
        if used != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1 << used) - 1;
            }
        }
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits: String = (0..self.len)
            .map(|i| if self.is_set(i) { '1' } else { '0' })
            .collect();
        write!(f, "Bitmap({})", bits)
    }
}

// Test:

#[cfg(test)]
mod test {
    use super::Bitmap;
    use proptest::prelude::*;

    #[test]
    fn search_from_start() {
        let mut bitmap = Bitmap::new(130);
        assert_eq!(bitmap.find_set(0), None);
        assert_eq!(bitmap.find_clear(0), Some(0));
        for i in [0, 1, 2, 64, 129] {
            assert!(bitmap.set(i));
        }
        assert_eq!(bitmap.find_clear(0), Some(3));
        assert_eq!(bitmap.find_set(3), Some(64));
        assert_eq!(bitmap.find_set(65), Some(129));
        assert_eq!(bitmap.find_set(130), None);
        assert_eq!(bitmap.find_clear(129), None);
        assert!(bitmap.clear(64));
        assert!(!bitmap.clear(130));
        assert_eq!(bitmap.find_set(3), Some(129));
        assert_eq!(bitmap.num_set(), 4);
        assert_eq!(bitmap.num_clear(), 126);
    }

    #[test]
    fn toggle_keeps_length() {
        let mut bitmap = Bitmap::new(70);
        bitmap.set(5);
        bitmap.toggle_all();
        assert_eq!(bitmap.num_set(), 69);
        assert!(bitmap.is_clear(5));
        assert!(!bitmap.is_clear(70));
        assert!(!bitmap.is_set(70));
        assert_eq!(bitmap.find_clear(0), Some(5));
        assert_eq!(bitmap.find_clear(6), None);

        let mut copy = Bitmap::new(70);
        assert!(copy.copy_from(&bitmap));
        assert_eq!(copy, bitmap);
        assert!(!Bitmap::new(71).copy_from(&bitmap));
        copy.clear_all();
        assert_eq!(copy.num_set(), 0);
        assert!(Bitmap::new(0).is_empty());
    }

    proptest! {
        #[test]
        fn agrees_with_bool_vector(bits in proptest::collection::vec(any::<bool>(), 0..300), start in 0usize..320) {
            let mut bitmap = Bitmap::new(bits.len());
            for (i, bit) in bits.iter().enumerate() {
                if *bit {
                    prop_assert!(bitmap.set(i));
                }
            }
            let expect_set = bits.iter().skip(start).position(|b| *b).map(|p| p + start);
            let expect_clear = bits.iter().skip(start).position(|b| !*b).map(|p| p + start);
            prop_assert_eq!(bitmap.find_set(start), expect_set);
            prop_assert_eq!(bitmap.find_clear(start), expect_clear);
            prop_assert_eq!(bitmap.num_set(), bits.iter().filter(|b| **b).count());
        }
    }
}
