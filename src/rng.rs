use rand::rngs::StdRng;
use rand::{Error, RngCore, SeedableRng};

/// A deterministic generator for workload randomisation.
///
/// The seed always comes from the caller (a thread id, a command line
/// argument), never from the environment, so two runs with the same seeds
/// shuffle their work lists identically.
///
/// `SeededRng` must not be advanced inside an atomic section: a retried
/// section would draw different numbers on every attempt.
///
/// ## Example:
/// ```
/// use stamp_stm::rng::SeededRng;
///
/// let mut a = SeededRng::new(7);
/// let mut b = SeededRng::new(7);
/// assert_eq!(a.below(100), b.below(100));
/// ```
#[derive(Debug, Clone)]
pub struct SeededRng {
    inner: StdRng,
    seed: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Restart the sequence from the original seed.
    pub fn reset(&mut self) {
        self.inner = StdRng::seed_from_u64(self.seed);
    }

    /// A value in `0..bound` (`bound` must be positive), taken as the plain
    /// remainder of the next output.
    pub fn below(&mut self, bound: u64) -> u64 {
        debug_assert!(bound > 0);
        self.inner.next_u64() % bound
    }
}

impl RngCore for SeededRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.inner.try_fill_bytes(dest)
    }
}

// Test:

#[cfg(test)]
mod test {
    use super::SeededRng;
    use rand::Rng;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SeededRng::new(42);
        let mut b = SeededRng::new(42);
        for _ in 0..1000 {
            assert_eq!(a.gen_range(0..1_000_000u64), b.gen_range(0..1_000_000u64));
        }
    }

    #[test]
    fn reset_replays() {
        let mut rng = SeededRng::new(3);
        let first: Vec<u64> = (0..16).map(|_| rng.below(50)).collect();
        rng.reset();
        let again: Vec<u64> = (0..16).map(|_| rng.below(50)).collect();
        assert_eq!(first, again);
        assert!(first.iter().all(|x| *x < 50));
        assert_eq!(rng.seed(), 3);
    }
}
