/// How a `Runtime` re-runs sections that did not commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Give up after this many attempts (`try_atomically` only).
    /// `None` retries forever, which is what the benchmarks expect.
    pub max_attempts: Option<u64>,
    /// Spin/yield between attempts to let the winner of a conflict finish.
    pub backoff: bool,
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub retry: RetryPolicy,
    /// Log a warning once a single section has been retried this often.
    pub contention_warn_after: u64,
    /// Count commits and aborts by cause.
    pub collect_stats: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Config {
    /// Retry forever with backoff.
    pub const fn unbounded() -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: None,
                backoff: true,
            },
            contention_warn_after: 10_000,
            collect_stats: true,
        }
    }

    /// Give up after `attempts` attempts.
    pub const fn bounded(attempts: u64) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: Some(attempts),
                backoff: true,
            },
            contention_warn_after: 10_000,
            collect_stats: true,
        }
    }

    pub fn with_backoff(mut self, backoff: bool) -> Self {
        self.retry.backoff = backoff;
        self
    }

    pub fn with_stats(mut self, collect: bool) -> Self {
        self.collect_stats = collect;
        self
    }

    pub fn with_contention_warning(mut self, attempts: u64) -> Self {
        self.contention_warn_after = attempts;
        self
    }
}
