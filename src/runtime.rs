use crate::config::Config;
use crate::error::{StmError, StmResult};
use crate::transaction::{self, Transaction};
use crossbeam::utils::Backoff;
use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tracing::{trace, warn};

#[derive(Debug, Default)]
struct Stats {
    commits: AtomicU64,
    conflicts: AtomicU64,
    cancels: AtomicU64,
    exhausted: AtomicU64,
    panics: AtomicU64,
}

/// Counters of a `Runtime`, read at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub commits: u64,
    pub conflicts: u64,
    pub cancels: u64,
    pub exhausted: u64,
    pub panics: u64,
}

impl StatsSnapshot {
    /// Attempts that did not commit, whatever the cause.
    pub fn aborts(&self) -> u64 {
        self.conflicts + self.cancels + self.exhausted + self.panics
    }
}

/// Runs closure-scoped sections with a retry loop.
///
/// A runtime does not own any shared state: sections run by different
/// runtimes still see each other's commits. What a runtime holds is the
/// retry policy and the statistics of the sections it ran.
///
/// ## Example:
/// ```
/// use stamp_stm::{Config, Runtime, StmError, TVar};
///
/// let runtime = Runtime::new(Config::bounded(3));
/// let stock = TVar::new(0u32);
///
/// // nothing to take: the section cancels itself every time
/// let taken = runtime.try_atomically(|tx| {
///     let left = stock.read(tx)?;
///     stamp_stm::guard(left > 0)?;
///     stock.write(tx, left - 1)
/// });
/// assert_eq!(taken, Err(StmError::RetryLimit { attempts: 3 }));
/// assert_eq!(runtime.stats().cancels, 3);
/// ```
#[derive(Debug, Default)]
pub struct Runtime {
    config: Config,
    stats: Stats,
}

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

impl Runtime {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stats: Stats::default(),
        }
    }

    /// The runtime behind the free `atomically` and `try_atomically`.
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(Runtime::default)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `f` until it commits and return its result.
    ///
    /// Every `Err` coming out of an attempt (conflict, cancel, resource
    /// exhaustion) rolls the attempt back and starts a fresh one; the
    /// attempt limit of the retry policy is not consulted. A panic in `f`
    /// rolls the attempt back and then continues unwinding.
    pub fn atomically<T, F>(&self, f: F) -> T
    where
        F: Fn(&mut Transaction) -> StmResult<T>,
    {
        let backoff = Backoff::new();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match transaction::attempt(&f) {
                Ok(Ok(value)) => {
                    self.record_commit();
                    return value;
                }
                Ok(Err(err)) => self.record_abort(&err, attempts),
                Err(payload) => {
                    self.count(&self.stats.panics);
                    panic::resume_unwind(payload);
                }
            }
            if self.config.retry.backoff {
                backoff.snooze();
            }
        }
    }

    /// Run `f` until it commits, it returns a non-retryable error, or the
    /// retry policy runs out of attempts (`StmError::RetryLimit`). A panic
    /// in `f` is returned as `StmError::Panicked`.
    pub fn try_atomically<T, F>(&self, f: F) -> StmResult<T>
    where
        F: Fn(&mut Transaction) -> StmResult<T>,
    {
        let backoff = Backoff::new();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match transaction::attempt(&f) {
                Ok(Ok(value)) => {
                    self.record_commit();
                    return Ok(value);
                }
                Ok(Err(err)) => {
                    self.record_abort(&err, attempts);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                }
                Err(payload) => {
                    self.count(&self.stats.panics);
                    let message = transaction::panic_message(payload.as_ref());
                    trace!(attempts, %message, "section panicked");
                    return Err(StmError::Panicked(message));
                }
            }
            if let Some(limit) = self.config.retry.max_attempts {
                if attempts >= limit {
                    return Err(StmError::RetryLimit { attempts });
                }
            }
            if self.config.retry.backoff {
                backoff.snooze();
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            commits: self.stats.commits.load(Ordering::Relaxed),
            conflicts: self.stats.conflicts.load(Ordering::Relaxed),
            cancels: self.stats.cancels.load(Ordering::Relaxed),
            exhausted: self.stats.exhausted.load(Ordering::Relaxed),
            panics: self.stats.panics.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        for counter in [
            &self.stats.commits,
            &self.stats.conflicts,
            &self.stats.cancels,
            &self.stats.exhausted,
            &self.stats.panics,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn record_commit(&self) {
        self.count(&self.stats.commits);
    }

    fn record_abort(&self, err: &StmError, attempts: u64) {
        match err {
            StmError::Conflict => self.count(&self.stats.conflicts),
            StmError::Cancelled => self.count(&self.stats.cancels),
            StmError::ResourceExhausted => self.count(&self.stats.exhausted),
            StmError::Panicked(_) => self.count(&self.stats.panics),
            StmError::RetryLimit { .. } => {}
        }
        trace!(attempts, cause = %err, "section aborted");
        if attempts == self.config.contention_warn_after {
            warn!(attempts, "section keeps aborting, likely heavy contention");
        }
    }

    fn count(&self, counter: &AtomicU64) {
        if self.config.collect_stats {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Run `f` on the global runtime until it commits. See
/// [`Runtime::atomically`].
pub fn atomically<T, F>(f: F) -> T
where
    F: Fn(&mut Transaction) -> StmResult<T>,
{
    Runtime::global().atomically(f)
}

/// Run `f` on the global runtime. See [`Runtime::try_atomically`].
pub fn try_atomically<T, F>(f: F) -> StmResult<T>
where
    F: Fn(&mut Transaction) -> StmResult<T>,
{
    Runtime::global().try_atomically(f)
}

// Test:
