use crate::error::{StmError, StmResult};
use crate::tvar::{Value, VarCell};
use ahash::AHashMap;
use std::any::Any;
use std::cell::Cell;
use std::collections::hash_map::Entry;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// # HOW A SECTION COMMITS
// The scheme follows TL2. A global clock counts commits. A section samples
// the clock when it begins (its read version) and only accepts values whose
// version is not newer than that. When a newer value turns up, the section
// tries to move its read version forward: it samples the clock again and
// checks that nothing it has read so far changed; if that holds, the read is
// retried under the new read version, otherwise the section aborts.
//
// Commit of a section that wrote something:
// 1) lock the cells of the write set, in address order (no deadlocks among
//    committers); cells that were also read must still hold the read version
// 2) tick the clock to get the write version
// 3) unless the write version directly follows the read version (nobody
//    committed in between), probe every cell that was only read: it must be
//    unlocked and unchanged. Probes never block, so a committer never waits
//    on another committer while holding locks out of order
// 4) publish the values with the write version and release the locks
// A section that only read commits without doing anything: every value it
// saw was consistent at its read version.

static CLOCK: AtomicU64 = AtomicU64::new(0);

/// Current reading of the global version clock.
pub(crate) fn now() -> u64 {
    CLOCK.load(Ordering::Acquire)
}

/// Advance the global version clock, returning the new version.
pub(crate) fn tick() -> u64 {
    CLOCK.fetch_add(1, Ordering::AcqRel) + 1
}

thread_local!(static IN_SECTION: Cell<bool> = const { Cell::new(false) });

/// Marks the current thread as running a closure-scoped section, so a
/// nested `atomically` is caught instead of silently breaking atomicity.
struct SectionGuard;

impl SectionGuard {
    fn enter() -> Self {
        IN_SECTION.with(|flag| {
            assert!(!flag.get(), "atomic sections cannot be nested");
            flag.set(true);
        });
        SectionGuard
    }
}

impl Drop for SectionGuard {
    fn drop(&mut self) {
        IN_SECTION.with(|flag| flag.set(false));
    }
}

/// Where a section stands. A section starts `Open` and ends in exactly one
/// of the other two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionState {
    Open,
    Committed,
    Aborted,
}

struct LogEntry {
    cell: Arc<VarCell>,
    // version observed by the first read; None for blind writes
    read_version: Option<u64>,
    // the value as this section currently sees it
    value: Value,
    written: bool,
}

type Hook = Box<dyn FnOnce()>;
type FinishHook = Box<dyn FnOnce(SectionState)>;

/// An open atomic section.
///
/// `Transaction::begin()` opens a section, `commit()` tries to make its
/// writes visible all at once and `abort()` (or simply dropping the
/// transaction) throws them away. Container operations take the section as
/// `&mut Transaction` and return `StmResult`, so a conflict detected deep
/// inside a container travels back to the caller with `?`.
///
/// Most callers want the closure form instead, which also takes care of
/// panics and retries: see `run_transaction` and `atomically`.
///
/// ## Example:
/// ```
/// use stamp_stm::{TVar, Transaction};
///
/// let total = TVar::new(0u64);
///
/// let mut tx = Transaction::begin();
/// total.modify(&mut tx, |t| t + 5).unwrap();
/// tx.commit().unwrap();
///
/// let mut tx = Transaction::begin();
/// total.write(&mut tx, 100).unwrap();
/// tx.abort();
///
/// assert_eq!(total.read_atomic(), 5);
/// ```
pub struct Transaction {
    read_version: u64,
    log: AHashMap<usize, LogEntry>,
    on_commit: Vec<Hook>,
    on_abort: Vec<Hook>,
    on_finish: Vec<FinishHook>,
    state: SectionState,
}

impl Transaction {
    /// Open a section.
    ///
    /// Only closure-scoped sections (`run_transaction`, `atomically`) are
    /// tracked per thread. A section opened here is not, so beginning one
    /// inside a closure-scoped section is not caught: the two are
    /// independent sections, and the inner one commits or aborts on its
    /// own. Several explicit sections may be open on one thread at once.
    pub fn begin() -> Self {
        Self {
            read_version: now(),
            log: AHashMap::new(),
            on_commit: Vec::new(),
            on_abort: Vec::new(),
            on_finish: Vec::new(),
            state: SectionState::Open,
        }
    }

    /// Try to commit. On `Err` the section has been rolled back.
    pub fn commit(mut self) -> StmResult<()> {
        let result = self.try_commit();
        match result {
            Ok(()) => self.finish(SectionState::Committed),
            Err(_) => self.finish(SectionState::Aborted),
        }
        result
    }

    /// Discard everything the section did.
    pub fn abort(mut self) {
        self.finish(SectionState::Aborted);
    }

    /// Run `hook` once, after the section commits.
    pub fn on_commit<F: FnOnce() + 'static>(&mut self, hook: F) {
        self.on_commit.push(Box::new(hook));
    }

    /// Run `hook` once, after the section aborts (including when it is
    /// dropped or fails to commit).
    pub fn on_abort<F: FnOnce() + 'static>(&mut self, hook: F) {
        self.on_abort.push(Box::new(hook));
    }

    /// Run `hook` once with the final state, after the commit or abort
    /// hooks.
    pub fn on_finish<F: FnOnce(SectionState) + 'static>(&mut self, hook: F) {
        self.on_finish.push(Box::new(hook));
    }

    /// State of the section. A live `Transaction` is always `Open`; the
    /// final state is passed to the `on_finish` hooks.
    pub fn state(&self) -> SectionState {
        self.state
    }

    /// Whether the section has written nothing so far.
    pub fn is_read_only(&self) -> bool {
        !self.log.values().any(|entry| entry.written)
    }

    /// Number of distinct cells the section touched.
    pub fn footprint(&self) -> usize {
        self.log.len()
    }

    pub(crate) fn read(&mut self, cell: &Arc<VarCell>) -> StmResult<Value> {
        let addr = VarCell::addr(cell);
        if let Some(entry) = self.log.get(&addr) {
            return Ok(entry.value.clone());
        }
        let (version, value) = self.load(cell)?;
        self.log.insert(
            addr,
            LogEntry {
                cell: cell.clone(),
                read_version: Some(version),
                value: value.clone(),
                written: false,
            },
        );
        Ok(value)
    }

    pub(crate) fn write(&mut self, cell: &Arc<VarCell>, value: Value) -> StmResult<()> {
        match self.log.entry(VarCell::addr(cell)) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.value = value;
                entry.written = true;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LogEntry {
                    cell: cell.clone(),
                    read_version: None,
                    value,
                    written: true,
                });
            }
        }
        Ok(())
    }

    /// Committed (version, value) of a cell, consistent with the read
    /// version (which may get extended on the way).
    fn load(&mut self, cell: &Arc<VarCell>) -> StmResult<(u64, Value)> {
        let mut extended = false;
        loop {
            let (version, retired, value) = {
                let slot = cell.slot.read();
                (slot.version, slot.retired, slot.value.clone())
            };
            if retired {
                return Err(StmError::Conflict);
            }
            if version <= self.read_version {
                return Ok((version, value));
            }
            if extended {
                return Err(StmError::Conflict);
            }
            self.extend()?;
            extended = true;
        }
    }

    /// Move the read version to the present if everything read so far is
    /// still current.
    fn extend(&mut self) -> StmResult<()> {
        let present = now();
        self.validate_reads(false)?;
        self.read_version = present;
        Ok(())
    }

    /// Probe cells that were read. With `skip_written`, cells in the write
    /// set are skipped (the committer holds their locks and has checked
    /// them already).
    fn validate_reads(&self, skip_written: bool) -> StmResult<()> {
        for entry in self.log.values() {
            let expected = match entry.read_version {
                Some(version) => version,
                None => continue,
            };
            if skip_written && entry.written {
                continue;
            }
            let slot = match entry.cell.slot.try_read() {
                Some(slot) => slot,
                None => return Err(StmError::Conflict),
            };
            if slot.retired || slot.version != expected {
                return Err(StmError::Conflict);
            }
        }
        Ok(())
    }

    fn try_commit(&self) -> StmResult<()> {
        let mut writes: Vec<&LogEntry> = self.log.values().filter(|entry| entry.written).collect();
        if writes.is_empty() {
            return Ok(());
        }
        writes.sort_unstable_by_key(|entry| VarCell::addr(&entry.cell));

        let mut locked = Vec::with_capacity(writes.len());
        for entry in writes.iter() {
            let slot = entry.cell.slot.write();
            if slot.retired {
                return Err(StmError::Conflict);
            }
            if let Some(expected) = entry.read_version {
                if slot.version != expected {
                    return Err(StmError::Conflict);
                }
            }
            locked.push(slot);
        }

        let write_version = tick();
        if write_version != self.read_version + 1 {
            self.validate_reads(true)?;
        }

        for (entry, slot) in writes.iter().zip(locked.iter_mut()) {
            slot.value = entry.value.clone();
            slot.version = write_version;
        }
        Ok(())
    }

    fn finish(&mut self, state: SectionState) {
        self.state = state;
        self.log.clear();
        let (run, drop_hooks) = match state {
            SectionState::Committed => (
                std::mem::take(&mut self.on_commit),
                std::mem::take(&mut self.on_abort),
            ),
            _ => (
                std::mem::take(&mut self.on_abort),
                std::mem::take(&mut self.on_commit),
            ),
        };
        drop(drop_hooks);
        for hook in run {
            hook();
        }
        for hook in std::mem::take(&mut self.on_finish) {
            hook(state);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == SectionState::Open {
            self.finish(SectionState::Aborted);
        }
    }
}

/// Abort the current section on purpose.
///
/// Typical use is business logic deciding that the attempt is invalid:
/// `if !done { return cancel(); }`. Under `atomically` the section is then
/// rolled back and re-run from the start.
pub fn cancel<T>() -> StmResult<T> {
    Err(StmError::Cancelled)
}

/// Cancel the section unless `condition` holds.
pub fn guard(condition: bool) -> StmResult<()> {
    if condition {
        Ok(())
    } else {
        cancel()
    }
}

pub(crate) type Attempt<T> = Result<StmResult<T>, Box<dyn Any + Send>>;

/// One attempt at a closure-scoped section. The outer `Err` carries the
/// payload of a panic raised by `f`, after the section was rolled back.
pub(crate) fn attempt<T, F>(f: F) -> Attempt<T>
where
    F: FnOnce(&mut Transaction) -> StmResult<T>,
{
    let _section = SectionGuard::enter();
    let mut tx = Transaction::begin();
    match panic::catch_unwind(AssertUnwindSafe(|| f(&mut tx))) {
        Ok(Ok(value)) => Ok(tx.commit().map(|()| value)),
        Ok(Err(err)) => {
            tx.abort();
            Ok(Err(err))
        }
        Err(payload) => {
            tx.abort();
            Err(payload)
        }
    }
}

/// Run `f` as a single section attempt.
///
/// Returns `Ok` if the section committed. Any `Err` means none of its
/// effects are visible: the closure returned an error, the commit found a
/// conflict, or the closure panicked (`StmError::Panicked`). There is no
/// retry here; wrap the call in a loop or use `atomically`.
pub fn run_transaction<T, F>(f: F) -> StmResult<T>
where
    F: FnOnce(&mut Transaction) -> StmResult<T>,
{
    match attempt(f) {
        Ok(result) => result,
        Err(payload) => Err(StmError::Panicked(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// Test:
#[cfg(test)]
mod test {
    use super::{cancel, guard, run_transaction, SectionState, Transaction};
    use crate::error::StmError;
    use crate::tvar::TVar;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn stale_read_fails_commit() {
        let var = TVar::new(0u32);
        let mut slow = Transaction::begin();
        let seen = var.read(&mut slow).unwrap();

        let mut fast = Transaction::begin();
        var.write(&mut fast, 7).unwrap();
        fast.commit().unwrap();

        var.write(&mut slow, seen + 1).unwrap();
        assert_eq!(slow.commit(), Err(StmError::Conflict));
        assert_eq!(var.read_atomic(), 7);
    }

    #[test]
    fn newer_value_extends_when_nothing_changed() {
        let a = TVar::new(1u32);
        let b = TVar::new(2u32);
        let mut tx = Transaction::begin();
        assert_eq!(a.read(&mut tx).unwrap(), 1);

        // b changes after tx began, a does not: tx can move forward
        b.write_atomic(20);
        assert_eq!(b.read(&mut tx).unwrap(), 20);
        tx.commit().unwrap();
    }

    #[test]
    fn newer_value_aborts_when_earlier_read_changed() {
        let a = TVar::new(1u32);
        let b = TVar::new(2u32);
        let mut tx = Transaction::begin();
        assert_eq!(a.read(&mut tx).unwrap(), 1);

        let mut other = Transaction::begin();
        a.write(&mut other, 10).unwrap();
        b.write(&mut other, 20).unwrap();
        other.commit().unwrap();

        // reading b would mix the old a with the new b
        assert_eq!(b.read(&mut tx), Err(StmError::Conflict));
    }

    #[test]
    fn blind_writes_do_not_conflict() {
        let var = TVar::new(0u8);
        let mut first = Transaction::begin();
        let mut second = Transaction::begin();
        var.write(&mut first, 1).unwrap();
        var.write(&mut second, 2).unwrap();
        first.commit().unwrap();
        second.commit().unwrap();
        assert_eq!(var.read_atomic(), 2);
    }

    #[test]
    fn disjoint_sections_both_commit() {
        let a = TVar::new(0u32);
        let b = TVar::new(0u32);
        let mut left = Transaction::begin();
        let mut right = Transaction::begin();
        a.modify(&mut left, |x| x + 1).unwrap();
        b.modify(&mut right, |x| x + 1).unwrap();
        right.commit().unwrap();
        left.commit().unwrap();
        assert_eq!((a.read_atomic(), b.read_atomic()), (1, 1));
    }

    #[test]
    fn hooks_follow_the_outcome() {
        let journal = Rc::new(RefCell::new(Vec::new()));

        let mut tx = Transaction::begin();
        let j = journal.clone();
        tx.on_commit(move || j.borrow_mut().push("commit"));
        let j = journal.clone();
        tx.on_abort(move || j.borrow_mut().push("abort"));
        tx.commit().unwrap();

        let mut tx = Transaction::begin();
        let j = journal.clone();
        tx.on_commit(move || j.borrow_mut().push("commit 2"));
        let j = journal.clone();
        tx.on_abort(move || j.borrow_mut().push("abort 2"));
        drop(tx);

        assert_eq!(*journal.borrow(), vec!["commit", "abort 2"]);
    }

    #[test]
    fn closure_form() {
        let var = TVar::new(5i64);
        let doubled = run_transaction(|tx| {
            let v = var.read(tx)?;
            var.write(tx, v * 2)?;
            Ok(v * 2)
        });
        assert_eq!(doubled, Ok(10));

        let cancelled: Result<(), _> = run_transaction(|tx| {
            var.write(tx, 0)?;
            guard(false)
        });
        assert_eq!(cancelled, Err(StmError::Cancelled));
        assert_eq!(var.read_atomic(), 10);

        let explicit: Result<(), _> = run_transaction(|_| cancel());
        assert_eq!(explicit, Err(StmError::Cancelled));
    }

    #[test]
    fn panic_is_rolled_back() {
        let var = TVar::new(1u8);
        let result: Result<(), _> = run_transaction(|tx| {
            var.write(tx, 2)?;
            panic!("domain bug");
        });
        assert_eq!(result, Err(StmError::Panicked("domain bug".to_string())));
        assert_eq!(var.read_atomic(), 1);
        // the thread is usable for sections again
        assert_eq!(run_transaction(|tx| var.read(tx)), Ok(1));
    }

    #[test]
    fn nesting_is_rejected() {
        let result = run_transaction(|_| run_transaction(|_| Ok(())));
        match result {
            Err(StmError::Panicked(message)) => assert!(message.contains("nested")),
            other => panic!("nested section went through: {:?}", other),
        }
        // the guard was released by the outer section
        assert_eq!(run_transaction(|_| Ok(1)), Ok(1));
    }

    #[test]
    fn final_state_reaches_on_finish() {
        let var = TVar::new(0u32);
        let states = Rc::new(RefCell::new(Vec::new()));
        let record = |tx: &mut Transaction| {
            assert_eq!(tx.state(), SectionState::Open);
            let states = states.clone();
            tx.on_finish(move |state| states.borrow_mut().push(state));
        };

        let mut tx = Transaction::begin();
        record(&mut tx);
        var.write(&mut tx, 1).unwrap();
        tx.commit().unwrap();

        let mut tx = Transaction::begin();
        record(&mut tx);
        tx.abort();

        let mut stale = Transaction::begin();
        record(&mut stale);
        let seen = var.read(&mut stale).unwrap();
        var.write_atomic(5);
        var.write(&mut stale, seen + 1).unwrap();
        assert_eq!(stale.commit(), Err(StmError::Conflict));

        let mut tx = Transaction::begin();
        record(&mut tx);
        drop(tx);

        assert_eq!(
            *states.borrow(),
            vec![
                SectionState::Committed,
                SectionState::Aborted,
                SectionState::Aborted,
                SectionState::Aborted
            ]
        );
    }

    #[test]
    fn explicit_section_inside_closure_is_independent() {
        let outer = TVar::new(0u32);
        let inner = TVar::new(0u32);
        let result: Result<(), _> = run_transaction(|tx| {
            outer.write(tx, 1)?;
            let mut explicit = Transaction::begin();
            inner.write(&mut explicit, 2)?;
            explicit.commit()?;
            cancel()
        });
        assert_eq!(result, Err(StmError::Cancelled));
        // the explicit section committed on its own
        assert_eq!((outer.read_atomic(), inner.read_atomic()), (0, 2));
    }
}
