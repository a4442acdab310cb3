//! Transactional containers and an atomic-section runtime for
//! high-contention benchmark workloads.
//!
//! Every shared container here is assembled from [`TVar`] cells, and every
//! operation on a shared container runs inside an atomic section
//! ([`Transaction`]). A section either commits all of its writes at once or
//! leaves no trace; sections that touch disjoint data commit side by side.
//!
//! ```
//! use stamp_stm::{atomically, TMap};
//!
//! let free_cars: TMap<u32, u32> = TMap::new();
//! atomically(|tx| free_cars.insert(tx, 7, 1));
//!
//! // reserve the last car, if still available
//! let reserved = atomically(|tx| {
//!     let left = free_cars.find(tx, &7)?.unwrap_or(0);
//!     if left == 0 {
//!         return Ok(false);
//!     }
//!     free_cars.update(tx, 7, left - 1)?;
//!     Ok(true)
//! });
//! assert!(reserved);
//! ```

pub mod arena;
pub mod bitmap;
pub mod bptree;
pub mod comparator;
pub mod config;
pub mod error;
pub mod queue;
pub mod rng;
pub mod runtime;
pub mod theap;
pub mod tlist;
pub mod tmap;
pub mod tqueue;
pub mod transaction;
pub mod tvar;

pub use arena::{Handle, TArena};
pub use bitmap::Bitmap;
pub use comparator::Comparator;
pub use config::{Config, RetryPolicy};
pub use error::{StmError, StmResult};
pub use runtime::{atomically, try_atomically, Runtime, StatsSnapshot};
pub use theap::THeap;
pub use tlist::{Duplicates, TList};
pub use tmap::TMap;
pub use tqueue::TQueue;
pub use transaction::{cancel, guard, run_transaction, SectionState, Transaction};
pub use tvar::TVar;
