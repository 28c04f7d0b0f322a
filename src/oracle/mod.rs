//! Per-database transaction oracle.
//!
//! One lock-free monotonic clock orders every read snapshot and commit
//! version; an active-transaction table maps each write handle to its commit
//! state. Commit versions are allocated by a second increment at commit time,
//! so visibility follows commit order even when writers commit in a different
//! order than they began.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, RwLock,
    },
};

use crate::{logging::tundra_log, mvcc::Timestamp};

/// Commit slot recorded for a write that has not committed yet.
const INFLIGHT: Timestamp = Timestamp::MAX;

/// Issues transaction timestamps and answers snapshot visibility.
///
/// The clock path is a single `fetch_add`; the active table takes a shared
/// lock for lookups and an exclusive lock for mutation, decoupled from the
/// clock so unrelated transactions never contend on it.
#[derive(Debug, Default)]
pub struct Oracle {
    now: AtomicU64,
    /// Open reader snapshots; the minimum bounds the prune watermark.
    readers: Mutex<BTreeSet<Timestamp>>,
    /// Write handle -> `INFLIGHT` or the final commit timestamp.
    active: RwLock<HashMap<Timestamp, Timestamp>>,
    /// Handles below this floor were committed and pruned.
    prune_floor: AtomicU64,
}

impl Oracle {
    /// Creates an oracle with its clock at [`Timestamp::MIN`].
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> Timestamp {
        Timestamp::new(self.now.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Fixes a reader's consistent view and registers it as open.
    ///
    /// The snapshot consumes a clock increment like any write would, keeping
    /// reads and writes on one ordered timeline. The returned guard releases
    /// the registration on drop; the minimum registered snapshot bounds how
    /// far [`Oracle::prune`] may advance.
    pub fn begin_read(&self) -> ReadGuard<'_> {
        // Tick inside the registration lock: the watermark must never pass a
        // snapshot that has been issued but not yet registered.
        let mut readers = self.readers.lock().unwrap();
        let ts = self.tick();
        readers.insert(ts);
        drop(readers);
        ReadGuard { oracle: self, ts }
    }

    /// Starts a write transaction.
    ///
    /// The handle is recorded in the active table as in-flight; committing
    /// the returned [`WriteTxn`] allocates a fresh timestamp and stamps it as
    /// the handle's commit version.
    pub fn begin_write(&self) -> WriteTxn<'_> {
        // Same discipline as `begin_read`: the prune floor must never pass a
        // handle that has been issued but not yet recorded as in-flight.
        let mut active = self.active.write().unwrap();
        let ts = self.tick();
        active.insert(ts, INFLIGHT);
        drop(active);
        WriteTxn {
            oracle: self,
            ts,
            committed: false,
        }
    }

    fn commit_write(&self, handle: Timestamp) -> Timestamp {
        let commit_ts = self.tick();
        self.active.write().unwrap().insert(handle, commit_ts);
        commit_ts
    }

    fn release_read(&self, ts: Timestamp) {
        let released = self.readers.lock().unwrap().remove(&ts);
        debug_assert!(released, "released a reader that was never registered");
    }

    /// Returns whether the write behind `handle` is visible at `snapshot`.
    ///
    /// Never errors: a handle missing from the active table is visible only
    /// when it lies below the prune floor, i.e. its write committed strictly
    /// before every snapshot that can still be observed.
    pub fn is_visible(&self, handle: Timestamp, snapshot: Timestamp) -> bool {
        {
            let active = self.active.read().unwrap();
            if let Some(&commit) = active.get(&handle) {
                return commit != INFLIGHT && commit <= snapshot;
            }
        }
        handle < Timestamp::new(self.prune_floor.load(Ordering::Acquire))
    }

    /// Timestamp below which every commit decision is settled.
    ///
    /// The minimum open reader snapshot, or one past the clock when no reader
    /// is open (any future snapshot will be larger).
    pub fn watermark(&self) -> Timestamp {
        self.readers
            .lock()
            .unwrap()
            .first()
            .copied()
            .unwrap_or_else(|| Timestamp::new(self.now.load(Ordering::Relaxed) + 1))
    }

    /// Garbage-collects active-table entries committed strictly before the
    /// watermark, returning how many were removed.
    ///
    /// In-flight entries are never pruned. The floor is published before any
    /// entry is removed so a concurrent lookup that misses the table still
    /// classifies the handle correctly.
    pub fn prune(&self) -> usize {
        let watermark = self.watermark();
        let mut active = self.active.write().unwrap();
        self.prune_floor.store(watermark.get(), Ordering::Release);
        let before = active.len();
        active.retain(|_, commit| *commit == INFLIGHT || *commit >= watermark);
        let removed = before - active.len();
        if removed > 0 {
            tundra_log!(
                log::Level::Debug,
                "oracle_prune",
                "removed={removed} floor={watermark}",
            );
        }
        removed
    }
}

/// Open reader registration; holds the snapshot that fixes the reader's view.
///
/// Dropping the guard releases the registration and lets the watermark
/// advance past the snapshot.
#[derive(Debug)]
pub struct ReadGuard<'a> {
    oracle: &'a Oracle,
    ts: Timestamp,
}

impl ReadGuard<'_> {
    /// The snapshot this reader evaluates visibility against.
    pub fn ts(&self) -> Timestamp {
        self.ts
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.oracle.release_read(self.ts);
    }
}

/// Handle for an in-flight write transaction.
///
/// [`WriteTxn::commit`] consumes the handle, enforcing at most one commit.
/// Dropping an uncommitted handle leaves the in-flight sentinel in place:
/// the write stays invisible forever and is never pruned.
#[derive(Debug)]
pub struct WriteTxn<'a> {
    oracle: &'a Oracle,
    ts: Timestamp,
    committed: bool,
}

impl WriteTxn<'_> {
    /// The handle writes are tagged with until commit.
    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    /// Commits the transaction, returning the commit version readers compare
    /// their snapshots against.
    pub fn commit(mut self) -> Timestamp {
        self.committed = true;
        self.oracle.commit_write(self.ts)
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.committed {
            tundra_log!(
                log::Level::Debug,
                "txn_abandoned",
                "handle={}",
                self.ts.get()
            );
        }
    }
}
