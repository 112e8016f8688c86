//! # Vertex Lock Manager
//!
//! Every vertex owns a [`VertexLock`]: a small record guarded by a mutex,
//! plus a condition variable that waiters park on.
//!
//! | Request | Blocks on | Re-entry by the holder |
//! |---------|-----------|------------------------|
//! | `Readonly` | another thread's `Writable` | nested reader, or writable recursion |
//! | `Writable` | any other holder | writable recursion; fails if the caller only reads |
//!
//! Re-entry is counted per thread in the lock record itself and is bounded
//! by the manager's recursion limit. Multi-vertex acquisition sorts by
//! [`Lockable::ordinal`] so two threads never wait on each other in a cycle.
//!
//! Guards are bound to the thread that acquired them (`!Send`) and release
//! on drop.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{AccessError, Error, Result};

/// Upper bound applied to caller timeouts before computing deadlines.
const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 3600);

/// Access mode of a vertex lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    None,
    Readonly,
    Writable,
}

// ============================================================================
// Lock record
// ============================================================================

#[derive(Debug)]
struct LockRecord {
    mode: LockMode,
    writer: Option<ThreadId>,
    /// Writable recursion depth of `writer`.
    recursion: u8,
    /// Reader threads and their nesting depth.
    readers: SmallVec<[(ThreadId, u8); 4]>,
}

impl Default for LockRecord {
    fn default() -> Self {
        Self {
            mode: LockMode::None,
            writer: None,
            recursion: 0,
            readers: SmallVec::new(),
        }
    }
}

/// Per-vertex lock state.
#[derive(Debug, Default)]
pub struct VertexLock {
    record: Mutex<LockRecord>,
    released: Condvar,
}

impl VertexLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> LockMode {
        self.record.lock().mode
    }

    /// Mode the current thread holds this lock in, if any.
    pub fn held_by_current(&self) -> Option<LockMode> {
        let me = thread::current().id();
        let rec = self.record.lock();
        if rec.writer == Some(me) {
            Some(LockMode::Writable)
        } else if rec.readers.iter().any(|(t, _)| *t == me) {
            Some(LockMode::Readonly)
        } else {
            None
        }
    }

    pub fn reader_count(&self) -> usize {
        self.record.lock().readers.len()
    }

    /// Park until `blocked` turns false or the deadline passes.
    fn wait_while(
        &self,
        rec: &mut MutexGuard<'_, LockRecord>,
        deadline: Instant,
        blocked: impl Fn(&LockRecord) -> bool,
    ) -> bool {
        while blocked(&**rec) {
            if Instant::now() >= deadline {
                return false;
            }
            self.released.wait_until(rec, deadline);
        }
        true
    }
}

/// Anything that embeds a [`VertexLock`].
pub trait Lockable {
    fn vertex_lock(&self) -> &VertexLock;
    /// Canonical acquisition order.
    fn ordinal(&self) -> u128;
    /// Identity reported in errors.
    fn describe(&self) -> String;
}

// ============================================================================
// LockManager
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Held {
    Reader,
    Writer,
}

/// Graph-wide lock policy: recursion ceiling, default timeout and the
/// read-only flag that rejects new writable access.
#[derive(Debug)]
pub struct LockManager {
    recursion_limit: u8,
    default_timeout: Duration,
    readonly: AtomicBool,
    /// Outermost writable locks currently held.
    writers: AtomicUsize,
    idle: Mutex<()>,
    idle_signal: Condvar,
}

impl LockManager {
    pub fn new(recursion_limit: u8, default_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            recursion_limit: recursion_limit.max(1),
            default_timeout,
            readonly: AtomicBool::new(false),
            writers: AtomicUsize::new(0),
            idle: Mutex::new(()),
            idle_signal: Condvar::new(),
        })
    }

    pub fn recursion_limit(&self) -> u8 {
        self.recursion_limit
    }

    /// Resolve an optional timeout against the default.
    pub fn resolve(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.default_timeout).min(MAX_WAIT)
    }

    pub fn deadline(&self, timeout: Option<Duration>) -> Instant {
        Instant::now() + self.resolve(timeout)
    }

    pub fn acquire<T: Lockable>(
        self: &Arc<Self>,
        item: Arc<T>,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<LockGuard<T>> {
        let deadline = self.deadline(timeout);
        self.acquire_until(item, mode, deadline)
    }

    pub fn acquire_until<T: Lockable>(
        self: &Arc<Self>,
        item: Arc<T>,
        mode: LockMode,
        deadline: Instant,
    ) -> Result<LockGuard<T>> {
        let held = {
            let lock = item.vertex_lock();
            let mut rec = lock.record.lock();
            match mode {
                LockMode::Readonly => self.lock_readonly(&*item, lock, &mut rec, deadline)?,
                LockMode::Writable => self.lock_writable(&*item, lock, &mut rec, deadline)?,
                LockMode::None => return Err(AccessError::NotHeld.into()),
            }
        };
        Ok(LockGuard {
            manager: Arc::clone(self),
            item,
            held,
            _thread_bound: PhantomData,
        })
    }

    /// Acquire every item or none. Items are locked in ascending ordinal
    /// order and the guards are returned in that order. A duplicate item is
    /// a vertex error; any acquisition failure releases what was taken.
    pub fn acquire_many<T: Lockable>(
        self: &Arc<Self>,
        mut items: Vec<Arc<T>>,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<Vec<LockGuard<T>>> {
        items.sort_by_key(|item| item.ordinal());
        if let Some(pair) = items.windows(2).find(|w| w[0].ordinal() == w[1].ordinal()) {
            return Err(Error::Vertex(format!(
                "duplicate vertex '{}' in request",
                pair[0].describe()
            )));
        }
        let deadline = self.deadline(timeout);
        let mut guards = Vec::with_capacity(items.len());
        for item in items {
            // Guards taken so far drop on the error path.
            guards.push(self.acquire_until(item, mode, deadline)?);
        }
        Ok(guards)
    }

    fn lock_readonly<T: Lockable>(
        &self,
        item: &T,
        lock: &VertexLock,
        rec: &mut MutexGuard<'_, LockRecord>,
        deadline: Instant,
    ) -> Result<Held> {
        let me = thread::current().id();
        if rec.writer == Some(me) {
            self.recurse(item, &mut rec.recursion)?;
            return Ok(Held::Writer);
        }
        let limit = self.recursion_limit;
        if let Some(entry) = rec.readers.iter_mut().find(|(t, _)| *t == me) {
            if entry.1 >= limit {
                return Err(AccessError::RecursionLimit { vertex: item.describe() }.into());
            }
            entry.1 += 1;
            return Ok(Held::Reader);
        }
        if !lock.wait_while(rec, deadline, |r| r.mode == LockMode::Writable) {
            tracing::debug!(vertex = %item.describe(), "readonly acquisition timed out");
            return Err(AccessError::Timeout { vertex: item.describe(), mode: LockMode::Readonly }.into());
        }
        rec.mode = LockMode::Readonly;
        rec.readers.push((me, 1));
        Ok(Held::Reader)
    }

    fn lock_writable<T: Lockable>(
        &self,
        item: &T,
        lock: &VertexLock,
        rec: &mut MutexGuard<'_, LockRecord>,
        deadline: Instant,
    ) -> Result<Held> {
        let me = thread::current().id();
        if rec.writer == Some(me) {
            self.recurse(item, &mut rec.recursion)?;
            return Ok(Held::Writer);
        }
        if rec.readers.iter().any(|(t, _)| *t == me) {
            return Err(AccessError::Locked { vertex: item.describe() }.into());
        }
        self.enter_writer()?;
        if !lock.wait_while(rec, deadline, |r| r.mode != LockMode::None) {
            self.leave_writer();
            tracing::debug!(vertex = %item.describe(), "writable acquisition timed out");
            return Err(AccessError::Timeout { vertex: item.describe(), mode: LockMode::Writable }.into());
        }
        rec.mode = LockMode::Writable;
        rec.writer = Some(me);
        rec.recursion = 1;
        Ok(Held::Writer)
    }

    fn recurse<T: Lockable>(&self, item: &T, depth: &mut u8) -> Result<()> {
        if *depth >= self.recursion_limit {
            return Err(AccessError::RecursionLimit { vertex: item.describe() }.into());
        }
        *depth += 1;
        Ok(())
    }

    fn release(&self, lock: &VertexLock, held: Held) {
        let me = thread::current().id();
        let mut rec = lock.record.lock();
        match held {
            Held::Writer => {
                rec.recursion = rec.recursion.saturating_sub(1);
                if rec.recursion == 0 {
                    rec.mode = LockMode::None;
                    rec.writer = None;
                    drop(rec);
                    lock.released.notify_all();
                    self.leave_writer();
                }
            }
            Held::Reader => {
                if let Some(pos) = rec.readers.iter().position(|(t, _)| *t == me) {
                    rec.readers[pos].1 -= 1;
                    if rec.readers[pos].1 == 0 {
                        rec.readers.swap_remove(pos);
                    }
                }
                if rec.readers.is_empty() {
                    rec.mode = LockMode::None;
                    drop(rec);
                    lock.released.notify_all();
                }
            }
        }
    }

    // ========================================================================
    // Graph-wide read-only flag
    // ========================================================================

    fn enter_writer(&self) -> Result<()> {
        self.writers.fetch_add(1, Ordering::SeqCst);
        if self.readonly.load(Ordering::SeqCst) {
            self.leave_writer();
            return Err(AccessError::ReadonlyGraph.into());
        }
        Ok(())
    }

    fn leave_writer(&self) {
        if self.writers.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _idle = self.idle.lock();
            self.idle_signal.notify_all();
        }
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly.load(Ordering::SeqCst)
    }

    /// Fail fast for mutating entry points.
    pub fn check_writable(&self) -> Result<()> {
        if self.is_readonly() {
            return Err(AccessError::ReadonlyGraph.into());
        }
        Ok(())
    }

    /// Raise the read-only flag and wait for outstanding writable locks to
    /// drain. The flag is lowered again if they do not drain in time.
    pub fn set_readonly(&self, graph: &str, timeout: Option<Duration>) -> Result<()> {
        self.readonly.store(true, Ordering::SeqCst);
        let deadline = self.deadline(timeout);
        let mut idle = self.idle.lock();
        while self.writers.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                drop(idle);
                self.readonly.store(false, Ordering::SeqCst);
                return Err(AccessError::Timeout { vertex: graph.to_string(), mode: LockMode::Writable }.into());
            }
            self.idle_signal.wait_until(&mut idle, deadline);
        }
        tracing::info!(graph = %graph, "graph is now readonly");
        Ok(())
    }

    pub fn clear_readonly(&self, graph: &str) {
        if self.readonly.swap(false, Ordering::SeqCst) {
            tracing::info!(graph = %graph, "graph is writable again");
        }
    }

    pub fn writers(&self) -> usize {
        self.writers.load(Ordering::SeqCst)
    }
}

// ============================================================================
// LockGuard
// ============================================================================

/// Result of relaxing a guard.
pub enum Relaxed<T: Lockable> {
    /// The guard now holds readonly access.
    Readonly(LockGuard<T>),
    /// An inner writable recursion level was closed instead.
    Closed,
}

/// Held access to one lockable item. Released on drop.
pub struct LockGuard<T: Lockable> {
    manager: Arc<LockManager>,
    item: Arc<T>,
    held: Held,
    _thread_bound: PhantomData<*const ()>,
}

impl<T: Lockable> LockGuard<T> {
    pub fn item(&self) -> &Arc<T> {
        &self.item
    }

    /// Effective mode. A readonly request nested inside writable access
    /// reports `Writable`.
    pub fn mode(&self) -> LockMode {
        match self.held {
            Held::Reader => LockMode::Readonly,
            Held::Writer => LockMode::Writable,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.held == Held::Writer
    }

    /// Nesting depth of the current thread's hold on this item.
    pub fn recursion(&self) -> u8 {
        let me = thread::current().id();
        let rec = self.item.vertex_lock().record.lock();
        match self.held {
            Held::Writer => rec.recursion,
            Held::Reader => rec
                .readers
                .iter()
                .find(|(t, _)| *t == me)
                .map(|(_, n)| *n)
                .unwrap_or(0),
        }
    }

    pub fn is_outermost(&self) -> bool {
        self.recursion() == 1
    }

    /// READONLY → WRITABLE. Only succeeds when the caller is the sole
    /// reader and holds a single level.
    pub fn escalate(&mut self) -> Result<()> {
        if self.held == Held::Writer {
            return Ok(());
        }
        let me = thread::current().id();
        let lock = self.item.vertex_lock();
        let mut rec = lock.record.lock();
        let sole = rec.readers.len() == 1 && rec.readers[0] == (me, 1);
        if !sole {
            return Err(AccessError::EscalationDenied { vertex: self.item.describe() }.into());
        }
        self.manager.enter_writer()?;
        rec.readers.clear();
        rec.mode = LockMode::Writable;
        rec.writer = Some(me);
        rec.recursion = 1;
        self.held = Held::Writer;
        Ok(())
    }

    /// WRITABLE → READONLY, or close one writable level when the thread
    /// holds more than one.
    pub fn relax(mut self) -> Relaxed<T> {
        if self.held == Held::Reader {
            return Relaxed::Readonly(self);
        }
        let me = thread::current().id();
        {
            let lock = self.item.vertex_lock();
            let mut rec = lock.record.lock();
            if rec.recursion > 1 {
                drop(rec);
                drop(self);
                return Relaxed::Closed;
            }
            rec.mode = LockMode::Readonly;
            rec.writer = None;
            rec.recursion = 0;
            rec.readers.clear();
            rec.readers.push((me, 1));
            drop(rec);
            lock.released.notify_all();
        }
        self.manager.leave_writer();
        self.held = Held::Reader;
        Relaxed::Readonly(self)
    }
}

impl<T: Lockable> Drop for LockGuard<T> {
    fn drop(&mut self) {
        self.manager.release(self.item.vertex_lock(), self.held);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct Item {
        n: u128,
        lock: VertexLock,
    }

    impl Lockable for Item {
        fn vertex_lock(&self) -> &VertexLock { &self.lock }
        fn ordinal(&self) -> u128 { self.n }
        fn describe(&self) -> String { format!("item{}", self.n) }
    }

    fn item(n: u128) -> Arc<Item> {
        Arc::new(Item { n, lock: VertexLock::new() })
    }

    fn ms(n: u64) -> Option<Duration> {
        Some(Duration::from_millis(n))
    }

    #[test]
    fn test_readers_share() {
        let mgr = LockManager::new(8, Duration::ZERO);
        let a = item(1);
        let g1 = mgr.acquire(a.clone(), LockMode::Readonly, None).unwrap();
        let g2 = mgr.acquire(a.clone(), LockMode::Readonly, None).unwrap();
        assert_eq!(g2.recursion(), 2);
        drop(g1);
        drop(g2);
        assert_eq!(a.lock.mode(), LockMode::None);
    }

    #[test]
    fn test_writable_after_readonly_same_thread_is_locked() {
        let mgr = LockManager::new(8, Duration::ZERO);
        let a = item(1);
        let _r = mgr.acquire(a.clone(), LockMode::Readonly, None).unwrap();
        let err = mgr.acquire(a.clone(), LockMode::Writable, ms(50)).err().unwrap();
        assert!(matches!(err, Error::Access(AccessError::Locked { .. })));
    }

    #[test]
    fn test_readonly_inside_writable_is_writable_recursion() {
        let mgr = LockManager::new(8, Duration::ZERO);
        let a = item(1);
        let w = mgr.acquire(a.clone(), LockMode::Writable, None).unwrap();
        let r = mgr.acquire(a.clone(), LockMode::Readonly, None).unwrap();
        assert_eq!(r.mode(), LockMode::Writable);
        assert_eq!(w.recursion(), 2);
        drop(r);
        assert_eq!(a.lock.mode(), LockMode::Writable);
        drop(w);
        assert_eq!(a.lock.mode(), LockMode::None);
        assert_eq!(mgr.writers(), 0);
    }

    #[test]
    fn test_recursion_limit() {
        let mgr = LockManager::new(3, Duration::ZERO);
        let a = item(1);
        let guards: Vec<_> = (0..3)
            .map(|_| mgr.acquire(a.clone(), LockMode::Writable, None).unwrap())
            .collect();
        let err = mgr.acquire(a.clone(), LockMode::Writable, None).err().unwrap();
        assert!(matches!(err, Error::Access(AccessError::RecursionLimit { .. })));
        drop(guards);
        assert_eq!(a.lock.mode(), LockMode::None);
    }

    #[test]
    fn test_timeout_reports_vertex() {
        let mgr = LockManager::new(8, Duration::ZERO);
        let a = item(7);
        let (tx, rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let (m2, a2) = (mgr.clone(), a.clone());
        let holder = thread::spawn(move || {
            let _w = m2.acquire(a2, LockMode::Writable, None).unwrap();
            tx.send(()).unwrap();
            done_rx.recv().unwrap();
        });
        rx.recv().unwrap();
        match mgr.acquire(a.clone(), LockMode::Readonly, ms(20)) {
            Err(Error::Access(AccessError::Timeout { vertex, mode })) => {
                assert_eq!(vertex, "item7");
                assert_eq!(mode, LockMode::Readonly);
            }
            other => panic!("expected timeout, got {:?}", other.map(|g| g.mode())),
        }
        done_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(mgr.acquire(a, LockMode::Writable, ms(100)).is_ok());
    }

    #[test]
    fn test_writers_exclusive_across_threads() {
        let mgr = LockManager::new(8, Duration::ZERO);
        let a = item(1);
        let inside = Arc::new(AtomicU32::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (mgr, a, inside) = (mgr.clone(), a.clone(), inside.clone());
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _w = mgr.acquire(a.clone(), LockMode::Writable, ms(5_000)).unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_escalate_requires_sole_reader() {
        let mgr = LockManager::new(8, Duration::ZERO);
        let a = item(1);
        let mut r = mgr.acquire(a.clone(), LockMode::Readonly, None).unwrap();
        let r2 = mgr.acquire(a.clone(), LockMode::Readonly, None).unwrap();
        assert!(matches!(r.escalate(), Err(Error::Access(AccessError::EscalationDenied { .. }))));
        drop(r2);
        r.escalate().unwrap();
        assert_eq!(a.lock.mode(), LockMode::Writable);
        assert_eq!(mgr.writers(), 1);
    }

    #[test]
    fn test_relax_closes_inner_level_first() {
        let mgr = LockManager::new(8, Duration::ZERO);
        let a = item(1);
        let outer = mgr.acquire(a.clone(), LockMode::Writable, None).unwrap();
        let inner = mgr.acquire(a.clone(), LockMode::Writable, None).unwrap();
        assert!(matches!(inner.relax(), Relaxed::Closed));
        match outer.relax() {
            Relaxed::Readonly(g) => {
                assert_eq!(g.mode(), LockMode::Readonly);
                assert_eq!(a.lock.mode(), LockMode::Readonly);
            }
            Relaxed::Closed => panic!("outermost level should relax"),
        }
        assert_eq!(a.lock.mode(), LockMode::None);
        assert_eq!(mgr.writers(), 0);
    }

    #[test]
    fn test_acquire_many_rejects_duplicates_and_rolls_back() {
        let mgr = LockManager::new(8, Duration::ZERO);
        let (a, b, c) = (item(3), item(1), item(2));
        let err = mgr
            .acquire_many(vec![a.clone(), b.clone(), a.clone()], LockMode::Writable, None)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Vertex(_)));

        let guards = mgr
            .acquire_many(vec![a.clone(), b.clone(), c.clone()], LockMode::Writable, None)
            .unwrap();
        let order: Vec<u128> = guards.iter().map(|g| g.item().ordinal()).collect();
        assert_eq!(order, vec![1, 2, 3]);
        drop(guards);

        // c held elsewhere: nothing stays locked after the failure
        let (tx, rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let (m2, c2) = (mgr.clone(), c.clone());
        let holder = thread::spawn(move || {
            let _w = m2.acquire(c2, LockMode::Writable, None).unwrap();
            tx.send(()).unwrap();
            done_rx.recv().unwrap();
        });
        rx.recv().unwrap();
        assert!(mgr.acquire_many(vec![a.clone(), b.clone(), c.clone()], LockMode::Writable, ms(20)).is_err());
        assert_eq!(a.lock.mode(), LockMode::None);
        assert_eq!(b.lock.mode(), LockMode::None);
        done_tx.send(()).unwrap();
        holder.join().unwrap();
    }

    #[test]
    fn test_readonly_flag_blocks_new_writers() {
        let mgr = LockManager::new(8, Duration::ZERO);
        let a = item(1);
        mgr.set_readonly("g", None).unwrap();
        assert!(matches!(
            mgr.acquire(a.clone(), LockMode::Writable, None),
            Err(Error::Access(AccessError::ReadonlyGraph))
        ));
        assert!(mgr.acquire(a.clone(), LockMode::Readonly, None).is_ok());
        mgr.clear_readonly("g");
        assert!(mgr.acquire(a, LockMode::Writable, None).is_ok());
    }

    #[test]
    fn test_set_readonly_times_out_with_writer() {
        let mgr = LockManager::new(8, Duration::ZERO);
        let a = item(1);
        let _w = mgr.acquire(a, LockMode::Writable, None).unwrap();
        assert!(mgr.set_readonly("g", ms(10)).is_err());
        assert!(!mgr.is_readonly());
    }
}
