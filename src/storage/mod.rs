//! # Vertex Store
//!
//! The shared state behind a [`Graph`](crate::Graph): the vertex table, the
//! per-vertex arc indexes, and the lock manager that arbitrates access.
//!
//! Each vertex is a [`VertexCell`] holding two locks:
//!
//! - a logical [`VertexLock`] (readonly / writable, recursive, timeout-bounded)
//!   that callers hold for the duration of an operation
//! - a physical `RwLock<VertexData>` held only for the few instructions that
//!   touch the data, always while the logical lock is already owned
//!
//! Physical guards are never held across a logical acquisition, so they
//! cannot participate in a deadlock.
//!
//! | Submodule | Operations |
//! |-----------|-----------|
//! | `connect` | Connect, Count, Accumulate |
//! | `disconnect` | Disconnect, DeleteVertex |
//! | `probe` | ArcValue, Adjacent, Degree |
//! | `expiration` | MarkExpiring, RunExpiration |
//! | `snapshot` | Snapshot, Restore |

mod connect;
mod disconnect;
mod probe;
mod expiration;
mod snapshot;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};

use crate::config::GraphConfig;
use crate::enumerator::{Enumerator, TypeCode};
use crate::index::{ArcFilter, ArcIndex, RelCode, RelMatch};
use crate::lock::{LockGuard, LockManager, LockMode, Lockable, Relaxed, VertexLock};
use crate::model::*;
use crate::{AccessError, Error, Result};

pub use connect::{Connect, Terminals};
pub use expiration::{Expiring, ExpirationReport};
pub use snapshot::{ArcSnapshot, GraphSnapshot, VertexSnapshot};

pub(crate) use expiration::ExpirationQueue;

/// Graph time: seconds since the epoch, clamped to `u32`.
pub fn now() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}

// ============================================================================
// VertexCell / VertexData
// ============================================================================

/// A vertex as stored in the table.
#[derive(Debug)]
pub struct VertexCell {
    id: String,
    key: VertexKey,
    lock: VertexLock,
    data: RwLock<VertexData>,
}

impl VertexCell {
    fn new(id: &str, key: VertexKey, manifestation: Manifestation, now: u32) -> Self {
        Self {
            id: id.to_string(),
            key,
            lock: VertexLock::new(),
            data: RwLock::new(VertexData::new(manifestation, now)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> VertexKey {
        self.key
    }
}

impl Lockable for VertexCell {
    fn vertex_lock(&self) -> &VertexLock {
        &self.lock
    }

    fn ordinal(&self) -> u128 {
        self.key.0
    }

    fn describe(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug)]
pub(crate) struct VertexData {
    pub vtype: Option<TypeCode>,
    pub manifestation: Manifestation,
    pub out: ArcIndex,
    /// Regular inbound arcs, keyed by initial.
    pub inarcs: ArcIndex,
    /// Forward-only inbound arcs are not indexed here, only counted.
    pub fwdonly_in: u64,
    pub created: u32,
    pub modified: u32,
    pub expires: Option<u32>,
    pub properties: PropertyMap,
    pub vector: Option<Vec<f32>>,
    /// Set once the cell has been unlinked from the table. Holders of a
    /// stale `Arc<VertexCell>` must re-resolve the identifier.
    pub deleted: bool,
}

impl VertexData {
    fn new(manifestation: Manifestation, now: u32) -> Self {
        Self {
            vtype: None,
            manifestation,
            out: ArcIndex::Empty,
            inarcs: ArcIndex::Empty,
            fwdonly_in: 0,
            created: now,
            modified: now,
            expires: None,
            properties: PropertyMap::new(),
            vector: None,
            deleted: false,
        }
    }

    pub fn indegree(&self) -> u64 {
        self.inarcs.len() as u64 + self.fwdonly_in
    }

    pub fn outdegree(&self) -> u64 {
        self.out.len() as u64
    }

    pub fn degree(&self) -> u64 {
        self.indegree() + self.outdegree()
    }

    pub fn is_orphan(&self) -> bool {
        !self.deleted && self.manifestation == Manifestation::Virtual && self.degree() == 0
    }

    fn promote(&mut self, now: u32) -> bool {
        if self.manifestation == Manifestation::Virtual {
            self.manifestation = Manifestation::Real;
            self.modified = now;
            return true;
        }
        false
    }

    fn info(&self, cell: &VertexCell, enumerator: &dyn Enumerator) -> VertexInfo {
        VertexInfo {
            id: cell.id.clone(),
            key: cell.key,
            vertex_type: self.vtype.and_then(|t| enumerator.decode_vertex_type(t)),
            manifestation: self.manifestation,
            indegree: self.indegree(),
            outdegree: self.outdegree(),
            created: self.created,
            modified: self.modified,
            expires: self.expires,
            properties: self.properties.clone(),
            vector: self.vector.clone(),
        }
    }
}

/// The two index sides an arc lives on: the initial's outarcs and the
/// terminal's inarcs (or its forward-only counter).
pub(crate) struct Sides<'a> {
    pub out: &'a mut ArcIndex,
    pub inarcs: &'a mut ArcIndex,
    pub fwdonly_in: &'a mut u64,
}

/// `terminal == None` means the arc is a self-loop on `initial`.
pub(crate) fn sides<'a>(initial: &'a mut VertexData, terminal: Option<&'a mut VertexData>) -> Sides<'a> {
    match terminal {
        Some(t) => Sides { out: &mut initial.out, inarcs: &mut t.inarcs, fwdonly_in: &mut t.fwdonly_in },
        None => Sides {
            out: &mut initial.out,
            inarcs: &mut initial.inarcs,
            fwdonly_in: &mut initial.fwdonly_in,
        },
    }
}

// ============================================================================
// Store
// ============================================================================

pub struct Store {
    config: GraphConfig,
    locks: Arc<LockManager>,
    enumerator: Arc<dyn Enumerator>,
    vertices: RwLock<HashMap<VertexKey, Arc<VertexCell>>>,
    arcs: AtomicU64,
    expiration: Mutex<ExpirationQueue>,
}

impl Store {
    pub fn new(config: GraphConfig, enumerator: Arc<dyn Enumerator>) -> Arc<Self> {
        let locks = LockManager::new(config.recursion_limit, config.default_timeout());
        Arc::new(Self {
            config,
            locks,
            enumerator,
            vertices: RwLock::new(HashMap::new()),
            arcs: AtomicU64::new(0),
            expiration: Mutex::new(ExpirationQueue::default()),
        })
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn enumerator(&self) -> &Arc<dyn Enumerator> {
        &self.enumerator
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    // ========================================================================
    // Vertex table
    // ========================================================================

    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    pub fn order(&self) -> u64 {
        self.vertices.read().len() as u64
    }

    pub fn size(&self) -> u64 {
        self.arcs.load(Ordering::Relaxed)
    }

    pub(crate) fn lookup(&self, id: &str) -> Option<Arc<VertexCell>> {
        self.vertices
            .read()
            .get(&VertexKey::of(id))
            .filter(|cell| cell.id == id)
            .cloned()
    }

    pub(crate) fn lookup_key(&self, key: VertexKey) -> Option<Arc<VertexCell>> {
        self.vertices.read().get(&key).cloned()
    }

    pub(crate) fn identifier_of(&self, key: VertexKey) -> Option<String> {
        self.vertices.read().get(&key).map(|cell| cell.id.clone())
    }

    /// Snapshot of every cell currently in the table.
    pub(crate) fn cells(&self) -> Vec<Arc<VertexCell>> {
        self.vertices.read().values().cloned().collect()
    }

    pub(crate) fn validate_identifier(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::Vertex("empty vertex identifier".into()));
        }
        if id.len() > self.config.max_identifier_len {
            return Err(Error::Vertex(format!(
                "vertex identifier exceeds {} bytes",
                self.config.max_identifier_len
            )));
        }
        Ok(())
    }

    /// Fetch the cell for `id`, inserting an unlocked one with the given
    /// manifestation if missing. Returns whether it was inserted.
    fn get_or_insert(&self, id: &str, manifestation: Manifestation) -> Result<(Arc<VertexCell>, bool)> {
        self.validate_identifier(id)?;
        let key = VertexKey::of(id);
        let mut table = self.vertices.write();
        if let Some(cell) = table.get(&key) {
            if cell.id != id {
                return Err(Error::Vertex(format!(
                    "identifier '{id}' collides with existing vertex '{}'",
                    cell.id
                )));
            }
            return Ok((Arc::clone(cell), false));
        }
        let cell = Arc::new(VertexCell::new(id, key, manifestation, now()));
        table.insert(key, Arc::clone(&cell));
        if manifestation == Manifestation::Virtual {
            tracing::trace!(vertex = %id, "virtual vertex created");
        }
        Ok((cell, true))
    }

    /// Remove `cell` from the table if it is still the registered one.
    fn unlink(&self, cell: &Arc<VertexCell>) {
        let mut table = self.vertices.write();
        if table.get(&cell.key).map_or(false, |c| Arc::ptr_eq(c, cell)) {
            table.remove(&cell.key);
        }
    }

    /// Drop a VIRTUAL vertex that no longer has arcs. Caller holds it writable.
    fn collect_orphan(&self, cell: &Arc<VertexCell>) {
        let mut data = cell.data.write();
        if data.is_orphan() {
            data.deleted = true;
            drop(data);
            self.unlink(cell);
            tracing::debug!(vertex = %cell.id, "virtual vertex removed");
        }
    }

    /// Collect a cell we inserted but never managed to lock.
    fn collect_unlocked(self: &Arc<Self>, cell: &Arc<VertexCell>) {
        if let Ok(guard) = self.locks.acquire(Arc::clone(cell), LockMode::Writable, Some(Duration::ZERO)) {
            drop(self.handle(guard));
        }
    }

    fn handle(self: &Arc<Self>, guard: LockGuard<VertexCell>) -> VertexHandle {
        VertexHandle {
            store: Arc::clone(self),
            cell: Arc::clone(guard.item()),
            guard: Some(guard),
        }
    }

    pub(crate) fn relationship_label(&self, code: RelCode) -> String {
        self.enumerator
            .decode_relationship(code)
            .unwrap_or_else(|| format!("#{code}"))
    }

    /// Resolve a probe's relationship against the enumeration tables.
    /// Probes never assign codes.
    pub(crate) fn resolve_filter(&self, probe: &ArcProbe) -> Result<ArcFilter> {
        probe.value.validate().map_err(Error::Query)?;
        let rel = match probe.relationship.as_deref() {
            None => RelMatch::Any,
            Some("") => return Err(Error::Query("empty relationship in arc probe".into())),
            Some(label) => self
                .enumerator
                .lookup_relationship(label)
                .map_or(RelMatch::Nothing, RelMatch::Code),
        };
        Ok(ArcFilter { rel, kind: probe.modifier, value: probe.value })
    }

    // ========================================================================
    // Vertex lifecycle
    // ========================================================================

    pub fn create_vertex(self: &Arc<Self>, id: &str, vertex_type: Option<&str>) -> Result<u64> {
        self.locks.check_writable()?;
        let vtype = vertex_type
            .map(|t| self.enumerator.encode_vertex_type(t))
            .transpose()?;
        loop {
            let (cell, created) = self.get_or_insert(id, Manifestation::Real)?;
            let handle = self.handle(self.locks.acquire(Arc::clone(&cell), LockMode::Writable, None)?);
            let mut data = cell.data.write();
            if data.deleted {
                continue;
            }
            if created {
                data.vtype = vtype;
                return Ok(1);
            }
            match (data.vtype, vtype) {
                (Some(have), Some(want)) if have != want && data.manifestation == Manifestation::Real => {
                    let have = self.enumerator.decode_vertex_type(have).unwrap_or_default();
                    return Err(Error::Vertex(format!(
                        "vertex '{id}' has type '{have}', not '{}'",
                        vertex_type.unwrap_or_default()
                    )));
                }
                (_, Some(want)) => data.vtype = Some(want),
                _ => {}
            }
            let promoted = data.promote(now());
            drop(data);
            drop(handle);
            return Ok(promoted as u64);
        }
    }

    /// Lock an existing vertex. Missing or concurrently deleted vertices are
    /// key errors.
    fn acquire_existing(self: &Arc<Self>, id: &str, mode: LockMode, deadline: Instant) -> Result<VertexHandle> {
        let cell = self
            .lookup(id)
            .ok_or_else(|| Error::Key(format!("vertex '{id}' does not exist")))?;
        let handle = self.handle(self.locks.acquire_until(cell, mode, deadline)?);
        if handle.is_deleted() {
            return Err(Error::Key(format!("vertex '{id}' does not exist")));
        }
        Ok(handle)
    }

    /// Readonly access by internal key. `None` when the vertex is gone.
    pub(crate) fn open_key_readonly(self: &Arc<Self>, key: VertexKey, deadline: Instant) -> Result<Option<VertexHandle>> {
        let Some(cell) = self.lookup_key(key) else {
            return Ok(None);
        };
        let handle = self.handle(self.locks.acquire_until(cell, LockMode::Readonly, deadline)?);
        if handle.is_deleted() {
            return Ok(None);
        }
        Ok(Some(handle))
    }

    pub fn open_vertex(self: &Arc<Self>, id: &str, mode: OpenMode, timeout: Option<Duration>) -> Result<VertexHandle> {
        let deadline = self.locks.deadline(timeout);
        match mode {
            OpenMode::Readonly => self.acquire_existing(id, LockMode::Readonly, deadline),
            OpenMode::Append => {
                self.locks.check_writable()?;
                let handle = self.acquire_existing(id, LockMode::Writable, deadline)?;
                handle.cell.data.write().promote(now());
                Ok(handle)
            }
            OpenMode::Write => {
                self.locks.check_writable()?;
                loop {
                    let (cell, _) = self.get_or_insert(id, Manifestation::Real)?;
                    let handle = self.handle(self.locks.acquire_until(cell, LockMode::Writable, deadline)?);
                    if handle.is_deleted() {
                        continue;
                    }
                    handle.cell.data.write().promote(now());
                    return Ok(handle);
                }
            }
        }
    }

    /// Open all of `ids` or none of them. Handles come back in request order.
    pub fn open_vertices(self: &Arc<Self>, ids: &[&str], mode: OpenMode, timeout: Option<Duration>) -> Result<Vec<VertexHandle>> {
        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(*id) {
                return Err(Error::Vertex(format!("duplicate vertex '{id}' in request")));
            }
        }
        let lock_mode = match mode {
            OpenMode::Readonly => LockMode::Readonly,
            OpenMode::Append | OpenMode::Write => {
                self.locks.check_writable()?;
                LockMode::Writable
            }
        };
        loop {
            let mut cells = Vec::with_capacity(ids.len());
            for id in ids {
                let cell = match mode {
                    OpenMode::Write => self.get_or_insert(id, Manifestation::Real)?.0,
                    _ => self
                        .lookup(id)
                        .ok_or_else(|| Error::Key(format!("vertex '{id}' does not exist")))?,
                };
                cells.push(cell);
            }
            let guards = self.locks.acquire_many(cells, lock_mode, timeout)?;
            let mut handles: HashMap<VertexKey, VertexHandle> = guards
                .into_iter()
                .map(|g| {
                    let h = self.handle(g);
                    (h.key(), h)
                })
                .collect();
            if let Some(gone) = handles.values().find(|h| h.is_deleted()) {
                if mode == OpenMode::Write {
                    continue;
                }
                return Err(Error::Key(format!("vertex '{}' does not exist", gone.id())));
            }
            let mut ordered = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(h) = handles.remove(&VertexKey::of(id)) {
                    if lock_mode == LockMode::Writable {
                        h.cell.data.write().promote(now());
                    }
                    ordered.push(h);
                }
            }
            return Ok(ordered);
        }
    }

    pub fn vertex_info(self: &Arc<Self>, id: &str, timeout: Option<Duration>) -> Result<VertexInfo> {
        let handle = self.acquire_existing(id, LockMode::Readonly, self.locks.deadline(timeout))?;
        Ok(handle.info())
    }

    // ========================================================================
    // Read-only flag
    // ========================================================================

    pub fn set_readonly(&self, timeout: Option<Duration>) -> Result<()> {
        self.locks.set_readonly(&self.config.name, timeout)
    }

    pub fn clear_readonly(&self) {
        self.locks.clear_readonly(&self.config.name)
    }

    pub fn is_readonly(&self) -> bool {
        self.locks.is_readonly()
    }
}

// ============================================================================
// VertexHandle
// ============================================================================

/// An open vertex. Readonly or writable access is held until the handle is
/// closed or dropped; handles stay on the thread that opened them.
///
/// Closing the outermost writable handle of a VIRTUAL vertex without arcs
/// removes that vertex.
pub struct VertexHandle {
    store: Arc<Store>,
    cell: Arc<VertexCell>,
    guard: Option<LockGuard<VertexCell>>,
}

impl std::fmt::Debug for VertexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexHandle")
            .field("id", &self.cell.id)
            .field("mode", &self.mode())
            .finish()
    }
}

impl VertexHandle {
    pub fn id(&self) -> &str {
        &self.cell.id
    }

    pub fn key(&self) -> VertexKey {
        self.cell.key
    }

    pub fn mode(&self) -> LockMode {
        self.guard.as_ref().map_or(LockMode::None, |g| g.mode())
    }

    pub fn is_writable(&self) -> bool {
        self.mode() == LockMode::Writable
    }

    pub fn is_readonly(&self) -> bool {
        self.mode() == LockMode::Readonly
    }

    pub fn recursion(&self) -> u8 {
        self.guard.as_ref().map_or(0, |g| g.recursion())
    }

    fn is_deleted(&self) -> bool {
        self.cell.data.read().deleted
    }

    pub fn manifestation(&self) -> Manifestation {
        self.cell.data.read().manifestation
    }

    pub fn is_virtual(&self) -> bool {
        self.manifestation() == Manifestation::Virtual
    }

    pub fn vertex_type(&self) -> Option<String> {
        let vtype = self.cell.data.read().vtype;
        vtype.and_then(|t| self.store.enumerator.decode_vertex_type(t))
    }

    pub fn degree(&self) -> u64 {
        self.cell.data.read().degree()
    }

    pub fn indegree(&self) -> u64 {
        self.cell.data.read().indegree()
    }

    pub fn outdegree(&self) -> u64 {
        self.cell.data.read().outdegree()
    }

    pub fn created(&self) -> u32 {
        self.cell.data.read().created
    }

    pub fn modified(&self) -> u32 {
        self.cell.data.read().modified
    }

    pub fn expires(&self) -> Option<u32> {
        self.cell.data.read().expires
    }

    pub fn info(&self) -> VertexInfo {
        self.cell.data.read().info(&self.cell, self.store.enumerator.as_ref())
    }

    // ========================================================================
    // Properties
    // ========================================================================

    pub fn property(&self, key: &str) -> Option<Value> {
        self.cell.data.read().properties.get(key).cloned()
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.cell.data.read().properties.contains_key(key)
    }

    pub fn properties(&self) -> PropertyMap {
        self.cell.data.read().properties.clone()
    }

    fn require_writable(&self) -> Result<()> {
        if !self.is_writable() {
            return Err(AccessError::NotHeld.into());
        }
        Ok(())
    }

    pub fn set_property(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.require_writable()?;
        let mut data = self.cell.data.write();
        data.properties.insert(key.to_string(), value.into());
        data.modified = now();
        Ok(())
    }

    pub fn remove_property(&self, key: &str) -> Result<Option<Value>> {
        self.require_writable()?;
        let mut data = self.cell.data.write();
        let old = data.properties.remove(key);
        if old.is_some() {
            data.modified = now();
        }
        Ok(old)
    }

    pub fn vector(&self) -> Option<Vec<f32>> {
        self.cell.data.read().vector.clone()
    }

    pub fn set_vector(&self, vector: Vec<f32>) -> Result<()> {
        self.require_writable()?;
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(Error::Vertex(format!("vector for '{}' has non-finite elements", self.id())));
        }
        let mut data = self.cell.data.write();
        data.vector = Some(vector);
        data.modified = now();
        Ok(())
    }

    /// Schedule this vertex for deletion at `when`.
    pub fn set_expiration(&self, when: u32) -> Result<()> {
        self.require_writable()?;
        self.cell.data.write().expires = Some(when);
        self.store
            .expiration
            .lock()
            .schedule(Expiring::Vertex(self.cell.id.clone()), when);
        Ok(())
    }

    // ========================================================================
    // Mode changes
    // ========================================================================

    pub fn escalate(&mut self) -> Result<()> {
        self.guard.as_mut().ok_or(AccessError::NotHeld)?.escalate()
    }

    /// See [`Graph::relax_vertex`](crate::Graph::relax_vertex).
    pub fn relax(mut self) -> Result<Option<VertexHandle>> {
        let guard = self.guard.take().ok_or(AccessError::NotHeld)?;
        if guard.is_writable() && guard.is_outermost() {
            self.store.collect_orphan(&self.cell);
        }
        match guard.relax() {
            Relaxed::Readonly(g) => {
                self.guard = Some(g);
                if self.is_deleted() {
                    return Err(Error::Key(format!("vertex '{}' was removed on relax", self.id())));
                }
                Ok(Some(self))
            }
            Relaxed::Closed => Ok(None),
        }
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for VertexHandle {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            if guard.is_writable() && guard.is_outermost() {
                self.store.collect_orphan(&self.cell);
            }
            drop(guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerator::MemoryEnumerator;

    fn store() -> Arc<Store> {
        Store::new(GraphConfig::default(), Arc::new(MemoryEnumerator::new()))
    }

    #[test]
    fn test_create_vertex_once() {
        let s = store();
        assert_eq!(s.create_vertex("A", Some("person")).unwrap(), 1);
        assert_eq!(s.create_vertex("A", Some("person")).unwrap(), 0);
        assert!(matches!(s.create_vertex("A", Some("city")), Err(Error::Vertex(_))));
        assert_eq!(s.order(), 1);
    }

    #[test]
    fn test_identifier_bounds() {
        let s = Store::new(
            GraphConfig { max_identifier_len: 4, ..GraphConfig::default() },
            Arc::new(MemoryEnumerator::new()),
        );
        assert!(matches!(s.create_vertex("", None), Err(Error::Vertex(_))));
        assert!(matches!(s.create_vertex("toolong", None), Err(Error::Vertex(_))));
        assert_eq!(s.create_vertex("ok", None).unwrap(), 1);
    }

    #[test]
    fn test_readonly_open_of_missing_is_key_error() {
        let s = store();
        assert!(matches!(s.open_vertex("nope", OpenMode::Readonly, None), Err(Error::Key(_))));
        assert!(matches!(s.open_vertex("nope", OpenMode::Append, None), Err(Error::Key(_))));
        let h = s.open_vertex("nope", OpenMode::Write, None).unwrap();
        assert!(h.is_writable());
        assert_eq!(h.manifestation(), Manifestation::Real);
    }

    #[test]
    fn test_properties_require_writable() {
        let s = store();
        s.create_vertex("A", None).unwrap();
        let r = s.open_vertex("A", OpenMode::Readonly, None).unwrap();
        assert!(matches!(r.set_property("x", 1), Err(Error::Access(AccessError::NotHeld))));
        drop(r);
        let w = s.open_vertex("A", OpenMode::Append, None).unwrap();
        w.set_property("x", 1).unwrap();
        assert_eq!(w.property("x"), Some(Value::Int(1)));
        assert_eq!(w.remove_property("x").unwrap(), Some(Value::Int(1)));
        assert!(!w.has_property("x"));
    }

    #[test]
    fn test_relax_of_collected_virtual_is_key_error() {
        let s = store();
        s.connect(&Connect::new("A", "to", "T")).unwrap();
        let cell = s.lookup("T").unwrap();
        let t = s.handle(s.locks.acquire(cell, LockMode::Writable, None).unwrap());
        // Same thread: the disconnect re-enters T's writable lock
        assert_eq!(s.disconnect("A", &ArcProbe::out(), None, None).unwrap(), 1);
        assert!(t.is_virtual());
        assert!(matches!(t.relax(), Err(Error::Key(_))));
        assert!(!s.contains("T"));
    }

    #[test]
    fn test_open_vertices_returns_request_order() {
        let s = store();
        for id in ["A", "B", "C"] {
            s.create_vertex(id, None).unwrap();
        }
        let hs = s.open_vertices(&["C", "A", "B"], OpenMode::Readonly, None).unwrap();
        let ids: Vec<&str> = hs.iter().map(|h| h.id()).collect();
        assert_eq!(ids, vec!["C", "A", "B"]);
        assert!(matches!(
            s.open_vertices(&["A", "A"], OpenMode::Readonly, None),
            Err(Error::Vertex(_))
        ));
    }
}
