//! # arcgraph: Concurrent Graph-Arc Storage and Traversal Engine
//!
//! An in-memory engine for typed, valued, directional arcs between vertices,
//! with vertex-grained locking and recursive neighborhood queries.
//!
//! ## Design Principles
//!
//! 1. **Vertex-grained concurrency**: every vertex carries its own lock record;
//!    no global lock serializes unrelated vertices
//! 2. **Clean DTOs**: `ArcRecord`, `VertexInfo`, `ArcValue` cross all boundaries
//! 3. **Tiered adjacency**: the per-vertex arc index switches between empty,
//!    single and multi storage as its degree changes
//! 4. **Explicit partial failure**: bulk removals report what they applied
//!
//! ## Quick Start
//!
//! ```rust
//! use arcgraph::{ArcProbe, ArcSpec, ArcValue, Direction, Graph, ModifierKind};
//!
//! # fn example() -> arcgraph::Result<()> {
//! let graph = Graph::new();
//!
//! let added = graph.connect("A", ArcSpec::valued("to", ModifierKind::Integer, 5), "B")?;
//! assert_eq!(added, 1);
//!
//! let probe = ArcProbe::new("to", Direction::Out).with_modifier(ModifierKind::Integer);
//! assert_eq!(graph.arc_value("A", &probe, "B", None)?, Some(ArcValue::Integer(5)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Components
//!
//! | Component | Module | Description |
//! |-----------|--------|-------------|
//! | Lock Manager | `lock` | Shared/exclusive vertex access, recursion, escalation |
//! | Arc Index | `index` | Per-vertex adjacency with storage tiers |
//! | Store | `storage` | Vertex table, connect/disconnect, counters, TTL |
//! | Traversal | `planner`, `execution` | Recursive neighborhood queries |

use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod config;
pub mod enumerator;
pub mod lock;
pub mod index;
pub mod storage;
pub mod eval;
pub mod query;
pub mod planner;
pub mod execution;
pub mod export;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    ArcRecord, ArcSpec, ArcValue, ArcProbe, ArcCondition, ValueComparator,
    Direction, ModifierKind, VertexKey, VertexInfo, Manifestation, OpenMode,
    Value, PropertyMap, properties,
};

// ============================================================================
// Re-exports: Engine
// ============================================================================

pub use config::GraphConfig;
pub use enumerator::{Enumerator, MemoryEnumerator};
pub use lock::LockMode;
pub use storage::{Connect, Terminals, VertexHandle, ExpirationReport, GraphSnapshot};
pub use eval::{Candidate, Expression, FnExpression, Registers};
pub use query::{Query, LevelSpec, VertexCondition, AdjacencyAssert, CollectPolicy, SortBy, SortDirection};
pub use execution::{QueryResult, ResultEntry, Aggregation};

// ============================================================================
// Top-level Graph handle
// ============================================================================

/// The primary entry point. A `Graph` is a cheap, cloneable handle onto a
/// shared store; clones may be moved to other threads.
#[derive(Clone)]
pub struct Graph {
    store: Arc<storage::Store>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Empty graph with the default configuration.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        let enumerator = Arc::new(MemoryEnumerator::with_capacity(
            config.max_relationships,
            config.max_vertex_types,
        ));
        Self::with_enumerator(config, enumerator)
    }

    /// Build a graph that shares an externally owned enumeration service.
    pub fn with_enumerator(config: GraphConfig, enumerator: Arc<dyn Enumerator>) -> Self {
        Self { store: storage::Store::new(config, enumerator) }
    }

    pub fn config(&self) -> &GraphConfig {
        self.store.config()
    }

    pub fn enumerator(&self) -> &Arc<dyn Enumerator> {
        self.store.enumerator()
    }

    // ========================================================================
    // Vertex lifecycle
    // ========================================================================

    /// Create a REAL vertex. Returns 1 when created or promoted from
    /// VIRTUAL, 0 when it already existed.
    pub fn create_vertex(&self, id: &str, vertex_type: Option<&str>) -> Result<u64> {
        self.store.create_vertex(id, vertex_type)
    }

    /// Delete a vertex and its arcs. Returns 0 if the vertex did not exist.
    pub fn delete_vertex(&self, id: &str, timeout: Option<Duration>) -> Result<u64> {
        self.store.delete_vertex(id, timeout)
    }

    pub fn open_vertex(&self, id: &str, mode: OpenMode, timeout: Option<Duration>) -> Result<VertexHandle> {
        self.store.open_vertex(id, mode, timeout)
    }

    /// Open several vertices atomically: either all are acquired or none.
    pub fn open_vertices(&self, ids: &[&str], mode: OpenMode, timeout: Option<Duration>) -> Result<Vec<VertexHandle>> {
        self.store.open_vertices(ids, mode, timeout)
    }

    pub fn close_vertex(&self, handle: VertexHandle) {
        handle.close();
    }

    pub fn escalate_vertex(&self, handle: &mut VertexHandle) -> Result<()> {
        handle.escalate()
    }

    /// Returns the relaxed handle, or `None` when relaxing only closed one
    /// level of writable recursion.
    pub fn relax_vertex(&self, handle: VertexHandle) -> Result<Option<VertexHandle>> {
        handle.relax()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.store.contains(id)
    }

    /// Number of vertices.
    pub fn order(&self) -> u64 {
        self.store.order()
    }

    /// Number of arcs.
    pub fn size(&self) -> u64 {
        self.store.size()
    }

    pub fn vertex_info(&self, id: &str, timeout: Option<Duration>) -> Result<VertexInfo> {
        self.store.vertex_info(id, timeout)
    }

    // ========================================================================
    // Arcs
    // ========================================================================

    /// Connect `initial` to a single `terminal`. Returns the number of arcs
    /// added (0 when the arc already existed).
    pub fn connect(&self, initial: &str, arc: impl Into<ArcSpec>, terminal: &str) -> Result<u64> {
        self.store.connect(&Connect::new(initial, arc.into(), terminal))
    }

    /// Connect with the full option set: terminal list, condition, lifespan, timeout.
    pub fn connect_with(&self, request: &Connect) -> Result<u64> {
        self.store.connect(request)
    }

    /// Remove the arcs around `anchor` matching `probe`, optionally only
    /// those shared with `neighbor`.
    pub fn disconnect(
        &self,
        anchor: &str,
        probe: &ArcProbe,
        neighbor: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<u64> {
        self.store.disconnect(anchor, probe, neighbor, timeout)
    }

    /// Increment a counter arc by `delta` (default 1), creating it when
    /// missing. Returns the new, clamped value.
    pub fn count(
        &self,
        initial: &str,
        relationship: &str,
        terminal: &str,
        delta: Option<i64>,
        timeout: Option<Duration>,
    ) -> Result<u32> {
        let delta = delta.unwrap_or(1) as f64;
        let value = self.store.modify_counter(initial, relationship, terminal, ModifierKind::Counter, delta, timeout)?;
        Ok(value.as_u32().unwrap_or_default())
    }

    /// Add `delta` (default 1.0) to an accumulator arc, creating it when missing.
    pub fn accumulate(
        &self,
        initial: &str,
        relationship: &str,
        terminal: &str,
        delta: Option<f64>,
        timeout: Option<Duration>,
    ) -> Result<f32> {
        let value = self.store.modify_counter(
            initial,
            relationship,
            terminal,
            ModifierKind::Accumulator,
            delta.unwrap_or(1.0),
            timeout,
        )?;
        Ok(value.as_f64() as f32)
    }

    pub fn arc_value(
        &self,
        initial: &str,
        probe: &ArcProbe,
        terminal: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<ArcValue>> {
        self.store.arc_value(initial, probe, terminal, timeout)
    }

    pub fn adjacent(
        &self,
        anchor: &str,
        probe: &ArcProbe,
        neighbor: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        self.store.adjacent(anchor, probe, neighbor, timeout)
    }

    /// Total degree, or the number of arcs matching `probe`.
    pub fn degree(&self, anchor: &str, probe: Option<&ArcProbe>, timeout: Option<Duration>) -> Result<u64> {
        self.store.degree(anchor, probe, timeout)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn neighborhood(&self, query: &Query) -> Result<QueryResult> {
        let plan = planner::plan(&self.store, query)?;
        execution::execute(&self.store, &plan)
    }

    pub fn aggregate(&self, query: &Query) -> Result<Aggregation> {
        let plan = planner::plan(&self.store, query)?;
        execution::aggregate(&self.store, &plan)
    }

    /// Distinct terminals of `anchor`'s outbound arcs.
    pub fn terminals(&self, anchor: &str, relationship: Option<&str>, timeout: Option<Duration>) -> Result<Vec<String>> {
        let probe = ArcProbe::new(relationship.unwrap_or("*"), Direction::Out);
        Ok(self.neighborhood(&one_level(anchor, probe, timeout))?.neighbors())
    }

    /// Distinct initials of `anchor`'s inbound arcs.
    pub fn initials(&self, anchor: &str, relationship: Option<&str>, timeout: Option<Duration>) -> Result<Vec<String>> {
        let probe = ArcProbe::new(relationship.unwrap_or("*"), Direction::In);
        Ok(self.neighborhood(&one_level(anchor, probe, timeout))?.neighbors())
    }

    pub fn outarcs(&self, anchor: &str, timeout: Option<Duration>) -> Result<Vec<ArcRecord>> {
        Ok(self.neighborhood(&one_level(anchor, ArcProbe::out(), timeout))?.arcs())
    }

    pub fn inarcs(&self, anchor: &str, timeout: Option<Duration>) -> Result<Vec<ArcRecord>> {
        Ok(self.neighborhood(&one_level(anchor, ArcProbe::inbound(), timeout))?.arcs())
    }

    // ========================================================================
    // Graph-wide state
    // ========================================================================

    /// Wait for all writable locks to clear, then reject every mutation
    /// until [`Graph::clear_readonly`].
    pub fn set_readonly(&self, timeout: Option<Duration>) -> Result<()> {
        self.store.set_readonly(timeout)
    }

    pub fn clear_readonly(&self) {
        self.store.clear_readonly()
    }

    pub fn is_readonly(&self) -> bool {
        self.store.is_readonly()
    }

    // ========================================================================
    // Expiration
    // ========================================================================

    pub fn mark_expiring(&self, id: &str, when: u32, timeout: Option<Duration>) -> Result<()> {
        self.store.mark_expiring(id, when, timeout)
    }

    pub fn mark_arc_expiring(
        &self,
        initial: &str,
        relationship: &str,
        terminal: &str,
        when: u32,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.store.mark_arc_expiring(initial, relationship, terminal, when, timeout)
    }

    /// Earliest scheduled expiration time, if any.
    pub fn next_expiration(&self) -> Option<u32> {
        self.store.next_expiration()
    }

    /// Execute every expiration due at `now`.
    pub fn run_expiration(&self, now: u32, timeout: Option<Duration>) -> Result<ExpirationReport> {
        self.store.run_expiration(now, timeout)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn snapshot(&self, timeout: Option<Duration>) -> Result<GraphSnapshot> {
        self.store.snapshot(timeout)
    }

    /// Repopulate an empty graph from a snapshot.
    pub fn restore(&self, snapshot: &GraphSnapshot) -> Result<()> {
        self.store.restore(snapshot)
    }
}

fn one_level(anchor: &str, probe: ArcProbe, timeout: Option<Duration>) -> Query {
    let query = Query::new(anchor).with_arc(probe);
    match timeout {
        Some(t) => query.with_timeout(t),
        None => query,
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Contention, timeouts and graph-wide rejection. Always safe to retry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccessError {
    #[error("Timeout acquiring {mode:?} access to vertex '{vertex}'")]
    Timeout { vertex: String, mode: LockMode },

    #[error("Object is locked: vertex '{vertex}' is held readonly by the current thread")]
    Locked { vertex: String },

    #[error("Recursion limit reached for vertex '{vertex}'")]
    RecursionLimit { vertex: String },

    #[error("Cannot escalate vertex '{vertex}': other readers present")]
    EscalationDenied { vertex: String },

    #[error("Vertex not held in the required mode")]
    NotHeld,

    #[error("Graph is readonly")]
    ReadonlyGraph,

    #[error("Execution time limit exceeded after {elapsed_ms} ms")]
    ExecutionTimeout { elapsed_ms: u64 },
}

/// Violations of arc invariants, plus incomplete bulk removal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArcError {
    #[error("Regular arc not allowed: '{terminal}' has forward-only inarcs")]
    RegularNotAllowed { terminal: String },

    #[error("Forward-only arc not allowed: '{terminal}' has regular inarcs")]
    ForwardOnlyNotAllowed { terminal: String },

    #[error("Creation time cannot be reassigned")]
    CreationTimeReassigned,

    #[error("Invalid {kind} value: {reason}")]
    InvalidValue { kind: ModifierKind, reason: String },

    /// Some neighbors could not be acquired. `removed` arcs are gone,
    /// `remaining` matched but stay in place.
    #[error("Removal incomplete ({removed} removed, {remaining} remaining), try again: {cause}")]
    Incomplete { removed: u64, remaining: u64, cause: AccessError },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Arc(#[from] ArcError),

    #[error("Vertex error: {0}")]
    Vertex(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Access errors leave no partial effects and may be retried unchanged.
    pub fn is_retry_safe(&self) -> bool {
        matches!(self, Error::Access(_))
    }

    /// Arcs already applied by a call that failed part way through.
    pub fn partial_count(&self) -> Option<u64> {
        match self {
            Error::Arc(ArcError::Incomplete { removed, .. }) => Some(*removed),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
