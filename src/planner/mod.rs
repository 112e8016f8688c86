//! Query planner: validates a [`Query`] and resolves it against the store.
//!
//! Labels become enumeration codes, identifier lists become vertex keys and
//! the sort key gets its direction. Nothing here takes a vertex lock, so a
//! plan can be built while any vertex is busy.
//!
//! | Query part | Planned as |
//! |------------|-----------|
//! | `ArcProbe` | [`ArcFilter`] + [`Direction`] |
//! | `VertexCondition` | [`PlannedVertex`] (key set, type code) |
//! | `AdjacencyAssert` | [`PlannedAssert`] |
//! | `SortBy` + direction | `Option<(SortBy, SortDirection)>` |

use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashSet;

use crate::enumerator::TypeCode;
use crate::eval::Expression;
use crate::index::ArcFilter;
use crate::model::*;
use crate::query::{CollectPolicy, LevelSpec, Query, SortBy, SortDirection, VertexCondition};
use crate::storage::Store;
use crate::{Error, Result};

/// Vertex type requirement after enumeration lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeMatch {
    Code(TypeCode),
    /// The label was never registered; no vertex can have it.
    Nothing,
}

#[derive(Debug, Clone)]
pub struct PlannedVertex {
    pub keys: Option<HashSet<VertexKey>>,
    pub vtype: Option<TypeMatch>,
    pub manifestation: Option<Manifestation>,
}

impl PlannedVertex {
    pub fn admits(&self, key: VertexKey, vtype: Option<TypeCode>, manifestation: Manifestation) -> bool {
        if let Some(keys) = &self.keys {
            if !keys.contains(&key) {
                return false;
            }
        }
        match self.vtype {
            Some(TypeMatch::Nothing) => return false,
            Some(TypeMatch::Code(code)) if vtype != Some(code) => return false,
            _ => {}
        }
        self.manifestation.map_or(true, |m| m == manifestation)
    }
}

#[derive(Debug, Clone)]
pub struct PlannedAssert {
    pub filter: ArcFilter,
    pub direction: Direction,
    pub neighbors: Option<Vec<VertexKey>>,
    pub negate: bool,
}

#[derive(Debug, Clone)]
pub struct PlannedLevel {
    pub filter: ArcFilter,
    pub direction: Direction,
    pub vertex: Option<PlannedVertex>,
    pub adjacent: Option<PlannedAssert>,
    pub predicate: Option<Arc<dyn Expression>>,
    pub post_filter: Option<Arc<dyn Expression>>,
    pub collect: CollectPolicy,
    /// Stop after the first match: nothing at or below this level collects
    /// and it is not a scan.
    pub short_circuit: bool,
    pub neighbor: Option<Box<PlannedLevel>>,
}

#[derive(Debug, Clone)]
pub struct TraversalPlan {
    pub anchor: String,
    pub root: PlannedLevel,
    pub rank: Option<Arc<dyn Expression>>,
    pub sort: Option<(SortBy, SortDirection)>,
    pub offset: usize,
    pub hits: Option<usize>,
    pub timeout: Option<Duration>,
    /// Total running-time bound, set only with `limexec`.
    pub time_limit: Option<Duration>,
}

pub fn plan(store: &Arc<Store>, query: &Query) -> Result<TraversalPlan> {
    store.validate_identifier(&query.anchor).map_err(|e| Error::Query(e.to_string()))?;
    let depth = query.level.depth();
    let limit = store.locks().recursion_limit() as usize;
    if depth >= limit {
        return Err(Error::Query(format!("query nests {depth} levels, limit is {}", limit.saturating_sub(1))));
    }

    let sort = match (query.sort_by, query.rank.is_some()) {
        (SortBy::Rank, false) => {
            return Err(Error::Query("sort by rank requires a rank expression".into()));
        }
        (SortBy::None, true) => Some((SortBy::Rank, SortBy::Rank.default_direction())),
        (SortBy::None, false) => None,
        (key, _) => Some((key, query.sort_direction.unwrap_or_else(|| key.default_direction()))),
    };

    let time_limit = match (query.limexec, query.timeout) {
        (true, Some(t)) => Some(t),
        (true, None) => return Err(Error::Query("limexec requires a timeout".into())),
        (false, _) => None,
    };

    let root = plan_level(store, &query.level, true)?;
    tracing::trace!(anchor = %query.anchor, depth, ?sort, "query planned");
    Ok(TraversalPlan {
        anchor: query.anchor.clone(),
        root,
        rank: query.rank.clone(),
        sort,
        offset: query.offset,
        hits: query.hits,
        timeout: query.timeout,
        time_limit,
    })
}

fn plan_level(store: &Arc<Store>, level: &LevelSpec, root: bool) -> Result<PlannedLevel> {
    let filter = store.resolve_filter(&level.arc)?;
    let vertex = level.vertex.as_ref().map(|c| plan_vertex(store, c)).transpose()?;
    let adjacent = level
        .adjacent
        .as_ref()
        .map(|a| -> Result<PlannedAssert> {
            Ok(PlannedAssert {
                filter: store.resolve_filter(&a.probe)?,
                direction: a.probe.direction,
                neighbors: a.neighbors.as_ref().map(|ids| ids.iter().map(|id| VertexKey::of(id)).collect()),
                negate: a.negate,
            })
        })
        .transpose()?;
    let neighbor = level
        .neighbor
        .as_deref()
        .map(|n| plan_level(store, n, false).map(Box::new))
        .transpose()?;
    let short_circuit = !root && level.collect == CollectPolicy::None && !level.collects_below();

    Ok(PlannedLevel {
        filter,
        direction: level.arc.direction,
        vertex,
        adjacent,
        predicate: level.filter.clone(),
        post_filter: level.post_filter.clone(),
        collect: level.collect,
        short_circuit,
        neighbor,
    })
}

fn plan_vertex(store: &Arc<Store>, condition: &VertexCondition) -> Result<PlannedVertex> {
    let keys = condition
        .identifiers
        .as_ref()
        .map(|ids| ids.iter().map(|id| VertexKey::of(id)).collect());
    let vtype = match condition.vertex_type.as_deref() {
        None => None,
        Some("") => return Err(Error::Query("empty vertex type in condition".into())),
        Some(label) => Some(
            store
                .enumerator()
                .lookup_vertex_type(label)
                .map_or(TypeMatch::Nothing, TypeMatch::Code),
        ),
    };
    Ok(PlannedVertex { keys, vtype, manifestation: condition.manifestation })
}
