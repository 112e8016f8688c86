//! Neighborhood query requests.
//!
//! A [`Query`] names an anchor and a root [`LevelSpec`]. Each level probes the
//! arcs of its anchor; a nested `neighbor` level runs with every accepted
//! candidate as its anchor and must itself match for the candidate to be
//! kept.
//!
//! ```text
//! Query::new("alice")
//!     .with_arc(ArcProbe::new("knows", Direction::Out))
//!     .with_neighbor(LevelSpec::condition(ArcProbe::new("works_at", Direction::Out)))
//! ```
//!
//! collects every `knows` arc of `alice` whose terminal itself works somewhere.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::eval::Expression;
use crate::model::{ArcProbe, Manifestation};

// ============================================================================
// Level specification
// ============================================================================

/// Which candidates of a level end up in the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollectPolicy {
    /// Never collect here. A level without collecting descendants stops at
    /// its first match.
    None,
    /// Collect every candidate that passes this level.
    #[default]
    Collect,
    /// Visit every candidate without collecting.
    Scan,
}

/// Conditions on the vertex at the far end of a candidate arc.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexCondition {
    pub identifiers: Option<Vec<String>>,
    pub vertex_type: Option<String>,
    pub manifestation: Option<Manifestation>,
}

impl VertexCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identifiers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identifiers = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_type(mut self, vertex_type: &str) -> Self {
        self.vertex_type = Some(vertex_type.to_string());
        self
    }

    pub fn with_manifestation(mut self, manifestation: Manifestation) -> Self {
        self.manifestation = Some(manifestation);
        self
    }
}

/// Existence check on a level's anchor, made before its arcs are probed.
/// Nothing it matches is collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjacencyAssert {
    pub probe: ArcProbe,
    /// Restrict the check to arcs shared with these vertices.
    pub neighbors: Option<Vec<String>>,
    pub negate: bool,
}

impl AdjacencyAssert {
    pub fn exists(probe: ArcProbe) -> Self {
        Self { probe, neighbors: None, negate: false }
    }

    pub fn absent(probe: ArcProbe) -> Self {
        Self { probe, neighbors: None, negate: true }
    }

    pub fn with_neighbors<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.neighbors = Some(ids.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct LevelSpec {
    pub arc: ArcProbe,
    pub vertex: Option<VertexCondition>,
    pub adjacent: Option<AdjacencyAssert>,
    /// Evaluated per candidate before collection; zero excludes it.
    pub filter: Option<Arc<dyn Expression>>,
    /// Evaluated after the nested level returns; zero vetoes the candidate
    /// and anything collected beneath it.
    pub post_filter: Option<Arc<dyn Expression>>,
    pub collect: CollectPolicy,
    pub neighbor: Option<Box<LevelSpec>>,
}

impl LevelSpec {
    /// A collecting level.
    pub fn new(arc: ArcProbe) -> Self {
        Self { arc, ..Self::default() }
    }

    /// A level that only has to match: nothing is collected.
    pub fn condition(arc: ArcProbe) -> Self {
        Self::new(arc).with_collect(CollectPolicy::None)
    }

    pub fn with_arc(mut self, arc: ArcProbe) -> Self {
        self.arc = arc;
        self
    }

    pub fn with_vertex(mut self, condition: VertexCondition) -> Self {
        self.vertex = Some(condition);
        self
    }

    pub fn with_adjacent(mut self, assert: AdjacencyAssert) -> Self {
        self.adjacent = Some(assert);
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn Expression>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_post_filter(mut self, filter: Arc<dyn Expression>) -> Self {
        self.post_filter = Some(filter);
        self
    }

    pub fn with_collect(mut self, collect: CollectPolicy) -> Self {
        self.collect = collect;
        self
    }

    pub fn with_neighbor(mut self, level: LevelSpec) -> Self {
        self.neighbor = Some(Box::new(level));
        self
    }

    /// Number of levels from here down.
    pub fn depth(&self) -> usize {
        1 + self.neighbor.as_ref().map_or(0, |n| n.depth())
    }

    /// Whether any level beneath this one collects.
    pub fn collects_below(&self) -> bool {
        self.neighbor
            .as_ref()
            .map_or(false, |n| n.collect == CollectPolicy::Collect || n.collects_below())
    }
}

// ============================================================================
// Ordering
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortBy {
    /// Discovery order.
    #[default]
    None,
    Value,
    Rank,
    Identifier,
    InternalId,
    Degree,
    InDegree,
    OutDegree,
    TimeCreated,
    TimeModified,
    TimeExpires,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortBy {
    /// Direction used when a query names the key without a direction.
    pub fn default_direction(self) -> SortDirection {
        match self {
            SortBy::Value | SortBy::Rank => SortDirection::Descending,
            SortBy::None
            | SortBy::Identifier
            | SortBy::InternalId
            | SortBy::Degree
            | SortBy::InDegree
            | SortBy::OutDegree
            | SortBy::TimeCreated
            | SortBy::TimeModified
            | SortBy::TimeExpires => SortDirection::Ascending,
        }
    }
}

// ============================================================================
// Query
// ============================================================================

#[derive(Debug, Clone)]
pub struct Query {
    pub anchor: String,
    pub level: LevelSpec,
    /// Score for each collected entry. Without an explicit sort key the
    /// result is ordered by descending score.
    pub rank: Option<Arc<dyn Expression>>,
    pub sort_by: SortBy,
    pub sort_direction: Option<SortDirection>,
    pub offset: usize,
    /// `None` is unbounded.
    pub hits: Option<usize>,
    /// Bound on each blocking lock wait.
    pub timeout: Option<Duration>,
    /// Also bound the total running time by `timeout`.
    pub limexec: bool,
}

impl Query {
    pub fn new(anchor: &str) -> Self {
        Self {
            anchor: anchor.to_string(),
            level: LevelSpec::default(),
            rank: None,
            sort_by: SortBy::None,
            sort_direction: None,
            offset: 0,
            hits: None,
            timeout: None,
            limexec: false,
        }
    }

    pub fn with_level(mut self, level: LevelSpec) -> Self {
        self.level = level;
        self
    }

    pub fn with_arc(mut self, arc: ArcProbe) -> Self {
        self.level.arc = arc;
        self
    }

    pub fn with_vertex(mut self, condition: VertexCondition) -> Self {
        self.level.vertex = Some(condition);
        self
    }

    pub fn with_adjacent(mut self, assert: AdjacencyAssert) -> Self {
        self.level.adjacent = Some(assert);
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn Expression>) -> Self {
        self.level.filter = Some(filter);
        self
    }

    pub fn with_post_filter(mut self, filter: Arc<dyn Expression>) -> Self {
        self.level.post_filter = Some(filter);
        self
    }

    pub fn with_collect(mut self, collect: CollectPolicy) -> Self {
        self.level.collect = collect;
        self
    }

    pub fn with_neighbor(mut self, level: LevelSpec) -> Self {
        self.level.neighbor = Some(Box::new(level));
        self
    }

    pub fn with_rank(mut self, rank: Arc<dyn Expression>) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn sort_by(mut self, key: SortBy) -> Self {
        self.sort_by = key;
        self
    }

    pub fn sort_direction(mut self, direction: SortDirection) -> Self {
        self.sort_direction = Some(direction);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_hits(mut self, hits: usize) -> Self {
        self.hits = Some(hits);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_limexec(mut self, limexec: bool) -> Self {
        self.limexec = limexec;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Direction;

    #[test]
    fn test_sort_defaults_are_per_key() {
        assert_eq!(SortBy::Value.default_direction(), SortDirection::Descending);
        assert_eq!(SortBy::Rank.default_direction(), SortDirection::Descending);
        for key in [SortBy::Identifier, SortBy::Degree, SortBy::TimeCreated, SortBy::InternalId] {
            assert_eq!(key.default_direction(), SortDirection::Ascending);
        }
    }

    #[test]
    fn test_nested_levels() {
        let q = Query::new("A")
            .with_arc(ArcProbe::out())
            .with_collect(CollectPolicy::None)
            .with_neighbor(
                LevelSpec::condition(ArcProbe::new("b", Direction::Out))
                    .with_neighbor(LevelSpec::new(ArcProbe::any())),
            );
        assert_eq!(q.level.depth(), 3);
        assert!(q.level.collects_below());
        let inner = q.level.neighbor.as_deref().unwrap();
        assert_eq!(inner.collect, CollectPolicy::None);
        assert!(inner.collects_below());
        assert!(!inner.neighbor.as_deref().unwrap().collects_below());
    }
}
