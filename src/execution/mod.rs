//! Traversal executor.
//!
//! Runs a [`TraversalPlan`] depth-first. Each level:
//!
//! 1. checks the adjacency assert against its anchor
//! 2. snapshots the anchor's arcs accepted by the probe
//! 3. per arc: acquires the neighbor readonly, applies the vertex condition
//!    and the filter, collects, recurses, then applies the post-filter
//!
//! Collected entries from every level go into one pool which is sorted and
//! windowed at the end. A vertex is held only while its candidate is being
//! processed, so a long traversal is not a consistent cut of the graph.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::eval::{truthy, Candidate, Expression, Registers};
use crate::index::Predicator;
use crate::model::*;
use crate::planner::{PlannedAssert, PlannedLevel, TraversalPlan};
use crate::query::{CollectPolicy, SortBy, SortDirection};
use crate::storage::{Store, VertexHandle};
use crate::{AccessError, Error, Result};

/// One collected arc and the vertex at its far end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub arc: ArcRecord,
    pub vertex: VertexInfo,
    pub depth: usize,
    pub rank: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub entries: Vec<ResultEntry>,
    /// Collected entries before offset / hits were applied.
    pub total: usize,
    pub elapsed: Duration,
    pub visited_arcs: u64,
    pub visited_vertices: u64,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct neighbor identifiers in result order.
    pub fn neighbors(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|e| seen.insert(e.vertex.key))
            .map(|e| e.vertex.id.clone())
            .collect()
    }

    pub fn arcs(&self) -> Vec<ArcRecord> {
        self.entries.iter().map(|e| e.arc.clone()).collect()
    }
}

/// Totals over every collected entry of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Distinct neighbors.
    pub neighbors: u64,
    pub arcs: u64,
    pub value_sum: f64,
    pub degree: u64,
    pub indegree: u64,
    pub outdegree: u64,
}

// ============================================================================
// Entry points
// ============================================================================

pub fn execute(store: &Arc<Store>, plan: &TraversalPlan) -> Result<QueryResult> {
    let mut walk = run(store, plan)?;
    let mut pool = std::mem::take(&mut walk.pool);
    if let Some((key, direction)) = plan.sort {
        // Stable: ties keep discovery order in both directions.
        pool.sort_by(|a, b| {
            let ord = compare(key, a, b);
            match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
    }
    let total = pool.len();
    let entries = pool
        .into_iter()
        .skip(plan.offset)
        .take(plan.hits.unwrap_or(usize::MAX))
        .collect();
    Ok(QueryResult {
        entries,
        total,
        elapsed: walk.started.elapsed(),
        visited_arcs: walk.visited_arcs,
        visited_vertices: walk.visited_vertices,
    })
}

/// Same traversal as [`execute`], reduced to totals. Offset and hits do
/// not apply.
pub fn aggregate(store: &Arc<Store>, plan: &TraversalPlan) -> Result<Aggregation> {
    let walk = run(store, plan)?;
    let mut agg = Aggregation::default();
    let mut seen = HashSet::new();
    for e in &walk.pool {
        agg.arcs += 1;
        agg.value_sum += e.arc.value.as_f64();
        if seen.insert(e.vertex.key) {
            agg.neighbors += 1;
        }
        agg.degree += e.vertex.degree();
        agg.indegree += e.vertex.indegree;
        agg.outdegree += e.vertex.outdegree;
    }
    Ok(agg)
}

fn run<'a>(store: &'a Arc<Store>, plan: &'a TraversalPlan) -> Result<Walk<'a>> {
    let mut walk = Walk {
        store,
        plan,
        registers: Registers::new(),
        pool: Vec::new(),
        started: Instant::now(),
        visited_arcs: 0,
        visited_vertices: 0,
    };
    let anchor = store.open_vertex(&plan.anchor, OpenMode::Readonly, plan.timeout)?;
    walk.level(&anchor, &plan.root, 1)?;
    drop(anchor);
    tracing::debug!(
        anchor = %plan.anchor,
        collected = walk.pool.len(),
        arcs = walk.visited_arcs,
        elapsed_us = walk.started.elapsed().as_micros() as u64,
        "traversal done"
    );
    Ok(walk)
}

fn compare(key: SortBy, a: &ResultEntry, b: &ResultEntry) -> Ordering {
    let (va, vb) = (&a.vertex, &b.vertex);
    match key {
        SortBy::None => Ordering::Equal,
        SortBy::Value => a.arc.value.as_f64().total_cmp(&b.arc.value.as_f64()),
        SortBy::Rank => {
            let ra = a.rank.unwrap_or(f64::NEG_INFINITY);
            ra.total_cmp(&b.rank.unwrap_or(f64::NEG_INFINITY))
        }
        SortBy::Identifier => va.id.cmp(&vb.id),
        SortBy::InternalId => va.key.cmp(&vb.key),
        SortBy::Degree => va.degree().cmp(&vb.degree()),
        SortBy::InDegree => va.indegree.cmp(&vb.indegree),
        SortBy::OutDegree => va.outdegree.cmp(&vb.outdegree),
        SortBy::TimeCreated => va.created.cmp(&vb.created),
        SortBy::TimeModified => va.modified.cmp(&vb.modified),
        // Never-expiring vertices sort as the latest.
        SortBy::TimeExpires => va.expires.unwrap_or(u32::MAX).cmp(&vb.expires.unwrap_or(u32::MAX)),
    }
}

// ============================================================================
// Walk
// ============================================================================

struct Walk<'a> {
    store: &'a Arc<Store>,
    plan: &'a TraversalPlan,
    registers: Registers,
    pool: Vec<ResultEntry>,
    started: Instant,
    visited_arcs: u64,
    visited_vertices: u64,
}

impl<'a> Walk<'a> {
    /// Process one level with `anchor` held. Returns whether any candidate
    /// survived every stage.
    fn level(&mut self, anchor: &VertexHandle, level: &PlannedLevel, depth: usize) -> Result<bool> {
        if let Some(assert) = &level.adjacent {
            if !assert_holds(anchor, assert) {
                return Ok(false);
            }
        }
        if level.filter.matches_nothing() {
            return Ok(false);
        }
        let plan = self.plan;
        let arcs = anchor.matching_arcs(&level.filter, level.direction);
        let mut matched = false;

        for (key, direction, arc) in arcs {
            self.check_time_limit()?;
            self.visited_arcs += 1;
            let deadline = self.store.locks().deadline(plan.timeout);
            let Some(neighbor) = self.store.open_key_readonly(key, deadline)? else {
                continue;
            };
            self.visited_vertices += 1;
            if let Some(cond) = &level.vertex {
                if !cond.admits(neighbor.key(), neighbor.type_code(), neighbor.manifestation()) {
                    continue;
                }
            }
            let info = neighbor.info();
            let record = self.record(anchor, direction, &arc, &info);
            let candidate = Candidate { arc: &record, vertex: &info, depth };
            let mark = self.pool.len();

            if let Some(filter) = &level.predicate {
                if !truthy(self.eval(filter, &candidate)?) {
                    continue;
                }
            }
            if level.collect == CollectPolicy::Collect {
                let rank = match &plan.rank {
                    Some(rank) => Some(self.eval(rank, &candidate)?),
                    None => None,
                };
                self.pool.push(ResultEntry { arc: record.clone(), vertex: info.clone(), depth, rank });
            }
            if let Some(next) = &level.neighbor {
                if !self.level(&neighbor, next, depth + 1)? {
                    self.pool.truncate(mark);
                    continue;
                }
            }
            if let Some(post) = &level.post_filter {
                if !truthy(self.eval(post, &candidate)?) {
                    self.pool.truncate(mark);
                    continue;
                }
            }
            matched = true;
            if level.short_circuit {
                break;
            }
        }
        Ok(matched)
    }

    fn record(&self, anchor: &VertexHandle, direction: Direction, arc: &Predicator, neighbor: &VertexInfo) -> ArcRecord {
        ArcRecord {
            anchor: anchor.id().to_string(),
            relationship: self.store.relationship_label(arc.rel),
            direction,
            kind: arc.kind,
            value: arc.value,
            forward_only: arc.forward_only,
            neighbor: neighbor.id.clone(),
        }
    }

    /// Evaluator failures fail the query; they never skip the arc.
    fn eval(&mut self, expr: &Arc<dyn Expression>, candidate: &Candidate<'_>) -> Result<f64> {
        expr.evaluate(candidate, &mut self.registers).map_err(|e| match e {
            Error::Query(_) => e,
            other => Error::Query(format!(
                "{} failed on {} -> {}: {other}",
                expr.describe(),
                candidate.arc.anchor,
                candidate.arc.neighbor
            )),
        })
    }

    fn check_time_limit(&self) -> Result<()> {
        if let Some(limit) = self.plan.time_limit {
            let elapsed = self.started.elapsed();
            if elapsed > limit {
                tracing::debug!(anchor = %self.plan.anchor, ?elapsed, "query time limit exceeded");
                return Err(AccessError::ExecutionTimeout { elapsed_ms: elapsed.as_millis() as u64 }.into());
            }
        }
        Ok(())
    }
}

fn assert_holds(anchor: &VertexHandle, assert: &PlannedAssert) -> bool {
    let found = anchor.has_matching_arc(&assert.filter, assert.direction, assert.neighbors.as_deref());
    found != assert.negate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::enumerator::MemoryEnumerator;
    use crate::eval::{self, FnExpression};
    use crate::planner::plan;
    use crate::query::{AdjacencyAssert, LevelSpec, Query, VertexCondition};
    use crate::storage::Connect;
    use pretty_assertions::assert_eq;

    fn store() -> Arc<Store> {
        Store::new(GraphConfig::default(), Arc::new(MemoryEnumerator::new()))
    }

    fn run_query(s: &Arc<Store>, q: &Query) -> Result<QueryResult> {
        execute(s, &plan(s, q)?)
    }

    fn ids(r: &QueryResult) -> Vec<String> {
        r.entries.iter().map(|e| e.vertex.id.clone()).collect()
    }

    /// root -first-> f0..f2, each f -second-> s_i_0..s_i_1
    fn two_levels() -> Arc<Store> {
        let s = store();
        for i in 0..3 {
            let f = format!("f{i}");
            s.connect(&Connect::new("root", ArcSpec::valued("first", ModifierKind::Integer, i), &f)).unwrap();
            for j in 0..2 {
                let t = format!("s{i}{j}");
                s.connect(&Connect::new(&f, ArcSpec::valued("second", ModifierKind::Integer, j), &t)).unwrap();
            }
        }
        s
    }

    #[test]
    fn test_collect_policies() {
        let s = two_levels();
        let first = ArcProbe::new("first", Direction::Out);
        let second = ArcProbe::new("second", Direction::Out);

        let r = run_query(&s, &Query::new("root").with_arc(first.clone())).unwrap();
        assert_eq!(r.len(), 3);

        let r = run_query(&s, &Query::new("root").with_arc(first.clone()).with_collect(CollectPolicy::None)).unwrap();
        assert!(r.is_empty());

        // Traverse "first", collect only the second level
        let q = Query::new("root")
            .with_arc(first.clone())
            .with_collect(CollectPolicy::Scan)
            .with_neighbor(LevelSpec::new(second.clone()));
        let r = run_query(&s, &q).unwrap();
        assert_eq!(r.len(), 6);
        assert!(r.entries.iter().all(|e| e.depth == 2 && e.arc.relationship == "second"));
    }

    #[test]
    fn test_nested_condition_short_circuits() {
        let s = two_levels();
        s.connect(&Connect::new("root", "first", "leaf")).unwrap();
        let q = Query::new("root")
            .with_arc(ArcProbe::new("first", Direction::Out))
            .with_neighbor(LevelSpec::condition(ArcProbe::new("second", Direction::Out)));
        let r = run_query(&s, &q).unwrap();
        let mut got = ids(&r);
        got.sort();
        assert_eq!(got, vec!["f0", "f1", "f2"]);
        // root arcs: 4, plus one second-level arc per f thanks to short-circuit
        assert_eq!(r.visited_arcs, 4 + 3);
    }

    #[test]
    fn test_vertex_condition_and_assert() {
        let s = two_levels();
        let q = Query::new("root")
            .with_arc(ArcProbe::out())
            .with_vertex(VertexCondition::new().with_identifiers(["f1", "f2", "nobody"]));
        assert_eq!(run_query(&s, &q).unwrap().len(), 2);

        let virtual_only = Query::new("root").with_vertex(VertexCondition::new().with_manifestation(Manifestation::Virtual));
        assert!(run_query(&s, &virtual_only).unwrap().is_empty());

        let assert = AdjacencyAssert::exists(ArcProbe::new("first", Direction::Out)).with_neighbors(["f0"]);
        assert_eq!(run_query(&s, &Query::new("root").with_adjacent(assert)).unwrap().len(), 3);
        let negated = AdjacencyAssert::absent(ArcProbe::new("first", Direction::Out));
        assert!(run_query(&s, &Query::new("root").with_adjacent(negated)).unwrap().is_empty());
    }

    #[test]
    fn test_filter_and_post_filter() {
        let s = two_levels();
        let odd = FnExpression::shared("odd", |c: &Candidate<'_>, _: &mut Registers| Ok((c.value() as i64 % 2) as f64));
        let q = Query::new("root").with_arc(ArcProbe::new("first", Direction::Out)).with_filter(odd);
        assert_eq!(ids(&run_query(&s, &q).unwrap()), vec!["f1"]);

        // Post-filter sees registers written by the nested level
        let tally = FnExpression::shared("tally", |_: &Candidate<'_>, r: &mut Registers| Ok(r.incr("n", 1.0)));
        let veto_after_first = FnExpression::shared("first-only", |_: &Candidate<'_>, r: &mut Registers| {
            Ok((r.get("n").unwrap_or(0.0) <= 2.0) as u8 as f64)
        });
        let q = Query::new("root")
            .with_arc(ArcProbe::new("first", Direction::Out))
            .with_post_filter(veto_after_first)
            .with_neighbor(LevelSpec::new(ArcProbe::new("second", Direction::Out)).with_filter(tally));
        let r = run_query(&s, &q).unwrap();
        // One first-level entry and its two children survive
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn test_filter_error_fails_query() {
        let s = two_levels();
        let q = Query::new("root").with_filter(eval::property("missing"));
        assert!(matches!(run_query(&s, &q), Err(Error::Query(_))));
    }

    #[test]
    fn test_sort_and_window() {
        let s = two_levels();
        let probe = ArcProbe::new("first", Direction::Out);
        let q = Query::new("root").with_arc(probe.clone()).sort_by(SortBy::Value);
        assert_eq!(ids(&run_query(&s, &q).unwrap()), vec!["f2", "f1", "f0"]);

        let q = Query::new("root").with_arc(probe.clone()).sort_by(SortBy::Identifier).with_offset(1).with_hits(1);
        let r = run_query(&s, &q).unwrap();
        assert_eq!(ids(&r), vec!["f1"]);
        assert_eq!(r.total, 3);

        let neg = FnExpression::shared("neg", |c: &Candidate<'_>, _: &mut Registers| Ok(-c.value()));
        let q = Query::new("root").with_arc(probe).with_rank(neg);
        let r = run_query(&s, &q).unwrap();
        assert_eq!(ids(&r), vec!["f0", "f1", "f2"]);
        assert_eq!(r.entries[0].rank, Some(0.0));
    }

    #[test]
    fn test_zero_hits_still_scans() {
        let s = two_levels();
        let count = FnExpression::shared("count", |_: &Candidate<'_>, r: &mut Registers| Ok(r.incr("n", 1.0)));
        let q = Query::new("root").with_filter(count).with_hits(0);
        let r = run_query(&s, &q).unwrap();
        assert!(r.is_empty());
        assert_eq!(r.total, 3);
    }

    #[test]
    fn test_limexec_bounds_total_time() {
        let s = two_levels();
        let slow = FnExpression::shared("slow", |_: &Candidate<'_>, _: &mut Registers| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(1.0)
        });
        let q = Query::new("root").with_filter(slow.clone()).with_timeout(Duration::from_millis(5));
        assert_eq!(run_query(&s, &q).unwrap().len(), 3);
        let q = q.with_limexec(true);
        assert!(matches!(
            run_query(&s, &q),
            Err(Error::Access(AccessError::ExecutionTimeout { .. }))
        ));
    }

    #[test]
    fn test_aggregate() {
        let s = two_levels();
        let q = Query::new("root").with_arc(ArcProbe::new("first", Direction::Out));
        let agg = aggregate(&s, &plan(&s, &q).unwrap()).unwrap();
        assert_eq!(agg.arcs, 3);
        assert_eq!(agg.neighbors, 3);
        assert_eq!(agg.value_sum, 3.0);
        assert_eq!(agg.outdegree, 6);
        assert_eq!(agg.indegree, 3);
    }

    #[test]
    fn test_missing_anchor_is_key_error() {
        let s = store();
        assert!(matches!(run_query(&s, &Query::new("nobody")), Err(Error::Key(_))));
    }
}
