//! # Arc Index
//!
//! Per-vertex, per-direction adjacency set. Arcs are keyed by the vertex at
//! the other end, then by `(relationship, kind)`.
//!
//! | Tier | Shape | Used when |
//! |------|-------|-----------|
//! | `Empty` | nothing | no arcs |
//! | `Single` | one inline arc | exactly one arc |
//! | `Multi` | hash map of neighbor → arc list | two or more arcs |
//!
//! Promotion and demotion happen inside [`ArcIndex::insert`] and
//! [`ArcIndex::remove`]. Enumeration order depends on the tier and is not
//! stable across mutations.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::model::{ArcValue, ModifierKind, ValueComparator, VertexKey};

/// Enumerated relationship label.
pub type RelCode = u16;

/// The stored part of an arc: everything except its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Predicator {
    pub rel: RelCode,
    pub kind: ModifierKind,
    pub value: ArcValue,
    pub forward_only: bool,
}

impl Predicator {
    pub fn same_slot(&self, rel: RelCode, kind: ModifierKind) -> bool {
        self.rel == rel && self.kind == kind
    }
}

type ArcList = SmallVec<[Predicator; 2]>;

/// Storage tier, exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Empty,
    Single,
    Multi,
}

#[derive(Debug, Clone, Default)]
pub enum ArcIndex {
    #[default]
    Empty,
    Single {
        neighbor: VertexKey,
        arc: Predicator,
    },
    Multi {
        arcs: HashMap<VertexKey, ArcList>,
        len: usize,
    },
}

impl ArcIndex {
    pub fn tier(&self) -> Tier {
        match self {
            ArcIndex::Empty => Tier::Empty,
            ArcIndex::Single { .. } => Tier::Single,
            ArcIndex::Multi { .. } => Tier::Multi,
        }
    }

    /// Number of arcs.
    pub fn len(&self) -> usize {
        match self {
            ArcIndex::Empty => 0,
            ArcIndex::Single { .. } => 1,
            ArcIndex::Multi { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct neighbors.
    pub fn neighbor_count(&self) -> usize {
        match self {
            ArcIndex::Empty => 0,
            ArcIndex::Single { .. } => 1,
            ArcIndex::Multi { arcs, .. } => arcs.len(),
        }
    }

    /// All arcs shared with `neighbor`.
    pub fn arcs_to(&self, neighbor: VertexKey) -> &[Predicator] {
        match self {
            ArcIndex::Single { neighbor: n, arc } if *n == neighbor => std::slice::from_ref(arc),
            ArcIndex::Multi { arcs, .. } => arcs.get(&neighbor).map(|l| l.as_slice()).unwrap_or(&[]),
            _ => &[],
        }
    }

    pub fn contains(&self, neighbor: VertexKey) -> bool {
        !self.arcs_to(neighbor).is_empty()
    }

    pub fn get(&self, neighbor: VertexKey, rel: RelCode, kind: ModifierKind) -> Option<&Predicator> {
        self.arcs_to(neighbor).iter().find(|p| p.same_slot(rel, kind))
    }

    pub fn get_mut(&mut self, neighbor: VertexKey, rel: RelCode, kind: ModifierKind) -> Option<&mut Predicator> {
        match self {
            ArcIndex::Single { neighbor: n, arc } if *n == neighbor && arc.same_slot(rel, kind) => Some(arc),
            ArcIndex::Multi { arcs, .. } => arcs
                .get_mut(&neighbor)
                .and_then(|l| l.iter_mut().find(|p| p.same_slot(rel, kind))),
            _ => None,
        }
    }

    /// Insert or replace the arc in `arc`'s `(rel, kind)` slot. Returns the
    /// previous arc in that slot.
    pub fn insert(&mut self, neighbor: VertexKey, arc: Predicator) -> Option<Predicator> {
        if let Some(slot) = self.get_mut(neighbor, arc.rel, arc.kind) {
            return Some(std::mem::replace(slot, arc));
        }
        match std::mem::take(self) {
            ArcIndex::Empty => {
                *self = ArcIndex::Single { neighbor, arc };
            }
            ArcIndex::Single { neighbor: n0, arc: a0 } => {
                let mut arcs: HashMap<VertexKey, ArcList> = HashMap::with_capacity(2);
                arcs.entry(n0).or_default().push(a0);
                arcs.entry(neighbor).or_default().push(arc);
                tracing::trace!("arc index promoted to multi tier");
                *self = ArcIndex::Multi { arcs, len: 2 };
            }
            ArcIndex::Multi { mut arcs, len } => {
                arcs.entry(neighbor).or_default().push(arc);
                *self = ArcIndex::Multi { arcs, len: len + 1 };
            }
        }
        None
    }

    /// Remove the arc in the `(rel, kind)` slot toward `neighbor`.
    pub fn remove(&mut self, neighbor: VertexKey, rel: RelCode, kind: ModifierKind) -> Option<Predicator> {
        let removed = match self {
            ArcIndex::Empty => None,
            ArcIndex::Single { neighbor: n, arc } => {
                if *n == neighbor && arc.same_slot(rel, kind) {
                    let arc = *arc;
                    *self = ArcIndex::Empty;
                    return Some(arc);
                }
                None
            }
            ArcIndex::Multi { arcs, len } => {
                let list = arcs.get_mut(&neighbor)?;
                let pos = list.iter().position(|p| p.same_slot(rel, kind))?;
                let arc = list.remove(pos);
                if list.is_empty() {
                    arcs.remove(&neighbor);
                }
                *len -= 1;
                Some(arc)
            }
        };
        if removed.is_some() {
            self.demote();
        }
        removed
    }

    /// Collapse a multi tier that no longer needs to be one.
    fn demote(&mut self) {
        if let ArcIndex::Multi { arcs, len } = self {
            match *len {
                0 => *self = ArcIndex::Empty,
                1 => {
                    let single = arcs
                        .iter()
                        .find_map(|(n, l)| l.first().map(|a| (*n, *a)));
                    if let Some((neighbor, arc)) = single {
                        tracing::trace!("arc index demoted to single tier");
                        *self = ArcIndex::Single { neighbor, arc };
                    }
                }
                _ => {}
            }
        }
    }

    pub fn clear(&mut self) {
        *self = ArcIndex::Empty;
    }

    pub fn iter(&self) -> ArcIter<'_> {
        match self {
            ArcIndex::Empty => ArcIter::Done,
            ArcIndex::Single { neighbor, arc } => ArcIter::Single(Some((*neighbor, arc))),
            ArcIndex::Multi { arcs, .. } => ArcIter::Multi { outer: arcs.iter(), current: None },
        }
    }

    /// Copy out every arc `filter` accepts.
    pub fn matching(&self, filter: &ArcFilter) -> Vec<(VertexKey, Predicator)> {
        self.iter()
            .filter(|(_, p)| filter.matches(p))
            .map(|(n, p)| (n, *p))
            .collect()
    }

    pub fn count_matching(&self, filter: &ArcFilter) -> usize {
        self.iter().filter(|(_, p)| filter.matches(p)).count()
    }
}

/// Iterator over `(neighbor, arc)` pairs.
pub enum ArcIter<'a> {
    Done,
    Single(Option<(VertexKey, &'a Predicator)>),
    Multi {
        outer: hashbrown::hash_map::Iter<'a, VertexKey, ArcList>,
        current: Option<(VertexKey, std::slice::Iter<'a, Predicator>)>,
    },
}

impl<'a> Iterator for ArcIter<'a> {
    type Item = (VertexKey, &'a Predicator);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ArcIter::Done => None,
            ArcIter::Single(item) => item.take(),
            ArcIter::Multi { outer, current } => loop {
                if let Some((neighbor, arcs)) = current {
                    if let Some(arc) = arcs.next() {
                        return Some((*neighbor, arc));
                    }
                }
                let (neighbor, list) = outer.next()?;
                *current = Some((*neighbor, list.iter()));
            },
        }
    }
}

// ============================================================================
// Resolved arc filter
// ============================================================================

/// Relationship part of a resolved filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelMatch {
    Any,
    Code(RelCode),
    /// The label is not enumerated, so no stored arc can carry it.
    Nothing,
}

/// A probe with its relationship label resolved to a code. Direction is
/// applied by the caller, which picks the out or in index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcFilter {
    pub rel: RelMatch,
    pub kind: Option<ModifierKind>,
    pub value: ValueComparator,
}

impl ArcFilter {
    pub fn any() -> Self {
        Self { rel: RelMatch::Any, kind: None, value: ValueComparator::Any }
    }

    pub fn matches(&self, arc: &Predicator) -> bool {
        let rel_ok = match self.rel {
            RelMatch::Any => true,
            RelMatch::Code(code) => arc.rel == code,
            RelMatch::Nothing => false,
        };
        rel_ok
            && self.kind.map_or(true, |k| k == arc.kind)
            && (self.value.is_any() || self.value.matches(arc.value.as_f64()))
    }

    pub fn matches_nothing(&self) -> bool {
        self.rel == RelMatch::Nothing
    }
}
