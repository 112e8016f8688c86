//! Read-only arc probes: ArcValue, Adjacent, Degree.

use std::sync::Arc;
use std::time::Duration;

use super::{Store, VertexData, VertexHandle};
use crate::enumerator::TypeCode;
use crate::index::{ArcFilter, Predicator};
use crate::model::*;
use crate::Result;

/// Arcs between the anchor and one neighbor that `filter` accepts,
/// outbound side first.
fn arcs_between<'a>(
    data: &'a VertexData,
    neighbor: VertexKey,
    filter: &'a ArcFilter,
    direction: Direction,
) -> impl Iterator<Item = &'a Predicator> + 'a {
    let out: &[Predicator] = if direction.includes_out() { data.out.arcs_to(neighbor) } else { &[] };
    let inarcs: &[Predicator] = if direction.includes_in() { data.inarcs.arcs_to(neighbor) } else { &[] };
    out.iter().chain(inarcs.iter()).filter(move |p| filter.matches(p))
}

impl Store {
    /// Value of the first arc between `initial` and `terminal` that matches
    /// `probe`.
    pub fn arc_value(
        self: &Arc<Self>,
        initial: &str,
        probe: &ArcProbe,
        terminal: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<ArcValue>> {
        let filter = self.resolve_filter(probe)?;
        let handle = self.open_vertex(initial, OpenMode::Readonly, timeout)?;
        let Some(term) = self.lookup(terminal) else {
            return Ok(None);
        };
        let data = handle.cell.data.read();
        let value = arcs_between(&data, term.key, &filter, probe.direction)
            .next()
            .map(|p| p.value);
        Ok(value)
    }

    pub fn adjacent(
        self: &Arc<Self>,
        anchor: &str,
        probe: &ArcProbe,
        neighbor: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let filter = self.resolve_filter(probe)?;
        let handle = self.open_vertex(anchor, OpenMode::Readonly, timeout)?;
        let found = match neighbor {
            Some(id) => match self.lookup(id) {
                Some(cell) => handle.has_matching_arc(&filter, probe.direction, Some(std::slice::from_ref(&cell.key))),
                None => false,
            },
            None => handle.has_matching_arc(&filter, probe.direction, None),
        };
        Ok(found)
    }

    /// Without a probe: total degree, forward-only inarcs included. With a
    /// probe: the number of indexed arcs it matches.
    pub fn degree(self: &Arc<Self>, anchor: &str, probe: Option<&ArcProbe>, timeout: Option<Duration>) -> Result<u64> {
        let handle = self.open_vertex(anchor, OpenMode::Readonly, timeout)?;
        let Some(probe) = probe else {
            return Ok(handle.degree());
        };
        let filter = self.resolve_filter(probe)?;
        let data = handle.cell.data.read();
        let mut n = 0;
        if probe.direction.includes_out() {
            n += data.out.count_matching(&filter);
        }
        if probe.direction.includes_in() {
            n += data.inarcs.count_matching(&filter);
        }
        Ok(n as u64)
    }
}

impl VertexHandle {
    /// Copy out the arcs accepted by `filter`, outbound first.
    pub(crate) fn matching_arcs(&self, filter: &ArcFilter, direction: Direction) -> Vec<(VertexKey, Direction, Predicator)> {
        let data = self.cell.data.read();
        let mut arcs = Vec::new();
        if direction.includes_out() {
            arcs.extend(data.out.matching(filter).into_iter().map(|(k, p)| (k, Direction::Out, p)));
        }
        if direction.includes_in() {
            arcs.extend(data.inarcs.matching(filter).into_iter().map(|(k, p)| (k, Direction::In, p)));
        }
        arcs
    }

    /// Whether any arc accepted by `filter` exists, optionally only towards
    /// `neighbors`.
    pub(crate) fn has_matching_arc(&self, filter: &ArcFilter, direction: Direction, neighbors: Option<&[VertexKey]>) -> bool {
        let data = self.cell.data.read();
        match neighbors {
            Some(keys) => keys
                .iter()
                .any(|k| arcs_between(&data, *k, filter, direction).next().is_some()),
            None => {
                (direction.includes_out() && data.out.count_matching(filter) > 0)
                    || (direction.includes_in() && data.inarcs.count_matching(filter) > 0)
            }
        }
    }

    pub(crate) fn type_code(&self) -> Option<TypeCode> {
        self.cell.data.read().vtype
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::enumerator::MemoryEnumerator;
    use crate::storage::Connect;

    fn store() -> Arc<Store> {
        Store::new(GraphConfig::default(), Arc::new(MemoryEnumerator::new()))
    }

    #[test]
    fn test_arc_value_by_direction() {
        let s = store();
        s.connect(&Connect::new("A", ArcSpec::valued("to", ModifierKind::Integer, 5), "B")).unwrap();
        let out = ArcProbe::new("to", Direction::Out);
        let inbound = ArcProbe::new("to", Direction::In);
        assert_eq!(s.arc_value("A", &out, "B", None).unwrap(), Some(ArcValue::Integer(5)));
        assert_eq!(s.arc_value("A", &inbound, "B", None).unwrap(), None);
        assert_eq!(s.arc_value("B", &inbound, "A", None).unwrap(), Some(ArcValue::Integer(5)));
        assert_eq!(s.arc_value("A", &out, "nobody", None).unwrap(), None);
        assert!(matches!(s.arc_value("nobody", &out, "A", None), Err(crate::Error::Key(_))));
    }

    #[test]
    fn test_adjacent_and_degree() {
        let s = store();
        s.connect(&Connect::new("A", ArcSpec::valued("w", ModifierKind::Float, 0.5), "B")).unwrap();
        s.connect(&Connect::new("A", ArcSpec::valued("w", ModifierKind::Float, 2.5), "C")).unwrap();
        s.connect(&Connect::new("D", "to", "A")).unwrap();

        let heavy = ArcProbe::new("w", Direction::Out).with_value(ValueComparator::Gt(1.0));
        assert!(s.adjacent("A", &heavy, Some("C"), None).unwrap());
        assert!(!s.adjacent("A", &heavy, Some("B"), None).unwrap());
        assert!(s.adjacent("A", &heavy, None, None).unwrap());

        assert_eq!(s.degree("A", None, None).unwrap(), 3);
        assert_eq!(s.degree("A", Some(&heavy), None).unwrap(), 1);
        assert_eq!(s.degree("A", Some(&ArcProbe::inbound()), None).unwrap(), 1);
    }
}
