//! Snapshot export / import.
//!
//! Two formats:
//!
//! ```text
//! export_snapshot()  → JSON GraphSnapshot  → import_snapshot() / load_graph()
//! export_arc_dump()  → one line per arc, for diffing and eyeballing
//! ```
//!
//! Both read the graph through [`Graph::snapshot`], so every vertex is held
//! readonly while it is copied.

use std::io::{Read, Write};
use std::time::Duration;

use crate::model::*;
use crate::storage::GraphSnapshot;
use crate::{Graph, GraphConfig, Result};

/// Write the whole graph as a JSON [`GraphSnapshot`].
pub fn export_snapshot(graph: &Graph, writer: &mut dyn Write, timeout: Option<Duration>) -> Result<()> {
    let snapshot = graph.snapshot(timeout)?;
    serde_json::to_writer(&mut *writer, &snapshot)?;
    writer.flush()?;
    Ok(())
}

pub fn import_snapshot(reader: &mut dyn Read) -> Result<GraphSnapshot> {
    Ok(serde_json::from_reader(reader)?)
}

/// Build a new graph from a JSON snapshot. The graph takes the snapshot's
/// name; everything else comes from `config`.
pub fn load_graph(config: GraphConfig, reader: &mut dyn Read) -> Result<Graph> {
    let snapshot = import_snapshot(reader)?;
    let graph = Graph::with_config(config.with_name(&snapshot.name));
    graph.restore(&snapshot)?;
    Ok(graph)
}

/// Write a line-per-arc text dump:
///
/// ```text
/// # graph: social
/// # vertices: 3
/// # arcs: 2
/// alice -[knows, M_INT, 5]-> bob
/// alice -[seen, M_TMC, 1700000000, fwd]-> carol
/// ```
pub fn export_arc_dump(graph: &Graph, writer: &mut dyn Write, timeout: Option<Duration>) -> Result<()> {
    let snapshot = graph.snapshot(timeout)?;
    writeln!(writer, "# graph: {}", snapshot.name)?;
    writeln!(writer, "# vertices: {}", snapshot.vertices.len())?;
    writeln!(writer, "# arcs: {}", snapshot.arcs.len())?;
    for arc in &snapshot.arcs {
        let mut parts = vec![arc.relationship.clone(), arc.kind.name().to_string()];
        if let Some(v) = format_value(&arc.value) {
            parts.push(v);
        }
        if arc.forward_only {
            parts.push("fwd".into());
        }
        writeln!(writer, "{} -[{}]-> {}", arc.initial, parts.join(", "), arc.terminal)?;
    }
    writer.flush()?;
    Ok(())
}

fn format_value(value: &ArcValue) -> Option<String> {
    match value {
        ArcValue::None => None,
        ArcValue::Integer(i) => Some(i.to_string()),
        ArcValue::Unsigned(u) => Some(u.to_string()),
        ArcValue::Real(f) => Some(format!("{f}")),
    }
}
