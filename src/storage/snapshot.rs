//! Snapshot / Restore.
//!
//! A [`GraphSnapshot`] lists every vertex and every stored outbound arc with
//! its exact value. Inbound indexes are derived on restore, so each arc is
//! listed once. Serialization of the snapshot itself is left to
//! [`crate::export`].

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::{Expiring, Store, VertexCell, VertexData};
use crate::index::Predicator;
use crate::lock::LockMode;
use crate::model::*;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexSnapshot {
    pub id: String,
    pub vertex_type: Option<String>,
    pub manifestation: Manifestation,
    pub created: u32,
    pub modified: u32,
    pub expires: Option<u32>,
    #[serde(default)]
    pub properties: PropertyMap,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcSnapshot {
    pub initial: String,
    pub relationship: String,
    pub kind: ModifierKind,
    pub value: ArcValue,
    #[serde(default)]
    pub forward_only: bool,
    pub terminal: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub name: String,
    pub vertices: Vec<VertexSnapshot>,
    pub arcs: Vec<ArcSnapshot>,
}

fn malformed(msg: String) -> Error {
    Error::Serialization(serde::de::Error::custom(msg))
}

impl Store {
    /// Enumerate the graph, holding each vertex readonly while it is read.
    /// Not a transactional cut: concurrent writers may interleave.
    pub fn snapshot(self: &Arc<Self>, timeout: Option<Duration>) -> Result<GraphSnapshot> {
        let deadline = self.locks.deadline(timeout);
        let mut cells = self.cells();
        cells.sort_by(|a, b| a.id.cmp(&b.id));

        let mut snapshot = GraphSnapshot { name: self.config.name.clone(), ..Default::default() };
        for cell in cells {
            let guard = self.locks.acquire_until(cell, LockMode::Readonly, deadline)?;
            let handle = self.handle(guard);
            let data = handle.cell.data.read();
            if data.deleted {
                continue;
            }
            snapshot.vertices.push(VertexSnapshot {
                id: handle.cell.id.clone(),
                vertex_type: data.vtype.and_then(|t| self.enumerator.decode_vertex_type(t)),
                manifestation: data.manifestation,
                created: data.created,
                modified: data.modified,
                expires: data.expires,
                properties: data.properties.clone(),
                vector: data.vector.clone(),
            });
            for (neighbor, arc) in data.out.iter() {
                let Some(terminal) = self.identifier_of(neighbor) else {
                    continue;
                };
                snapshot.arcs.push(ArcSnapshot {
                    initial: handle.cell.id.clone(),
                    relationship: self.relationship_label(arc.rel),
                    kind: arc.kind,
                    value: arc.value,
                    forward_only: arc.forward_only,
                    terminal,
                });
            }
        }
        snapshot.arcs.sort_by(|a, b| {
            (&a.initial, &a.terminal, &a.relationship, a.kind).cmp(&(&b.initial, &b.terminal, &b.relationship, b.kind))
        });
        tracing::debug!(
            graph = %self.config.name,
            vertices = snapshot.vertices.len(),
            arcs = snapshot.arcs.len(),
            "snapshot taken"
        );
        Ok(snapshot)
    }

    /// Repopulate an empty graph. Manifestation, timestamps and arc values
    /// are taken from the snapshot as-is, but arcs must obey the same kind
    /// and forward-only rules as a live connect.
    pub fn restore(self: &Arc<Self>, snapshot: &GraphSnapshot) -> Result<()> {
        self.locks.check_writable()?;

        let mut staged: HashMap<VertexKey, (String, VertexData)> = HashMap::with_capacity(snapshot.vertices.len());
        for v in &snapshot.vertices {
            self.validate_identifier(&v.id)?;
            let key = VertexKey::of(&v.id);
            if let Some((other, _)) = staged.get(&key) {
                return Err(Error::Vertex(format!("duplicate vertex '{}' in snapshot (key of '{other}')", v.id)));
            }
            let mut data = VertexData::new(v.manifestation, v.created);
            data.vtype = v
                .vertex_type
                .as_deref()
                .map(|t| self.enumerator.encode_vertex_type(t))
                .transpose()?;
            data.modified = v.modified;
            data.expires = v.expires;
            data.properties = v.properties.clone();
            data.vector = v.vector.clone();
            staged.insert(key, (v.id.clone(), data));
        }

        let mut count = 0u64;
        let mut expiring = Vec::new();
        for a in &snapshot.arcs {
            let ik = VertexKey::of(&a.initial);
            let tk = VertexKey::of(&a.terminal);
            for (id, key) in [(&a.initial, ik), (&a.terminal, tk)] {
                if staged.get(&key).map_or(true, |(have, _)| have != id) {
                    return Err(Error::Vertex(format!("arc endpoint '{id}' missing from snapshot")));
                }
            }
            if !a.kind.admits(&a.value) {
                return Err(malformed(format!(
                    "arc '{}' -> '{}' holds {:?}, not a {} value",
                    a.initial, a.terminal, a.value, a.kind
                )));
            }
            if let Some((_, terminal)) = staged.get(&tk) {
                let clash = if a.forward_only { !terminal.inarcs.is_empty() } else { terminal.fwdonly_in > 0 };
                if clash {
                    return Err(malformed(format!(
                        "'{}' mixes forward-only and regular inarcs",
                        a.terminal
                    )));
                }
            }
            let rel = self.enumerator.encode_relationship(&a.relationship)?;
            let arc = Predicator { rel, kind: a.kind, value: a.value, forward_only: a.forward_only };
            let Some((_, initial)) = staged.get_mut(&ik) else {
                continue;
            };
            if initial.out.insert(tk, arc).is_some() {
                continue;
            }
            count += 1;
            if let Some((_, terminal)) = staged.get_mut(&tk) {
                if arc.forward_only {
                    terminal.fwdonly_in += 1;
                } else {
                    terminal.inarcs.insert(ik, arc);
                }
            }
            if a.kind == ModifierKind::TimeExpires {
                if let Some(when) = a.value.as_u32() {
                    let item = Expiring::Arc {
                        initial: a.initial.clone(),
                        relationship: a.relationship.clone(),
                        terminal: a.terminal.clone(),
                    };
                    expiring.push((item, when));
                }
            }
        }
        for (_, (id, data)) in &staged {
            if let Some(when) = data.expires {
                expiring.push((Expiring::Vertex(id.clone()), when));
            }
        }

        {
            let mut table = self.vertices.write();
            if !table.is_empty() {
                return Err(Error::Vertex(format!("graph '{}' is not empty", self.config.name)));
            }
            for (key, (id, data)) in staged {
                let cell = VertexCell { id, key, lock: crate::lock::VertexLock::new(), data: parking_lot::RwLock::new(data) };
                table.insert(key, Arc::new(cell));
            }
            self.arcs.store(count, Ordering::Relaxed);
        }
        {
            let mut queue = self.expiration.lock();
            for (item, when) in expiring {
                queue.schedule(item, when);
            }
        }
        tracing::info!(
            graph = %self.config.name,
            vertices = snapshot.vertices.len(),
            arcs = count,
            "graph restored"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::enumerator::MemoryEnumerator;
    use crate::storage::Connect;
    use pretty_assertions::assert_eq;

    fn store() -> Arc<Store> {
        Store::new(GraphConfig::default(), Arc::new(MemoryEnumerator::new()))
    }

    #[test]
    fn test_snapshot_restore_preserves_graph() {
        let s = store();
        s.create_vertex("A", Some("person")).unwrap();
        s.connect(&Connect::new("A", ArcSpec::valued("w", ModifierKind::Float, 1.5), "B")).unwrap();
        s.create_vertex("F", None).unwrap();
        s.connect(&Connect::new("A", ArcSpec::new("fw").forward_only(), "F")).unwrap();

        let snap = s.snapshot(None).unwrap();
        assert_eq!(snap.vertices.len(), 3);
        assert_eq!(snap.arcs.len(), 2);

        let r = store();
        r.restore(&snap).unwrap();
        assert_eq!(r.order(), 3);
        assert_eq!(r.size(), 2);
        let b = r.open_vertex("B", OpenMode::Readonly, None).unwrap();
        assert!(b.is_virtual());
        assert_eq!(b.indegree(), 1);
        drop(b);
        let f = r.open_vertex("F", OpenMode::Readonly, None).unwrap();
        assert_eq!(f.indegree(), 1);
        drop(f);
        assert_eq!(r.snapshot(None).unwrap(), snap);
    }

    #[test]
    fn test_restore_requires_empty_graph() {
        let s = store();
        s.create_vertex("A", None).unwrap();
        let snap = s.snapshot(None).unwrap();
        assert!(matches!(s.restore(&snap), Err(Error::Vertex(_))));
    }

    #[test]
    fn test_restore_rejects_dangling_arc() {
        let snap = GraphSnapshot {
            name: "g".into(),
            vertices: vec![],
            arcs: vec![ArcSnapshot {
                initial: "A".into(),
                relationship: "to".into(),
                kind: ModifierKind::Static,
                value: ArcValue::None,
                forward_only: false,
                terminal: "B".into(),
            }],
        };
        assert!(matches!(store().restore(&snap), Err(Error::Vertex(_))));
    }

    fn tampered(arcs: Vec<ArcSnapshot>) -> GraphSnapshot {
        let s = store();
        for id in ["A", "B", "C"] {
            s.create_vertex(id, None).unwrap();
        }
        GraphSnapshot { arcs, ..s.snapshot(None).unwrap() }
    }

    fn arc(initial: &str, kind: ModifierKind, value: ArcValue, forward_only: bool) -> ArcSnapshot {
        ArcSnapshot {
            initial: initial.into(),
            relationship: "to".into(),
            kind,
            value,
            forward_only,
            terminal: "C".into(),
        }
    }

    #[test]
    fn test_restore_rejects_value_of_wrong_kind() {
        let snap = tampered(vec![arc("A", ModifierKind::Counter, ArcValue::Real(1.5), false)]);
        let r = store();
        assert!(matches!(r.restore(&snap), Err(Error::Serialization(_))));
        assert_eq!(r.order(), 0);
    }

    #[test]
    fn test_restore_rejects_mixed_forward_only_inarcs() {
        let snap = tampered(vec![
            arc("A", ModifierKind::Static, ArcValue::None, true),
            arc("B", ModifierKind::Static, ArcValue::None, false),
        ]);
        assert!(matches!(store().restore(&snap), Err(Error::Serialization(_))));
    }
}
