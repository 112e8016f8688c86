//! String ↔ code enumeration for relationship and vertex-type labels.
//!
//! Arc structures store small integer codes instead of label strings. The
//! tables are an injected service so several graphs can share one.

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::index::RelCode;
use crate::{Error, Result};

/// Enumerated vertex type label.
pub type TypeCode = u16;

pub trait Enumerator: Send + Sync {
    /// Code for `label`, assigning a new one if needed.
    fn encode_relationship(&self, label: &str) -> Result<RelCode>;
    /// Code for `label` if it has been assigned. Never assigns.
    fn lookup_relationship(&self, label: &str) -> Option<RelCode>;
    fn decode_relationship(&self, code: RelCode) -> Option<String>;

    fn encode_vertex_type(&self, label: &str) -> Result<TypeCode>;
    fn lookup_vertex_type(&self, label: &str) -> Option<TypeCode>;
    fn decode_vertex_type(&self, code: TypeCode) -> Option<String>;
}

#[derive(Debug, Default)]
struct Table {
    codes: HashMap<String, u16>,
    labels: Vec<String>,
}

impl Table {
    fn encode(&mut self, label: &str, capacity: usize) -> Option<u16> {
        if let Some(code) = self.codes.get(label) {
            return Some(*code);
        }
        if self.labels.len() >= capacity || self.labels.len() > u16::MAX as usize {
            return None;
        }
        let code = self.labels.len() as u16;
        self.labels.push(label.to_string());
        self.codes.insert(label.to_string(), code);
        Some(code)
    }
}

/// In-process enumeration tables.
#[derive(Debug)]
pub struct MemoryEnumerator {
    relationships: RwLock<Table>,
    vertex_types: RwLock<Table>,
    max_relationships: usize,
    max_vertex_types: usize,
}

impl Default for MemoryEnumerator {
    fn default() -> Self {
        Self::with_capacity(u16::MAX as usize, u16::MAX as usize)
    }
}

impl MemoryEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_relationships: usize, max_vertex_types: usize) -> Self {
        Self {
            relationships: RwLock::new(Table::default()),
            vertex_types: RwLock::new(Table::default()),
            max_relationships,
            max_vertex_types,
        }
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.read().labels.len()
    }

    pub fn vertex_type_count(&self) -> usize {
        self.vertex_types.read().labels.len()
    }
}

impl Enumerator for MemoryEnumerator {
    fn encode_relationship(&self, label: &str) -> Result<RelCode> {
        if let Some(code) = self.lookup_relationship(label) {
            return Ok(code);
        }
        self.relationships
            .write()
            .encode(label, self.max_relationships)
            .ok_or_else(|| Error::Query(format!("relationship capacity exhausted, cannot enumerate '{label}'")))
    }

    fn lookup_relationship(&self, label: &str) -> Option<RelCode> {
        self.relationships.read().codes.get(label).copied()
    }

    fn decode_relationship(&self, code: RelCode) -> Option<String> {
        self.relationships.read().labels.get(code as usize).cloned()
    }

    fn encode_vertex_type(&self, label: &str) -> Result<TypeCode> {
        if let Some(code) = self.lookup_vertex_type(label) {
            return Ok(code);
        }
        self.vertex_types
            .write()
            .encode(label, self.max_vertex_types)
            .ok_or_else(|| Error::Vertex(format!("vertex type capacity exhausted, cannot enumerate '{label}'")))
    }

    fn lookup_vertex_type(&self, label: &str) -> Option<TypeCode> {
        self.vertex_types.read().codes.get(label).copied()
    }

    fn decode_vertex_type(&self, code: TypeCode) -> Option<String> {
        self.vertex_types.read().labels.get(code as usize).cloned()
    }
}
