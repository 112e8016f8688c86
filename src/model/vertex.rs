//! Vertex identity and the public vertex DTO.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_128;

use super::PropertyMap;

/// Content-derived 128-bit internal identifier of a vertex.
///
/// Derived from the external identifier string, so the same identifier maps
/// to the same key across restarts. The ordering of keys is the canonical
/// lock acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexKey(pub u128);

impl VertexKey {
    pub fn of(identifier: &str) -> Self {
        VertexKey(xxh3_128(identifier.as_bytes()))
    }
}

impl std::fmt::Display for VertexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// REAL vertices persist until deleted; VIRTUAL ones exist only while they
/// have arcs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Manifestation {
    Real,
    Virtual,
}

/// How a caller wants to open a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Shared access. The vertex must exist.
    Readonly,
    /// Exclusive access to an existing vertex; promotes VIRTUAL to REAL.
    Append,
    /// Exclusive access; creates a REAL vertex when missing.
    Write,
}

/// Point-in-time copy of a vertex's attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexInfo {
    pub id: String,
    pub key: VertexKey,
    pub vertex_type: Option<String>,
    pub manifestation: Manifestation,
    pub indegree: u64,
    pub outdegree: u64,
    /// Seconds since epoch.
    pub created: u32,
    pub modified: u32,
    /// `None` when the vertex never expires.
    pub expires: Option<u32>,
    pub properties: PropertyMap,
    pub vector: Option<Vec<f32>>,
}

impl VertexInfo {
    pub fn degree(&self) -> u64 {
        self.indegree + self.outdegree
    }

    pub fn is_virtual(&self) -> bool {
        self.manifestation == Manifestation::Virtual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_content_derived() {
        assert_eq!(VertexKey::of("A"), VertexKey::of("A"));
        assert_ne!(VertexKey::of("A"), VertexKey::of("B"));
        assert_eq!(VertexKey::of("A").to_string().len(), 32);
    }
}
