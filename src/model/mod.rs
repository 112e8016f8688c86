//! # Graph Model
//!
//! Plain DTOs that cross every boundary: arc index ↔ storage ↔ traversal ↔ caller.
//!
//! Design rule: no locks, no shared state here. This module is pure data.

pub mod vertex;
pub mod arc;
pub mod modifier;
pub mod probe;
pub mod value;
pub mod property_map;

pub use vertex::{VertexKey, VertexInfo, Manifestation, OpenMode};
pub use arc::{ArcRecord, ArcSpec, Direction};
pub use modifier::{ModifierKind, ArcValue};
pub use probe::{ArcProbe, ArcCondition, ValueComparator};
pub use value::Value;
pub use property_map::{PropertyMap, properties};
