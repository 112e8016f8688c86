//! Arc (directed, typed, valued edge) in the graph.

use serde::{Deserialize, Serialize};

use super::{ArcValue, ModifierKind};

/// Direction of an arc relative to the vertex it is viewed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Arc leaves the anchor.
    Out,
    /// Arc enters the anchor.
    In,
    /// Either direction.
    Any,
}

impl Direction {
    pub fn includes_out(self) -> bool {
        matches!(self, Direction::Out | Direction::Any)
    }

    pub fn includes_in(self) -> bool {
        matches!(self, Direction::In | Direction::Any)
    }

    pub fn reverse(self) -> Direction {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
            Direction::Any => Direction::Any,
        }
    }
}

/// The arc to create in a `connect` call: relationship label, kind, optional
/// value and the forward-only flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcSpec {
    pub relationship: String,
    pub kind: ModifierKind,
    /// `None` lets the kind pick its default (zero, or "now" for time kinds).
    pub value: Option<f64>,
    pub forward_only: bool,
}

impl ArcSpec {
    /// A plain `Static` arc.
    pub fn new(relationship: impl Into<String>) -> Self {
        Self {
            relationship: relationship.into(),
            kind: ModifierKind::Static,
            value: None,
            forward_only: false,
        }
    }

    pub fn valued(relationship: impl Into<String>, kind: ModifierKind, value: impl Into<f64>) -> Self {
        Self {
            relationship: relationship.into(),
            kind,
            value: Some(value.into()),
            forward_only: false,
        }
    }

    pub fn with_kind(mut self, kind: ModifierKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_value(mut self, value: impl Into<f64>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn forward_only(mut self) -> Self {
        self.forward_only = true;
        self
    }
}

impl From<&str> for ArcSpec {
    fn from(relationship: &str) -> Self {
        ArcSpec::new(relationship)
    }
}

/// An arc as seen by callers: both endpoint identifiers resolved to strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcRecord {
    /// The vertex the arc was viewed from.
    pub anchor: String,
    pub relationship: String,
    /// `Out` when `anchor` is the initial, `In` when it is the terminal.
    pub direction: Direction,
    pub kind: ModifierKind,
    pub value: ArcValue,
    pub forward_only: bool,
    /// The vertex at the other end.
    pub neighbor: String,
}

impl ArcRecord {
    /// Initial (source) vertex of the arc regardless of viewing direction.
    pub fn initial(&self) -> &str {
        match self.direction {
            Direction::In => &self.neighbor,
            _ => &self.anchor,
        }
    }

    /// Terminal (target) vertex of the arc regardless of viewing direction.
    pub fn terminal(&self) -> &str {
        match self.direction {
            Direction::In => &self.anchor,
            _ => &self.neighbor,
        }
    }
}
