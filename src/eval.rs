//! Filter / rank evaluator seam.
//!
//! Queries never interpret an expression language themselves. Every filter,
//! post-filter and rank is an [`Expression`]: an opaque callable that sees
//! the current [`Candidate`] and may read or write the query's
//! [`Registers`]. A filter passes when it evaluates to a non-zero number.
//!
//! | Built-in | Evaluates to |
//! |----------|--------------|
//! | [`arc_value`] | numeric value of the candidate arc |
//! | [`property`] | numeric vertex property (error when absent) |
//! | [`degree`] | neighbor degree in one direction |

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::model::{ArcRecord, Direction, Value, VertexInfo};
use crate::{Error, Result};

/// What an expression is evaluated against: the arc being traversed and a
/// point-in-time copy of the vertex at its far end.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub arc: &'a ArcRecord,
    pub vertex: &'a VertexInfo,
    /// 1 for arcs of the anchor, 2 for arcs of its neighbors, ...
    pub depth: usize,
}

impl<'a> Candidate<'a> {
    pub fn value(&self) -> f64 {
        self.arc.value.as_f64()
    }

    pub fn property(&self, key: &str) -> Option<&'a Value> {
        self.vertex.properties.get(key)
    }
}

/// Named numeric registers shared by every expression of one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registers {
    values: HashMap<String, f64>,
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    /// Add `by` to a register (missing registers start at 0) and return the
    /// new value.
    pub fn incr(&mut self, name: &str, by: f64) -> f64 {
        let slot = self.values.entry(name.to_string()).or_insert(0.0);
        *slot += by;
        *slot
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub trait Expression: Send + Sync {
    fn evaluate(&self, candidate: &Candidate<'_>, registers: &mut Registers) -> Result<f64>;

    /// Short label used in logs and error messages.
    fn describe(&self) -> String {
        "<expression>".to_string()
    }
}

impl fmt::Debug for dyn Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expression({})", self.describe())
    }
}

/// Non-zero and not NaN.
pub fn truthy(value: f64) -> bool {
    value != 0.0 && !value.is_nan()
}

/// Adapts a closure into an [`Expression`].
pub struct FnExpression<F> {
    name: String,
    f: F,
}

impl<F> FnExpression<F>
where
    F: Fn(&Candidate<'_>, &mut Registers) -> Result<f64> + Send + Sync,
{
    pub fn new(name: &str, f: F) -> Self {
        Self { name: name.to_string(), f }
    }

    pub fn shared(name: &str, f: F) -> Arc<dyn Expression>
    where
        F: 'static,
    {
        Arc::new(Self::new(name, f))
    }
}

impl<F> Expression for FnExpression<F>
where
    F: Fn(&Candidate<'_>, &mut Registers) -> Result<f64> + Send + Sync,
{
    fn evaluate(&self, candidate: &Candidate<'_>, registers: &mut Registers) -> Result<f64> {
        (self.f)(candidate, registers)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

// ============================================================================
// Built-ins
// ============================================================================

struct ArcValueExpr;

impl Expression for ArcValueExpr {
    fn evaluate(&self, candidate: &Candidate<'_>, _: &mut Registers) -> Result<f64> {
        Ok(candidate.value())
    }

    fn describe(&self) -> String {
        "arc.value".to_string()
    }
}

struct PropertyExpr {
    key: String,
}

impl Expression for PropertyExpr {
    fn evaluate(&self, candidate: &Candidate<'_>, _: &mut Registers) -> Result<f64> {
        match candidate.property(&self.key) {
            Some(Value::Bool(b)) => Ok(*b as u8 as f64),
            Some(v) => v.as_float().ok_or_else(|| {
                Error::Query(format!(
                    "property '{}' of '{}' is {}, not numeric",
                    self.key,
                    candidate.vertex.id,
                    v.type_name()
                ))
            }),
            None => Err(Error::Query(format!(
                "vertex '{}' has no property '{}'",
                candidate.vertex.id, self.key
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("vertex['{}']", self.key)
    }
}

struct DegreeExpr(Direction);

impl Expression for DegreeExpr {
    fn evaluate(&self, candidate: &Candidate<'_>, _: &mut Registers) -> Result<f64> {
        let v = candidate.vertex;
        let n = match self.0 {
            Direction::Out => v.outdegree,
            Direction::In => v.indegree,
            Direction::Any => v.degree(),
        };
        Ok(n as f64)
    }

    fn describe(&self) -> String {
        format!("vertex.degree({:?})", self.0)
    }
}

pub fn arc_value() -> Arc<dyn Expression> {
    Arc::new(ArcValueExpr)
}

pub fn property(key: &str) -> Arc<dyn Expression> {
    Arc::new(PropertyExpr { key: key.to_string() })
}

pub fn degree(direction: Direction) -> Arc<dyn Expression> {
    Arc::new(DegreeExpr(direction))
}
