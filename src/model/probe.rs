//! Arc probes: the (relationship, direction, modifier, value) filter
//! vocabulary shared by Disconnect, ArcValue, Adjacent, Degree, Connect
//! conditions and every traversal level.

use serde::{Deserialize, Serialize};

use super::{Direction, ModifierKind};

/// Comparison applied to an arc's numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ValueComparator {
    #[default]
    Any,
    Eq(f64),
    Neq(f64),
    Lt(f64),
    Lte(f64),
    Gt(f64),
    Gte(f64),
    /// Inclusive range.
    Range(f64, f64),
}

impl ValueComparator {
    pub fn matches(&self, value: f64) -> bool {
        match *self {
            ValueComparator::Any => true,
            ValueComparator::Eq(x) => value == x,
            ValueComparator::Neq(x) => value != x,
            ValueComparator::Lt(x) => value < x,
            ValueComparator::Lte(x) => value <= x,
            ValueComparator::Gt(x) => value > x,
            ValueComparator::Gte(x) => value >= x,
            ValueComparator::Range(lo, hi) => value >= lo && value <= hi,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, ValueComparator::Any)
    }

    /// Comparison operands must be real numbers and ranges must be ordered.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            ValueComparator::Any => Ok(()),
            ValueComparator::Range(lo, hi) => {
                if lo.is_nan() || hi.is_nan() {
                    Err("range bound is NaN".into())
                } else if lo > hi {
                    Err(format!("empty range {lo}..={hi}"))
                } else {
                    Ok(())
                }
            }
            ValueComparator::Eq(x)
            | ValueComparator::Neq(x)
            | ValueComparator::Lt(x)
            | ValueComparator::Lte(x)
            | ValueComparator::Gt(x)
            | ValueComparator::Gte(x) => {
                if x.is_nan() {
                    Err("comparison operand is NaN".into())
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Selects arcs around an anchor vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcProbe {
    /// `None` is the wildcard relationship.
    pub relationship: Option<String>,
    pub direction: Direction,
    /// `None` matches every modifier kind.
    pub modifier: Option<ModifierKind>,
    pub value: ValueComparator,
}

impl Default for ArcProbe {
    fn default() -> Self {
        Self::any()
    }
}

impl ArcProbe {
    /// Wildcard relationship, both directions, any kind, any value.
    pub fn any() -> Self {
        Self {
            relationship: None,
            direction: Direction::Any,
            modifier: None,
            value: ValueComparator::Any,
        }
    }

    pub fn out() -> Self {
        Self::any().with_direction(Direction::Out)
    }

    pub fn inbound() -> Self {
        Self::any().with_direction(Direction::In)
    }

    /// Probe for `relationship` in direction `direction`. The label `"*"`
    /// is the wildcard.
    pub fn new(relationship: &str, direction: Direction) -> Self {
        Self::any().with_relationship(relationship).with_direction(direction)
    }

    pub fn with_relationship(mut self, relationship: &str) -> Self {
        self.relationship = if relationship == "*" { None } else { Some(relationship.to_string()) };
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_modifier(mut self, modifier: ModifierKind) -> Self {
        self.modifier = Some(modifier);
        self
    }

    pub fn with_value(mut self, value: ValueComparator) -> Self {
        self.value = value;
        self
    }
}

/// Existing-arc condition gating a Connect: the connect proceeds only when
/// an arc matching `probe` exists between the initial and the terminal
/// (or does not exist, when `negate` is set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcCondition {
    pub probe: ArcProbe,
    pub negate: bool,
}

impl ArcCondition {
    pub fn exists(probe: ArcProbe) -> Self {
        Self { probe, negate: false }
    }

    pub fn absent(probe: ArcProbe) -> Self {
        Self { probe, negate: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparators() {
        assert!(ValueComparator::Any.matches(-1.0));
        assert!(ValueComparator::Gt(100.0).matches(123.0));
        assert!(!ValueComparator::Lt(100.0).matches(123.0));
        assert!(ValueComparator::Range(100.0, 200.0).matches(123.0));
        assert!(!ValueComparator::Range(100.0, 200.0).matches(201.0));
        assert!(ValueComparator::Neq(5.0).matches(4.0));
    }

    #[test]
    fn test_validate_rejects_bad_operands() {
        assert!(ValueComparator::Range(2.0, 1.0).validate().is_err());
        assert!(ValueComparator::Eq(f64::NAN).validate().is_err());
        assert!(ValueComparator::Range(1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn test_star_is_wildcard() {
        assert_eq!(ArcProbe::new("*", Direction::Out).relationship, None);
        assert_eq!(ArcProbe::new("to", Direction::Out).relationship.as_deref(), Some("to"));
    }
}
