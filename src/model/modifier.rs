//! Modifier kinds: how an arc's value is typed and interpreted.
//!
//! Every arc carries exactly one [`ModifierKind`]. The kind fixes the storage
//! domain of the value:
//!
//! | Kind | Value | Domain |
//! |------|-------|--------|
//! | `Static` | none | - |
//! | `Similarity` | f32 | -1.0 ..= 1.0 |
//! | `Distance` | f32 | 0.0 ..= f32::MAX |
//! | `Hash` | u32 | full range |
//! | `Integer` | i32 | full range |
//! | `Unsigned` | u32 | full range |
//! | `Float` | f32 | finite |
//! | `Counter` | u32 | 0 ..= u32::MAX, saturating |
//! | `Accumulator` | f32 | -f32::MAX ..= f32::MAX, saturating |
//! | `TimeCreated` | u32 | seconds since epoch, write-once |
//! | `TimeModified` | u32 | seconds since epoch |
//! | `TimeExpires` | u32 | seconds since epoch |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ArcError;

/// Closed enumeration of arc modifier kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModifierKind {
    Static,
    Similarity,
    Distance,
    Hash,
    Integer,
    Unsigned,
    Float,
    Counter,
    Accumulator,
    TimeCreated,
    TimeModified,
    TimeExpires,
}

impl ModifierKind {
    pub const ALL: [ModifierKind; 12] = [
        ModifierKind::Static,
        ModifierKind::Similarity,
        ModifierKind::Distance,
        ModifierKind::Hash,
        ModifierKind::Integer,
        ModifierKind::Unsigned,
        ModifierKind::Float,
        ModifierKind::Counter,
        ModifierKind::Accumulator,
        ModifierKind::TimeCreated,
        ModifierKind::TimeModified,
        ModifierKind::TimeExpires,
    ];

    /// Short mnemonic used in diagnostics (`M_INT`, `M_CNT`, ...).
    pub fn name(self) -> &'static str {
        match self {
            ModifierKind::Static => "M_STAT",
            ModifierKind::Similarity => "M_SIM",
            ModifierKind::Distance => "M_DIST",
            ModifierKind::Hash => "M_LSH",
            ModifierKind::Integer => "M_INT",
            ModifierKind::Unsigned => "M_UINT",
            ModifierKind::Float => "M_FLT",
            ModifierKind::Counter => "M_CNT",
            ModifierKind::Accumulator => "M_ACC",
            ModifierKind::TimeCreated => "M_TMC",
            ModifierKind::TimeModified => "M_TMM",
            ModifierKind::TimeExpires => "M_TMX",
        }
    }

    /// Counter and accumulator arcs add on reconnect instead of overwriting.
    pub fn is_accumulating(self) -> bool {
        matches!(self, ModifierKind::Counter | ModifierKind::Accumulator)
    }

    pub fn is_time(self) -> bool {
        matches!(
            self,
            ModifierKind::TimeCreated | ModifierKind::TimeModified | ModifierKind::TimeExpires
        )
    }

    /// Inclusive numeric bounds of the kind's value domain.
    pub fn bounds(self) -> (f64, f64) {
        match self {
            ModifierKind::Static => (0.0, 0.0),
            ModifierKind::Similarity => (-1.0, 1.0),
            ModifierKind::Distance => (0.0, f32::MAX as f64),
            ModifierKind::Integer => (i32::MIN as f64, i32::MAX as f64),
            ModifierKind::Hash
            | ModifierKind::Unsigned
            | ModifierKind::Counter
            | ModifierKind::TimeCreated
            | ModifierKind::TimeModified
            | ModifierKind::TimeExpires => (0.0, u32::MAX as f64),
            ModifierKind::Float | ModifierKind::Accumulator => (-(f32::MAX as f64), f32::MAX as f64),
        }
    }

    /// Convert a caller-supplied number into this kind's storage form.
    ///
    /// Out-of-domain input is rejected; saturation only applies to
    /// [`ModifierKind::saturate`] (counter/accumulator arithmetic).
    pub fn coerce(self, raw: f64) -> Result<ArcValue, ArcError> {
        if !raw.is_finite() {
            return Err(ArcError::InvalidValue {
                kind: self,
                reason: format!("{raw} is not a finite number"),
            });
        }
        let (lo, hi) = self.bounds();
        if self != ModifierKind::Static && (raw < lo || raw > hi) {
            return Err(ArcError::InvalidValue {
                kind: self,
                reason: format!("{raw} outside {lo}..={hi}"),
            });
        }
        Ok(self.store(raw))
    }

    /// Clamp `raw` into the domain and convert. Used for counter and
    /// accumulator arithmetic.
    pub fn saturate(self, raw: f64) -> ArcValue {
        let (lo, hi) = self.bounds();
        let clamped = if raw.is_nan() { lo } else { raw.clamp(lo, hi) };
        self.store(clamped)
    }

    /// Whether `value` has this kind's storage form and lies in its domain.
    pub fn admits(self, value: &ArcValue) -> bool {
        if std::mem::discriminant(value) != std::mem::discriminant(&self.store(0.0)) {
            return false;
        }
        let (lo, hi) = self.bounds();
        let raw = value.as_f64();
        self == ModifierKind::Static || (raw.is_finite() && raw >= lo && raw <= hi)
    }

    /// The value a fresh arc of this kind gets when the caller gives none.
    pub fn default_value(self, now: u32) -> ArcValue {
        match self {
            ModifierKind::TimeCreated | ModifierKind::TimeModified | ModifierKind::TimeExpires => {
                ArcValue::Unsigned(now)
            }
            other => other.store(0.0),
        }
    }

    fn store(self, raw: f64) -> ArcValue {
        match self {
            ModifierKind::Static => ArcValue::None,
            ModifierKind::Integer => ArcValue::Integer(raw as i32),
            ModifierKind::Hash
            | ModifierKind::Unsigned
            | ModifierKind::Counter
            | ModifierKind::TimeCreated
            | ModifierKind::TimeModified
            | ModifierKind::TimeExpires => ArcValue::Unsigned(raw as u32),
            ModifierKind::Similarity
            | ModifierKind::Distance
            | ModifierKind::Float
            | ModifierKind::Accumulator => ArcValue::Real(raw as f32),
        }
    }
}

impl fmt::Display for ModifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stored arc value. The variant is fixed by the arc's [`ModifierKind`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ArcValue {
    None,
    Integer(i32),
    Unsigned(u32),
    Real(f32),
}

impl ArcValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            ArcValue::None => 0.0,
            ArcValue::Integer(i) => i as f64,
            ArcValue::Unsigned(u) => u as f64,
            ArcValue::Real(r) => r as f64,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            ArcValue::Unsigned(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ArcValue::Integer(i) => Some(i as i64),
            ArcValue::Unsigned(u) => Some(u as i64),
            _ => None,
        }
    }
}

impl fmt::Display for ArcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArcValue::None => write!(f, "-"),
            ArcValue::Integer(i) => write!(f, "{i}"),
            ArcValue::Unsigned(u) => write!(f, "{u}"),
            ArcValue::Real(r) => write!(f, "{r}"),
        }
    }
}
