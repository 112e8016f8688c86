//! Connect, Count and Accumulate.

use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashSet;

use super::{now, sides, Expiring, Sides, Store, VertexCell, VertexData, VertexHandle};
use crate::index::{ArcFilter, Predicator, RelCode};
use crate::lock::LockMode;
use crate::model::*;
use crate::{ArcError, Error, Result};

/// Terminal argument of a connect: one identifier (created VIRTUAL when
/// missing) or an explicit list (every entry must exist, no duplicates).
#[derive(Debug, Clone, PartialEq)]
pub enum Terminals {
    One(String),
    List(Vec<String>),
}

/// A connect request with every option.
#[derive(Debug, Clone)]
pub struct Connect {
    pub initial: String,
    pub arc: ArcSpec,
    pub terminals: Terminals,
    pub condition: Option<ArcCondition>,
    /// Seconds from now until the arc's relationship expires.
    pub lifespan: Option<u32>,
    pub timeout: Option<Duration>,
}

impl Connect {
    pub fn new(initial: &str, arc: impl Into<ArcSpec>, terminal: &str) -> Self {
        Self {
            initial: initial.to_string(),
            arc: arc.into(),
            terminals: Terminals::One(terminal.to_string()),
            condition: None,
            lifespan: None,
            timeout: None,
        }
    }

    pub fn to_many<I, S>(initial: &str, arc: impl Into<ArcSpec>, terminals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terminals: Terminals::List(terminals.into_iter().map(Into::into).collect()),
            ..Self::new(initial, arc, "")
        }
    }

    pub fn with_condition(mut self, condition: ArcCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_lifespan(mut self, seconds: u32) -> Self {
        self.lifespan = Some(seconds);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How the value of an existing arc is updated.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Apply {
    /// Overwrite; `None` keeps the old value (time-modified refreshes to now).
    Set(Option<ArcValue>),
    /// Saturating add.
    Add(f64),
}

/// Write an arc onto both of its sides. Returns whether it is new and the
/// value it now holds.
pub(crate) fn upsert_arc(
    sides: Sides<'_>,
    initial: VertexKey,
    terminal: VertexKey,
    rel: RelCode,
    kind: ModifierKind,
    forward_only: bool,
    apply: Apply,
    now: u32,
) -> Result<(bool, ArcValue)> {
    let existing = sides.out.get(terminal, rel, kind).copied();
    let value = match (existing, apply) {
        (None, Apply::Set(v)) => v.unwrap_or_else(|| kind.default_value(now)),
        (None, Apply::Add(delta)) => kind.saturate(delta),
        (Some(_), Apply::Set(_)) if kind == ModifierKind::TimeCreated => {
            return Err(ArcError::CreationTimeReassigned.into());
        }
        (Some(old), Apply::Set(None)) => {
            if kind == ModifierKind::TimeModified {
                ArcValue::Unsigned(now)
            } else {
                old.value
            }
        }
        (Some(_), Apply::Set(Some(v))) => v,
        (Some(old), Apply::Add(delta)) => kind.saturate(old.value.as_f64() + delta),
    };
    let forward_only = existing.map_or(forward_only, |e| e.forward_only);
    let arc = Predicator { rel, kind, value, forward_only };
    sides.out.insert(terminal, arc);
    if forward_only {
        if existing.is_none() {
            *sides.fwdonly_in += 1;
        }
    } else {
        sides.inarcs.insert(initial, arc);
    }
    Ok((existing.is_none(), value))
}

/// Existing-arc condition resolved for evaluation.
struct Gate {
    filter: ArcFilter,
    direction: Direction,
    negate: bool,
}

impl Gate {
    fn admits(&self, initial: &VertexData, terminal: &VertexData, initial_key: VertexKey, terminal_key: VertexKey) -> bool {
        let found = (self.direction.includes_out()
            && initial.out.arcs_to(terminal_key).iter().any(|p| self.filter.matches(p)))
            || (self.direction.includes_in()
                && terminal.out.arcs_to(initial_key).iter().any(|p| self.filter.matches(p)));
        found != self.negate
    }
}

impl Store {
    pub fn connect(self: &Arc<Self>, request: &Connect) -> Result<u64> {
        let spec = &request.arc;
        let apply = if spec.kind.is_accumulating() {
            let delta = match spec.value {
                Some(v) => spec.kind.coerce(v)?.as_f64(),
                None => 1.0,
            };
            Apply::Add(delta)
        } else {
            if spec.kind == ModifierKind::TimeExpires && spec.value.is_none() {
                return Err(ArcError::InvalidValue {
                    kind: spec.kind,
                    reason: "expiration time required".into(),
                }
                .into());
            }
            Apply::Set(spec.value.map(|v| spec.kind.coerce(v)).transpose()?)
        };
        let (added, _) = self.connect_inner(request, apply)?;
        Ok(added)
    }

    /// Counter / accumulator read-modify-write, creating the arc when missing.
    pub fn modify_counter(
        self: &Arc<Self>,
        initial: &str,
        relationship: &str,
        terminal: &str,
        kind: ModifierKind,
        delta: f64,
        timeout: Option<Duration>,
    ) -> Result<ArcValue> {
        if !delta.is_finite() {
            return Err(ArcError::InvalidValue { kind, reason: format!("delta {delta} is not finite") }.into());
        }
        let request = Connect {
            timeout,
            ..Connect::new(initial, ArcSpec::new(relationship).with_kind(kind), terminal)
        };
        let (_, value) = self.connect_inner(&request, Apply::Add(delta))?;
        value.ok_or_else(|| Error::Vertex(format!("no arc written from '{initial}' to '{terminal}'")))
    }

    fn connect_inner(self: &Arc<Self>, request: &Connect, apply: Apply) -> Result<(u64, Option<ArcValue>)> {
        self.locks.check_writable()?;
        let spec = &request.arc;
        self.validate_identifier(&request.initial)?;
        if spec.relationship.is_empty() || spec.relationship == "*" {
            return Err(Error::Query(format!("invalid relationship '{}'", spec.relationship)));
        }
        let gate = request
            .condition
            .as_ref()
            .map(|c| -> Result<Gate> {
                Ok(Gate { filter: self.resolve_filter(&c.probe)?, direction: c.probe.direction, negate: c.negate })
            })
            .transpose()?;

        let (terminal_ids, explicit) = match &request.terminals {
            Terminals::One(t) => (vec![t.as_str()], false),
            Terminals::List(list) => (list.iter().map(String::as_str).collect::<Vec<_>>(), true),
        };
        if explicit {
            let mut seen = HashSet::with_capacity(terminal_ids.len());
            for t in &terminal_ids {
                if *t == request.initial {
                    return Err(Error::Vertex(format!("terminal list contains the initial '{t}'")));
                }
                if !seen.insert(*t) {
                    return Err(Error::Vertex(format!("duplicate terminal '{t}'")));
                }
                if !self.contains(t) {
                    return Err(Error::Vertex(format!("terminal '{t}' does not exist")));
                }
            }
            if terminal_ids.is_empty() {
                return Ok((0, None));
            }
        }
        for t in &terminal_ids {
            self.validate_identifier(t)?;
        }
        let rel = self.enumerator.encode_relationship(&spec.relationship)?;

        loop {
            let (initial, _) = self.get_or_insert(&request.initial, Manifestation::Real)?;
            let mut fresh = Vec::new();
            let mut terminals = Vec::with_capacity(terminal_ids.len());
            for t in &terminal_ids {
                if *t == request.initial {
                    terminals.push(Arc::clone(&initial));
                } else if explicit {
                    let cell = self
                        .lookup(t)
                        .ok_or_else(|| Error::Vertex(format!("terminal '{t}' does not exist")))?;
                    terminals.push(cell);
                } else {
                    let (cell, created) = self.get_or_insert(t, Manifestation::Virtual)?;
                    if created {
                        fresh.push(Arc::clone(&cell));
                    }
                    terminals.push(cell);
                }
            }

            let mut to_lock = vec![Arc::clone(&initial)];
            to_lock.extend(terminals.iter().filter(|c| !Arc::ptr_eq(c, &initial)).cloned());
            let guards = match self.locks.acquire_many(to_lock, LockMode::Writable, request.timeout) {
                Ok(guards) => guards,
                Err(e) => {
                    for cell in &fresh {
                        self.collect_unlocked(cell);
                    }
                    return Err(e);
                }
            };
            let handles: Vec<VertexHandle> = guards.into_iter().map(|g| self.handle(g)).collect();
            if let Some(gone) = handles.iter().find(|h| h.is_deleted()) {
                if explicit && gone.key() != initial.key {
                    return Err(Error::Vertex(format!("terminal '{}' does not exist", gone.id())));
                }
                continue;
            }
            let result = self.connect_locked(request, rel, apply, gate.as_ref(), &initial, &terminals);
            drop(handles);
            return result;
        }
    }

    /// All endpoints are held writable.
    fn connect_locked(
        &self,
        request: &Connect,
        rel: RelCode,
        apply: Apply,
        gate: Option<&Gate>,
        initial: &Arc<VertexCell>,
        terminals: &[Arc<VertexCell>],
    ) -> Result<(u64, Option<ArcValue>)> {
        let spec = &request.arc;
        let now = now();

        // Validate every terminal before touching any of them.
        let mut admitted = Vec::with_capacity(terminals.len());
        for terminal in terminals {
            let init = initial.data.read();
            let loop_arc = Arc::ptr_eq(terminal, initial);
            let term_guard = if loop_arc { None } else { Some(terminal.data.read()) };
            let term: &VertexData = term_guard.as_deref().unwrap_or(&*init);

            let admit = gate.map_or(true, |g| g.admits(&*init, term, initial.key, terminal.key));
            if admit {
                if spec.forward_only && !term.inarcs.is_empty() {
                    return Err(ArcError::ForwardOnlyNotAllowed { terminal: terminal.id.clone() }.into());
                }
                if !spec.forward_only && term.fwdonly_in > 0 {
                    return Err(ArcError::RegularNotAllowed { terminal: terminal.id.clone() }.into());
                }
                if spec.kind == ModifierKind::TimeCreated && init.out.get(terminal.key, rel, spec.kind).is_some() {
                    return Err(ArcError::CreationTimeReassigned.into());
                }
            }
            admitted.push(admit);
        }

        initial.data.write().promote(now);

        let mut added = 0;
        let mut last = None;
        for (terminal, admit) in terminals.iter().zip(admitted) {
            if !admit {
                continue;
            }
            let mut init = initial.data.write();
            let mut term_guard = if Arc::ptr_eq(terminal, initial) { None } else { Some(terminal.data.write()) };

            let (inserted, value) = upsert_arc(
                sides(&mut *init, term_guard.as_deref_mut()),
                initial.key,
                terminal.key,
                rel,
                spec.kind,
                spec.forward_only,
                apply,
                now,
            )?;
            if inserted {
                added += 1;
                self.arcs.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            last = Some(value);

            let mut expiring = (spec.kind == ModifierKind::TimeExpires).then(|| value.as_u32()).flatten();
            if let Some(lifespan) = request.lifespan {
                let when = now.saturating_add(lifespan);
                let (inserted, _) = upsert_arc(
                    sides(&mut *init, term_guard.as_deref_mut()),
                    initial.key,
                    terminal.key,
                    rel,
                    ModifierKind::TimeExpires,
                    spec.forward_only,
                    Apply::Set(Some(ArcValue::Unsigned(when))),
                    now,
                )?;
                if inserted {
                    self.arcs.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                expiring = Some(when);
            }

            init.modified = now;
            if let Some(t) = term_guard.as_deref_mut() {
                t.modified = now;
            }
            drop(term_guard);
            drop(init);

            if let Some(when) = expiring {
                self.expiration.lock().schedule(
                    Expiring::Arc {
                        initial: initial.id.clone(),
                        relationship: spec.relationship.clone(),
                        terminal: terminal.id.clone(),
                    },
                    when,
                );
            }
        }
        tracing::trace!(initial = %initial.id, relationship = %spec.relationship, added, "connect");
        Ok((added, last))
    }
}
