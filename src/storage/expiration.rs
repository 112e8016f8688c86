//! Time-to-live hand-off.
//!
//! Expiring vertices and arcs sit in a time-ordered queue. An external
//! scheduler calls [`Store::run_expiration`] with the current time; due
//! items are removed through the ordinary Delete / Disconnect paths, so
//! they obey the same lock rules as client calls. Items whose endpoints are
//! busy go back on the queue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::{Connect, Store, VertexHandle};
use crate::lock::LockMode;
use crate::model::*;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expiring {
    Vertex(String),
    /// Every arc of `relationship` from `initial` to `terminal`.
    Arc { initial: String, relationship: String, terminal: String },
}

/// Outcome of one expiration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationReport {
    pub vertices_deleted: u64,
    pub arcs_removed: u64,
    /// Items that could not be acquired and were queued again.
    pub requeued: u64,
    /// Items still queued after the pass, requeued ones included.
    pub pending: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ExpirationQueue {
    due: BTreeMap<(u32, u64), Expiring>,
    slots: HashMap<Expiring, (u32, u64)>,
    seq: u64,
}

impl ExpirationQueue {
    /// Schedule `item`, replacing any earlier schedule for it.
    pub fn schedule(&mut self, item: Expiring, when: u32) {
        if let Some(slot) = self.slots.remove(&item) {
            self.due.remove(&slot);
        }
        self.seq += 1;
        let slot = (when, self.seq);
        self.due.insert(slot, item.clone());
        self.slots.insert(item, slot);
    }

    /// Schedule only if nothing newer was scheduled meanwhile.
    fn requeue(&mut self, item: Expiring, when: u32) {
        if !self.slots.contains_key(&item) {
            self.schedule(item, when);
        }
    }

    /// Remove and return every item due at or before `now`.
    pub fn pop_due(&mut self, now: u32) -> Vec<(u32, Expiring)> {
        let later = match now.checked_add(1) {
            Some(next) => self.due.split_off(&(next, 0)),
            None => BTreeMap::new(),
        };
        let due = std::mem::replace(&mut self.due, later);
        due.into_iter()
            .map(|((when, _), item)| {
                self.slots.remove(&item);
                (when, item)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.due.len()
    }

    pub fn next_due(&self) -> Option<u32> {
        self.due.keys().next().map(|(when, _)| *when)
    }
}

impl Store {
    pub fn mark_expiring(self: &Arc<Self>, id: &str, when: u32, timeout: Option<Duration>) -> Result<()> {
        self.locks.check_writable()?;
        let deadline = self.locks.deadline(timeout);
        let handle = self.acquire_existing(id, LockMode::Writable, deadline)?;
        handle.set_expiration(when)
    }

    /// Set a TimeExpires arc on an existing relationship and schedule it.
    /// Both endpoints stay writable from the existence check to the write.
    pub fn mark_arc_expiring(
        self: &Arc<Self>,
        initial: &str,
        relationship: &str,
        terminal: &str,
        when: u32,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.locks.check_writable()?;
        let missing = || Error::Key(format!("no '{relationship}' arc from '{initial}' to '{terminal}'"));
        let filter = self.resolve_filter(&ArcProbe::new(relationship, Direction::Out))?;
        let (Some(from), Some(to)) = (self.lookup(initial), self.lookup(terminal)) else {
            return Err(missing());
        };
        let mut cells = vec![Arc::clone(&from)];
        if !Arc::ptr_eq(&from, &to) {
            cells.push(Arc::clone(&to));
        }
        let handles: Vec<VertexHandle> = self
            .locks
            .acquire_many(cells, LockMode::Writable, timeout)?
            .into_iter()
            .map(|g| self.handle(g))
            .collect();
        if handles.iter().any(|h| h.is_deleted()) {
            return Err(missing());
        }
        let linked = from.data.read().out.arcs_to(to.key).iter().any(|p| filter.matches(p));
        if !linked {
            return Err(missing());
        }
        // Re-entrant: connect takes both endpoints again as a recursion.
        let spec = ArcSpec::valued(relationship, ModifierKind::TimeExpires, when);
        self.connect(&Connect { timeout, ..Connect::new(initial, spec, terminal) })?;
        drop(handles);
        Ok(())
    }

    pub fn next_expiration(&self) -> Option<u32> {
        self.expiration.lock().next_due()
    }

    pub fn run_expiration(self: &Arc<Self>, now: u32, timeout: Option<Duration>) -> Result<ExpirationReport> {
        self.locks.check_writable()?;
        let due = self.expiration.lock().pop_due(now);
        let mut report = ExpirationReport::default();
        let mut retry = Vec::new();

        for (when, item) in due {
            let outcome = match &item {
                Expiring::Vertex(id) => self.delete_vertex(id, timeout).map(|n| {
                    report.vertices_deleted += n;
                }),
                Expiring::Arc { initial, relationship, terminal } => {
                    let probe = ArcProbe::new(relationship, Direction::Out);
                    self.disconnect(initial, &probe, Some(terminal), timeout).map(|n| {
                        report.arcs_removed += n;
                    })
                }
            };
            match outcome {
                Ok(()) | Err(Error::Key(_)) => {}
                Err(e) if e.is_retry_safe() || e.partial_count().is_some() => {
                    report.arcs_removed += e.partial_count().unwrap_or(0);
                    retry.push((when, item));
                }
                Err(e) => {
                    tracing::warn!(?item, error = %e, "expiration dropped");
                }
            }
        }

        report.requeued = retry.len() as u64;
        {
            let mut queue = self.expiration.lock();
            for (when, item) in retry {
                queue.requeue(item, when);
            }
            report.pending = queue.len() as u64;
        }
        tracing::info!(
            graph = %self.config.name,
            vertices = report.vertices_deleted,
            arcs = report.arcs_removed,
            requeued = report.requeued,
            pending = report.pending,
            "expiration pass"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arc(i: &str) -> Expiring {
        Expiring::Arc { initial: i.into(), relationship: "to".into(), terminal: "T".into() }
    }

    #[test]
    fn test_queue_orders_by_time() {
        let mut q = ExpirationQueue::default();
        q.schedule(arc("b"), 20);
        q.schedule(arc("a"), 10);
        q.schedule(Expiring::Vertex("v".into()), 30);
        assert_eq!(q.next_due(), Some(10));
        let due = q.pop_due(20);
        assert_eq!(due, vec![(10, arc("a")), (20, arc("b"))]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_reschedule_replaces() {
        let mut q = ExpirationQueue::default();
        q.schedule(arc("a"), 10);
        q.schedule(arc("a"), 50);
        assert_eq!(q.len(), 1);
        assert!(q.pop_due(10).is_empty());
        assert_eq!(q.pop_due(u32::MAX).len(), 1);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_requeue_does_not_override_newer() {
        let mut q = ExpirationQueue::default();
        q.schedule(arc("a"), 100);
        q.requeue(arc("a"), 5);
        assert_eq!(q.next_due(), Some(100));
    }
}
