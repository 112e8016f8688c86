//! Disconnect and DeleteVertex.
//!
//! Both walk the arcs of an anchor that is already held writable, grouped by
//! neighbor. Each neighbor is acquired writable in turn and its arcs are
//! removed from both sides before moving on. Neighbors that cannot be
//! acquired are skipped; if any were, the walk ends with
//! [`ArcError::Incomplete`] reporting what was removed and what remains.
//! Nothing is rolled back.
//!
//! A DeleteVertex that ends incomplete has already stripped the vertex and
//! queues it for expiration, so [`Store::run_expiration`] finishes the job.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{now, sides, Expiring, Store, VertexCell, VertexData};
use crate::index::{ArcFilter, Predicator};
use crate::lock::LockMode;
use crate::model::*;
use crate::{ArcError, Error, Result};

/// Remove one arc from both of its sides.
fn detach(initial: &mut VertexData, terminal: Option<&mut VertexData>, initial_key: VertexKey, terminal_key: VertexKey, arc: &Predicator) -> bool {
    let sides = sides(initial, terminal);
    match sides.out.remove(terminal_key, arc.rel, arc.kind) {
        Some(removed) => {
            if removed.forward_only {
                *sides.fwdonly_in = sides.fwdonly_in.saturating_sub(1);
            } else {
                sides.inarcs.remove(initial_key, arc.rel, arc.kind);
            }
            true
        }
        None => false,
    }
}

impl Store {
    pub fn disconnect(
        self: &Arc<Self>,
        anchor: &str,
        probe: &ArcProbe,
        neighbor: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<u64> {
        self.locks.check_writable()?;
        let filter = self.resolve_filter(probe)?;
        let deadline = self.locks.deadline(timeout);
        let handle = self.acquire_existing(anchor, LockMode::Writable, deadline)?;
        let neighbor = match neighbor {
            Some(id) => match self.lookup(id) {
                Some(cell) => Some(cell.key),
                None => return Ok(0),
            },
            None => None,
        };
        let removed = self.sever(&handle.cell, &filter, probe.direction, neighbor, deadline);
        drop(handle);
        removed
    }

    /// Delete a vertex and every arc it can see. A vertex that is still the
    /// terminal of forward-only arcs is reduced to VIRTUAL instead.
    pub fn delete_vertex(self: &Arc<Self>, id: &str, timeout: Option<Duration>) -> Result<u64> {
        self.locks.check_writable()?;
        let deadline = self.locks.deadline(timeout);
        let handle = match self.acquire_existing(id, LockMode::Writable, deadline) {
            Ok(handle) => handle,
            Err(Error::Key(_)) => return Ok(0),
            Err(e) => return Err(e),
        };
        let cell = Arc::clone(&handle.cell);
        {
            let mut data = cell.data.write();
            data.vtype = None;
            data.properties.clear();
            data.vector = None;
            data.modified = now();
        }
        if let Err(e) = self.sever(&cell, &ArcFilter::any(), Direction::Any, None, deadline) {
            if e.partial_count().is_some() {
                let when = now();
                cell.data.write().expires = Some(when);
                self.expiration.lock().schedule(Expiring::Vertex(id.to_string()), when);
                tracing::debug!(vertex = %id, "delete incomplete, queued for expiration");
            }
            return Err(e);
        }

        let mut data = cell.data.write();
        if data.fwdonly_in > 0 {
            data.manifestation = Manifestation::Virtual;
            data.expires = None;
            tracing::debug!(vertex = %id, inarcs = data.fwdonly_in, "vertex reduced to virtual");
            drop(data);
        } else {
            data.deleted = true;
            drop(data);
            self.unlink(&cell);
            tracing::debug!(vertex = %id, "vertex deleted");
        }
        drop(handle);
        Ok(1)
    }

    /// Remove the arcs of `anchor` accepted by `filter`. `anchor` is held
    /// writable by the caller.
    pub(crate) fn sever(
        self: &Arc<Self>,
        anchor: &Arc<VertexCell>,
        filter: &ArcFilter,
        direction: Direction,
        neighbor: Option<VertexKey>,
        deadline: Instant,
    ) -> Result<u64> {
        if filter.matches_nothing() {
            return Ok(0);
        }
        let mut groups: BTreeMap<VertexKey, Vec<(Direction, Predicator)>> = BTreeMap::new();
        {
            let data = anchor.data.read();
            let mut collect = |index: &crate::index::ArcIndex, dir: Direction| {
                for (n, arc) in index.iter() {
                    if neighbor.map_or(true, |k| k == n) && filter.matches(arc) {
                        groups.entry(n).or_default().push((dir, *arc));
                    }
                }
            };
            if direction.includes_out() {
                collect(&data.out, Direction::Out);
            }
            if direction.includes_in() {
                collect(&data.inarcs, Direction::In);
            }
        }

        let mut removed = 0u64;
        let mut remaining = 0u64;
        let mut stalled = None;
        for (key, arcs) in groups {
            if key == anchor.key {
                let mut data = anchor.data.write();
                for (_, arc) in &arcs {
                    removed += detach(&mut *data, None, key, key, arc) as u64;
                }
                continue;
            }
            let Some(cell) = self.lookup_key(key) else {
                continue;
            };
            // Once one neighbor has timed out the deadline is spent, so the
            // rest are only taken if free right now.
            let guard = match self.locks.acquire_until(cell, LockMode::Writable, deadline) {
                Ok(guard) => guard,
                Err(Error::Access(cause)) => {
                    remaining += arcs.len() as u64;
                    stalled.get_or_insert(cause);
                    continue;
                }
                Err(e) => {
                    self.arcs.fetch_sub(removed, Ordering::Relaxed);
                    return Err(e);
                }
            };
            let other = self.handle(guard);
            {
                let mut a = anchor.data.write();
                let mut b = other.cell.data.write();
                let stamp = now();
                for (dir, arc) in &arcs {
                    let detached = match dir {
                        Direction::In => detach(&mut *b, Some(&mut *a), key, anchor.key, arc),
                        _ => detach(&mut *a, Some(&mut *b), anchor.key, key, arc),
                    };
                    removed += detached as u64;
                }
                a.modified = stamp;
                b.modified = stamp;
            }
            // Dropping the neighbor handle collects it if it was left virtual and bare.
            drop(other);
        }
        self.arcs.fetch_sub(removed, Ordering::Relaxed);
        match stalled {
            Some(cause) => {
                tracing::warn!(vertex = %anchor.id, removed, remaining, %cause, "removal incomplete");
                Err(ArcError::Incomplete { removed, remaining, cause }.into())
            }
            None => Ok(removed),
        }
    }
}
