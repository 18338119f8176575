mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod resolver;
mod snapshot;

pub use availability::{free_windows_in, merge_overlapping, subtract_intervals};
pub use error::EngineError;
pub use snapshot::Snapshot;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;
use crate::notify::ChangeHub;

pub type SharedSchedule = Arc<RwLock<ResourceSchedule>>;

/// In-memory allocation engine: catalog, topology, and the assignment
/// ledger. Mutation is serialized per resource through `schedules`; reads
/// either take short read locks or copy a [`Snapshot`].
pub struct Engine {
    pub(crate) sites: DashMap<Ulid, Site>,
    pub(crate) rooms: DashMap<Ulid, Room>,
    pub(crate) events: DashMap<Ulid, Event>,
    pub(crate) resources: DashMap<Ulid, Resource>,
    /// Per-resource schedules, the unit of write locking.
    pub(crate) schedules: DashMap<Ulid, SharedSchedule>,
    /// Reverse lookup: assignment id → resource id.
    pub(crate) assignment_to_resource: DashMap<Ulid, Ulid>,
    /// Containment indexes for O(1) dependent lookups.
    pub(crate) site_rooms: DashMap<Ulid, Vec<Ulid>>,
    pub(crate) room_events: DashMap<Ulid, Vec<Ulid>>,
    pub(crate) event_assignments: DashMap<Ulid, Vec<Ulid>>,
    /// Conference-level name/value pairs.
    pub(crate) meta: DashMap<String, String>,
    pub notify: Arc<ChangeHub>,
    /// Bumped once per committed mutation; tags snapshots.
    generation: AtomicU64,
}

impl Engine {
    pub fn new(notify: Arc<ChangeHub>) -> Self {
        Self {
            sites: DashMap::new(),
            rooms: DashMap::new(),
            events: DashMap::new(),
            resources: DashMap::new(),
            schedules: DashMap::new(),
            assignment_to_resource: DashMap::new(),
            site_rooms: DashMap::new(),
            room_events: DashMap::new(),
            event_assignments: DashMap::new(),
            meta: DashMap::new(),
            notify,
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Bump generation + publish in one call. Runs after every committed
    /// mutation; readers key snapshot reuse off the generation.
    pub(crate) fn commit(&self, resource_id: Option<Ulid>, change: Change) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        metrics::counter!(
            crate::observability::MUTATIONS_TOTAL,
            "op" => crate::observability::change_label(&change)
        )
        .increment(1);
        self.notify.send(resource_id, &change);
    }

    pub fn get_schedule(&self, id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(id).map(|e| e.value().clone())
    }

    pub fn resource_for_assignment(&self, assignment_id: &Ulid) -> Option<Ulid> {
        self.assignment_to_resource
            .get(assignment_id)
            .map(|e| *e.value())
    }

    /// Lookup assignment → resource, get schedule, acquire write lock.
    pub(crate) async fn resolve_assignment_write(
        &self,
        assignment_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceSchedule>), EngineError> {
        let resource_id = self
            .resource_for_assignment(assignment_id)
            .ok_or(EngineError::NotFound(*assignment_id))?;
        let sched = self
            .get_schedule(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = sched.write_owned().await;
        Ok((resource_id, guard))
    }

    /// Acquire write locks on several schedules in sorted id order to
    /// prevent deadlocks. Sorts and dedups `resource_ids` in place; the
    /// returned guards are parallel to the deduped list.
    pub(crate) async fn lock_schedules_sorted(
        &self,
        resource_ids: &mut Vec<Ulid>,
    ) -> Result<Vec<tokio::sync::OwnedRwLockWriteGuard<ResourceSchedule>>, EngineError> {
        resource_ids.sort();
        resource_ids.dedup();
        let mut guards = Vec::with_capacity(resource_ids.len());
        for rid in resource_ids.iter() {
            let sched = self.get_schedule(rid).ok_or(EngineError::NotFound(*rid))?;
            guards.push(sched.write_owned().await);
        }
        // A resource deleted while we queued leaves a guard on an orphaned
        // schedule; deletes unlink under their own write lock, so checking
        // the map with every lock held settles it.
        for rid in resource_ids.iter() {
            if !self.schedules.contains_key(rid) {
                return Err(EngineError::NotFound(*rid));
            }
        }
        Ok(guards)
    }
}
