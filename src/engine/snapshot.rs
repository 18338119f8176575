use ulid::Ulid;

use crate::limits::MAX_SNAPSHOT_RETRIES;
use crate::model::*;
use crate::observability::SNAPSHOT_BUILD_SECONDS;

use super::conflict::now_ms;
use super::{Engine, SharedSchedule};

/// Full point-in-time copy of engine state, tagged with the generation it
/// was taken at. Reports run against a snapshot so concurrent mutations
/// never skew a half-read result. All vectors are sorted by id (meta by
/// key) so lookups can binary search.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generation: u64,
    pub taken_at: Ms,
    pub sites: Vec<Site>,
    pub rooms: Vec<Room>,
    pub events: Vec<Event>,
    pub resources: Vec<Resource>,
    pub assignments: Vec<Assignment>,
    pub meta: Vec<(String, String)>,
}

impl Snapshot {
    pub fn site(&self, id: &Ulid) -> Option<&Site> {
        self.sites
            .binary_search_by_key(id, |s| s.id)
            .ok()
            .map(|i| &self.sites[i])
    }

    pub fn room(&self, id: &Ulid) -> Option<&Room> {
        self.rooms
            .binary_search_by_key(id, |r| r.id)
            .ok()
            .map(|i| &self.rooms[i])
    }

    pub fn event(&self, id: &Ulid) -> Option<&Event> {
        self.events
            .binary_search_by_key(id, |e| e.id)
            .ok()
            .map(|i| &self.events[i])
    }

    pub fn resource(&self, id: &Ulid) -> Option<&Resource> {
        self.resources
            .binary_search_by_key(id, |r| r.id)
            .ok()
            .map(|i| &self.resources[i])
    }
}

impl Engine {
    /// Copy the whole state under short read locks. The copy is retried
    /// when a mutation lands mid-copy, so the result matches one generation
    /// exactly; after MAX_SNAPSHOT_RETRIES the copy is cut with every
    /// schedule read lock held at once instead.
    pub async fn snapshot(&self) -> Snapshot {
        let started = std::time::Instant::now();
        let mut snap = self.copy_state().await;
        let mut retries = 0usize;
        while snap.generation != self.generation() && retries < MAX_SNAPSHOT_RETRIES {
            retries += 1;
            snap = self.copy_state().await;
        }
        if snap.generation != self.generation() {
            // Writers keep landing between copies; pin every schedule and
            // copy with the ledger quiescent.
            snap = self.copy_state_pinned().await;
        }
        if retries > 0 {
            tracing::debug!("snapshot settled after {retries} retries");
        }
        metrics::histogram!(SNAPSHOT_BUILD_SECONDS).record(started.elapsed().as_secs_f64());
        snap
    }

    async fn copy_state(&self) -> Snapshot {
        let generation = self.generation();
        let scheds: Vec<SharedSchedule> =
            self.schedules.iter().map(|e| e.value().clone()).collect();
        let mut assignments = Vec::new();
        for sched in scheds {
            let guard = sched.read().await;
            assignments.extend(guard.assignments.iter().copied());
        }
        self.finish_copy(generation, assignments)
    }

    /// Read-side analog of the sorted write-lock path. Batch commits and
    /// reschedules hold all their write locks until every schedule is
    /// edited, so a copy cut with every read lock held cannot catch one
    /// halfway.
    async fn copy_state_pinned(&self) -> Snapshot {
        let mut scheds: Vec<(Ulid, SharedSchedule)> = self
            .schedules
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        scheds.sort_by_key(|(id, _)| *id);
        let mut guards = Vec::with_capacity(scheds.len());
        for (_, sched) in &scheds {
            guards.push(sched.read().await);
        }
        let generation = self.generation();
        let mut assignments = Vec::new();
        for guard in &guards {
            assignments.extend(guard.assignments.iter().copied());
        }
        self.finish_copy(generation, assignments)
    }

    fn finish_copy(&self, generation: u64, mut assignments: Vec<Assignment>) -> Snapshot {
        let mut sites: Vec<Site> = self.sites.iter().map(|e| e.value().clone()).collect();
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut events: Vec<Event> = self.events.iter().map(|e| e.value().clone()).collect();
        let mut resources: Vec<Resource> =
            self.resources.iter().map(|e| e.value().clone()).collect();
        let mut meta: Vec<(String, String)> = self
            .meta
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        sites.sort_by_key(|s| s.id);
        rooms.sort_by_key(|r| r.id);
        events.sort_by_key(|e| e.id);
        resources.sort_by_key(|r| r.id);
        assignments.sort_by_key(|a| a.id);
        meta.sort();

        Snapshot {
            generation,
            taken_at: now_ms(),
            sites,
            rooms,
            events,
            resources,
            assignments,
            meta,
        }
    }
}
