use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_windows_in;
use super::conflict::validate_span;
use super::{Engine, EngineError};

impl Engine {
    /// True when the resource could take one more assignment over `span`:
    /// inside its availability window and clear of committed assignments.
    pub async fn is_available(&self, resource_id: Ulid, span: Span) -> Result<bool, EngineError> {
        validate_span(&span)?;
        let sched = self
            .get_schedule(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = sched.read().await;
        if !guard.window.contains_span(&span) {
            return Ok(false);
        }
        Ok(guard.overlapping(&span).next().is_none())
    }

    /// Free sub-intervals of `query` on one resource: the availability
    /// window clamped to the query, minus committed assignments.
    pub async fn free_windows(
        &self,
        resource_id: Ulid,
        query: Span,
    ) -> Result<Vec<Span>, EngineError> {
        validate_span(&query)?;
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let sched = self
            .get_schedule(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = sched.read().await;
        Ok(free_windows_in(&guard, &query))
    }

    /// All assignments on one resource, ordered by span start.
    pub async fn assignments_for_resource(
        &self,
        resource_id: Ulid,
    ) -> Result<Vec<Assignment>, EngineError> {
        let sched = self
            .get_schedule(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = sched.read().await;
        Ok(guard.assignments.clone())
    }

    pub async fn assignments_for_event(
        &self,
        event_id: Ulid,
    ) -> Result<Vec<Assignment>, EngineError> {
        if !self.events.contains_key(&event_id) {
            return Err(EngineError::NotFound(event_id));
        }
        let aids: Vec<Ulid> = self
            .event_assignments
            .get(&event_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(aids.len());
        for aid in aids {
            let rid = match self.resource_for_assignment(&aid) {
                Some(rid) => rid,
                None => continue,
            };
            let sched = match self.get_schedule(&rid) {
                Some(s) => s,
                None => continue,
            };
            let guard = sched.read().await;
            if let Some(a) = guard.assignments.iter().find(|a| a.id == aid) {
                out.push(*a);
            }
        }
        Ok(out)
    }

    pub fn get_site(&self, id: &Ulid) -> Option<Site> {
        self.sites.get(id).map(|e| e.value().clone())
    }

    pub fn get_room(&self, id: &Ulid) -> Option<Room> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_event(&self, id: &Ulid) -> Option<Event> {
        self.events.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<Resource> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn list_sites(&self) -> Vec<Site> {
        let mut out: Vec<Site> = self.sites.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|s| s.id);
        out
    }

    pub fn list_rooms(&self) -> Vec<Room> {
        let mut out: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|r| r.id);
        out
    }

    pub fn list_events(&self) -> Vec<Event> {
        let mut out: Vec<Event> = self.events.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// Catalog listing, optionally narrowed to one kind.
    pub fn list_resources(&self, kind: Option<ResourceKind>) -> Vec<Resource> {
        let mut out: Vec<Resource> = self
            .resources
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| kind.is_none_or(|k| r.kind() == k))
            .collect();
        out.sort_by_key(|r| r.id);
        out
    }

    pub fn stats(&self) -> EngineStats {
        let mut staff = 0usize;
        let mut equipment = 0usize;
        for entry in self.resources.iter() {
            match entry.value().kind() {
                ResourceKind::Staff => staff += 1,
                ResourceKind::Equipment => equipment += 1,
            }
        }
        EngineStats {
            sites: self.sites.len(),
            rooms: self.rooms.len(),
            events: self.events.len(),
            staff,
            equipment,
            assignments: self.assignment_to_resource.len(),
        }
    }

    pub fn meta(&self, key: &str) -> Option<String> {
        self.meta.get(key).map(|e| e.value().clone())
    }

    pub fn list_meta(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .meta
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort();
        out
    }
}
