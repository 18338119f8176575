use std::collections::HashMap;
use std::sync::Arc;

use dashmap::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{ASSIGNMENTS_TOTAL, CONFLICTS_TOTAL};

use super::conflict::{
    check_no_conflict, check_window, find_conflicts, validate_detail, validate_name, validate_span,
    validate_text,
};
use super::{Engine, EngineError};

impl Engine {
    pub fn create_site(
        &self,
        id: Ulid,
        name: String,
        address: Option<String>,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        validate_text(address.as_deref(), "site address too long")?;
        if self.sites.len() >= MAX_SITES {
            return Err(EngineError::LimitExceeded("too many sites"));
        }
        if self.sites.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.sites.insert(id, Site { id, name, address });
        self.site_rooms.entry(id).or_default();
        self.commit(None, Change::SiteCreated { id });
        Ok(())
    }

    pub fn update_site(
        &self,
        id: Ulid,
        name: String,
        address: Option<String>,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        validate_text(address.as_deref(), "site address too long")?;
        let mut entry = self.sites.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        entry.name = name;
        entry.address = address;
        drop(entry);
        self.commit(None, Change::SiteUpdated { id });
        Ok(())
    }

    pub fn delete_site(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.sites.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if let Some(rooms) = self.site_rooms.get(&id)
            && !rooms.is_empty() {
                return Err(EngineError::HasDependents {
                    id,
                    dependents: "rooms",
                    count: rooms.len(),
                });
            }
        self.sites.remove(&id);
        self.site_rooms.remove(&id);
        self.commit(None, Change::SiteDeleted { id });
        Ok(())
    }

    pub fn create_room(
        &self,
        id: Ulid,
        site_id: Ulid,
        name: String,
        capacity: Option<u32>,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        if !self.sites.contains_key(&site_id) {
            return Err(EngineError::NotFound(site_id));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(rooms) = self.site_rooms.get(&site_id)
            && rooms.len() >= MAX_ROOMS_PER_SITE {
                return Err(EngineError::LimitExceeded("too many rooms in site"));
            }
        self.rooms.insert(
            id,
            Room {
                id,
                site_id,
                name,
                capacity,
            },
        );
        self.site_rooms.entry(site_id).or_default().push(id);
        self.room_events.entry(id).or_default();
        self.commit(None, Change::RoomCreated { id, site_id });
        Ok(())
    }

    pub fn update_room(
        &self,
        id: Ulid,
        name: String,
        capacity: Option<u32>,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        let mut entry = self.rooms.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        let site_id = entry.site_id;
        entry.name = name;
        entry.capacity = capacity;
        drop(entry);
        self.commit(None, Change::RoomUpdated { id, site_id });
        Ok(())
    }

    pub fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let site_id = match self.rooms.get(&id) {
            Some(r) => r.site_id,
            None => return Err(EngineError::NotFound(id)),
        };
        if let Some(events) = self.room_events.get(&id)
            && !events.is_empty() {
                return Err(EngineError::HasDependents {
                    id,
                    dependents: "events",
                    count: events.len(),
                });
            }
        self.rooms.remove(&id);
        self.room_events.remove(&id);
        if let Some(mut rooms) = self.site_rooms.get_mut(&site_id) {
            rooms.retain(|r| r != &id);
        }
        self.commit(None, Change::RoomDeleted { id, site_id });
        Ok(())
    }

    pub fn create_event(
        &self,
        id: Ulid,
        room_id: Ulid,
        title: String,
        span: Span,
    ) -> Result<(), EngineError> {
        validate_name(&title)?;
        validate_span(&span)?;
        if self.events.len() >= MAX_EVENTS {
            return Err(EngineError::LimitExceeded("too many events"));
        }
        if !self.rooms.contains_key(&room_id) {
            return Err(EngineError::NotFound(room_id));
        }
        if self.events.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.events.insert(
            id,
            Event {
                id,
                room_id,
                title,
                span,
            },
        );
        self.room_events.entry(room_id).or_default().push(id);
        self.event_assignments.entry(id).or_default();
        self.commit(None, Change::EventCreated { id, room_id, span });
        Ok(())
    }

    /// Reschedule or otherwise edit an event. When the span changes, every
    /// committed assignment of the event must still fit its resource: all
    /// affected schedules are locked in sorted order, revalidated against
    /// the new span, and only then moved. All-or-nothing.
    pub async fn update_event(
        &self,
        id: Ulid,
        room_id: Ulid,
        title: String,
        span: Span,
    ) -> Result<(), EngineError> {
        validate_name(&title)?;
        validate_span(&span)?;
        let old = self
            .events
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        if room_id != old.room_id && !self.rooms.contains_key(&room_id) {
            return Err(EngineError::NotFound(room_id));
        }

        let updated = Event {
            id,
            room_id,
            title,
            span,
        };

        if span == old.span {
            let Some(mut entry) = self.events.get_mut(&id) else {
                return Err(EngineError::NotFound(id));
            };
            *entry = updated;
            drop(entry);
        } else {
            // The registered list can grow under us through assigns on
            // schedules outside the lock set; re-read it once the locks are
            // held and widen the set until it is stable.
            let mut aids: Vec<Ulid> = self
                .event_assignments
                .get(&id)
                .map(|e| e.value().clone())
                .ok_or(EngineError::NotFound(id))?;
            loop {
                let mut pairs = Vec::with_capacity(aids.len());
                let mut stale = false;
                for aid in &aids {
                    match self.resource_for_assignment(aid) {
                        Some(rid) => pairs.push((*aid, rid)),
                        None => {
                            stale = true;
                            break;
                        }
                    }
                }
                if stale {
                    // An id from the list was unassigned before we could lock.
                    aids = self
                        .event_assignments
                        .get(&id)
                        .map(|e| e.value().clone())
                        .ok_or(EngineError::NotFound(id))?;
                    continue;
                }
                let mut resource_ids: Vec<Ulid> = pairs.iter().map(|(_, rid)| *rid).collect();
                let mut guards = self.lock_schedules_sorted(&mut resource_ids).await?;
                let rs_map: HashMap<Ulid, usize> = resource_ids
                    .iter()
                    .enumerate()
                    .map(|(i, rid)| (*rid, i))
                    .collect();

                // Holding the event's index entry excludes a racing assign's
                // span read: it lands either before this point and shows up
                // in the list, or after and sees the new span.
                let Some(registered) = self.event_assignments.get(&id) else {
                    return Err(EngineError::NotFound(id));
                };
                if *registered.value() != aids {
                    aids = registered.value().clone();
                    drop(registered);
                    drop(guards);
                    continue;
                }

                // Every assignment must fit the new span before any is moved.
                for (aid, rid) in &pairs {
                    let guard = &guards[rs_map[rid]];
                    check_window(guard, &span)?;
                    let conflicts = find_conflicts(guard, &span, Some(*aid));
                    if !conflicts.is_empty() {
                        metrics::counter!(CONFLICTS_TOTAL).increment(1);
                        return Err(EngineError::Conflict(conflicts));
                    }
                }

                for (aid, rid) in &pairs {
                    let guard = &mut guards[rs_map[rid]];
                    if let Some(mut a) = guard.remove(*aid) {
                        a.span = span;
                        guard.insert(a);
                    }
                }

                self.events.insert(id, updated.clone());
                drop(registered);
                drop(guards);
                break;
            }
        }

        if room_id != old.room_id {
            if let Some(mut evs) = self.room_events.get_mut(&old.room_id) {
                evs.retain(|e| e != &id);
            }
            self.room_events.entry(room_id).or_default().push(id);
        }
        self.commit(None, Change::EventUpdated { id, room_id, span });
        Ok(())
    }

    pub fn delete_event(&self, id: Ulid) -> Result<(), EngineError> {
        let room_id = match self.events.get(&id) {
            Some(ev) => ev.room_id,
            None => return Err(EngineError::NotFound(id)),
        };
        // Check and unlink in one shot: an assign registers under this
        // entry, so it either shows up in the count here or finds the
        // entry gone and reports the event missing.
        let mut count = 0usize;
        let removed = self.event_assignments.remove_if(&id, |_, aids| {
            count = aids.len();
            aids.is_empty()
        });
        if removed.is_none() {
            if count > 0 {
                return Err(EngineError::HasDependents {
                    id,
                    dependents: "assignments",
                    count,
                });
            }
            return Err(EngineError::NotFound(id));
        }
        self.events.remove(&id);
        if let Some(mut events) = self.room_events.get_mut(&room_id) {
            events.retain(|e| e != &id);
        }
        self.commit(None, Change::EventDeleted { id, room_id });
        Ok(())
    }

    pub fn create_resource(
        &self,
        id: Ulid,
        window: Span,
        detail: ResourceDetail,
    ) -> Result<(), EngineError> {
        validate_span(&window)?;
        validate_detail(&detail)?;
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if self.resources.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.resources.insert(id, Resource { id, window, detail });
        self.schedules
            .insert(id, Arc::new(RwLock::new(ResourceSchedule::new(id, window))));
        self.commit(Some(id), Change::ResourceCreated { id });
        Ok(())
    }

    pub fn update_resource(&self, id: Ulid, detail: ResourceDetail) -> Result<(), EngineError> {
        validate_detail(&detail)?;
        let mut entry = self
            .resources
            .get_mut(&id)
            .ok_or(EngineError::NotFound(id))?;
        // Kind is fixed at creation.
        let same_kind = matches!(
            (&entry.detail, &detail),
            (ResourceDetail::Staff { .. }, ResourceDetail::Staff { .. })
                | (
                    ResourceDetail::Equipment { .. },
                    ResourceDetail::Equipment { .. }
                )
        );
        if !same_kind {
            return Err(EngineError::Validation("resource kind cannot change"));
        }
        entry.detail = detail;
        drop(entry);
        self.commit(Some(id), Change::ResourceUpdated { id });
        Ok(())
    }

    /// Replace a resource's availability window. Rejected if any committed
    /// assignment would fall outside the new window.
    pub async fn update_resource_window(&self, id: Ulid, window: Span) -> Result<(), EngineError> {
        validate_span(&window)?;
        let sched = self.get_schedule(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = sched.write_owned().await;
        if !self.schedules.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        for a in &guard.assignments {
            if !window.contains_span(&a.span) {
                return Err(EngineError::OutsideWindow {
                    resource_id: id,
                    window,
                });
            }
        }
        guard.window = window;
        if let Some(mut r) = self.resources.get_mut(&id) {
            r.window = window;
        }
        drop(guard);
        self.commit(Some(id), Change::ResourceUpdated { id });
        Ok(())
    }

    pub async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let sched = self.get_schedule(&id).ok_or(EngineError::NotFound(id))?;
        let guard = sched.write_owned().await;
        // Another delete may have unlinked the schedule while we waited.
        if !self.schedules.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if !guard.assignments.is_empty() {
            return Err(EngineError::HasDependents {
                id,
                dependents: "assignments",
                count: guard.assignments.len(),
            });
        }
        // Unlink while the lock is held so an assign queued on it finds
        // the schedule gone instead of committing into an orphan.
        self.resources.remove(&id);
        self.schedules.remove(&id);
        drop(guard);
        self.commit(Some(id), Change::ResourceDeleted { id });
        self.notify.remove(&id);
        Ok(())
    }

    /// Commit one resource to one event over the event's span. Fails with
    /// the full conflict list if the resource is already taken anywhere in
    /// that span.
    pub async fn assign(
        &self,
        id: Ulid,
        resource_id: Ulid,
        event_id: Ulid,
    ) -> Result<Assignment, EngineError> {
        if !self.events.contains_key(&event_id) {
            return Err(EngineError::NotFound(event_id));
        }
        if self.assignment_to_resource.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let sched = self
            .get_schedule(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = sched.write_owned().await;
        // The resource may have been deleted while we waited for the lock.
        if !self.schedules.contains_key(&resource_id) {
            return Err(EngineError::NotFound(resource_id));
        }
        if guard.assignments.len() >= MAX_ASSIGNMENTS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many assignments on resource"));
        }

        // The span read and the registration happen under the event's index
        // entry; a reschedule edits the event under the same entry, so the
        // span committed here is the span the event has right now. A
        // deleted event has no entry.
        let Some(mut registered) = self.event_assignments.get_mut(&event_id) else {
            return Err(EngineError::NotFound(event_id));
        };
        let span = match self.events.get(&event_id) {
            Some(e) => e.value().span,
            None => return Err(EngineError::NotFound(event_id)),
        };
        check_window(&guard, &span)?;
        if let Err(e) = check_no_conflict(&guard, &span) {
            metrics::counter!(CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }
        match self.assignment_to_resource.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => slot.insert(resource_id),
        };

        let assignment = Assignment {
            id,
            resource_id,
            event_id,
            span,
        };
        guard.insert(assignment);
        registered.push(id);
        drop(registered);
        drop(guard);
        metrics::counter!(ASSIGNMENTS_TOTAL).increment(1);
        self.commit(
            Some(resource_id),
            Change::Assigned {
                id,
                resource_id,
                event_id,
                span,
            },
        );
        Ok(assignment)
    }

    /// Atomically commit multiple assignments. All-or-nothing: if any one
    /// conflicts, none are committed. Requests may span different resources.
    pub async fn assign_many(
        &self,
        requests: Vec<(Ulid, Ulid, Ulid)>,
    ) -> Result<Vec<Assignment>, EngineError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if requests.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        // Early resolution for cheap failures. Spans are provisional here:
        // the authoritative read happens per event once the schedules are
        // locked.
        let mut planned: Vec<Assignment> = Vec::with_capacity(requests.len());
        for (id, resource_id, event_id) in &requests {
            let span = self
                .events
                .get(event_id)
                .map(|e| e.value().span)
                .ok_or(EngineError::NotFound(*event_id))?;
            if self.assignment_to_resource.contains_key(id)
                || planned.iter().any(|p| p.id == *id)
            {
                return Err(EngineError::AlreadyExists(*id));
            }
            planned.push(Assignment {
                id: *id,
                resource_id: *resource_id,
                event_id: *event_id,
                span,
            });
        }

        let mut resource_ids: Vec<Ulid> = planned.iter().map(|p| p.resource_id).collect();
        let mut guards = self.lock_schedules_sorted(&mut resource_ids).await?;
        let rs_map: HashMap<Ulid, usize> = resource_ids
            .iter()
            .enumerate()
            .map(|(i, rid)| (*rid, i))
            .collect();

        // Rows grouped per event in batch order, so each event is read and
        // registered in a single pass under its index entry.
        let mut by_event: Vec<(Ulid, Vec<usize>)> = Vec::new();
        for (i, p) in planned.iter().enumerate() {
            match by_event.iter().position(|(eid, _)| *eid == p.event_id) {
                Some(slot) => by_event[slot].1.push(i),
                None => by_event.push((p.event_id, vec![i])),
            }
        }

        // Validate and stage row by row. Staged inserts are invisible until
        // the guards drop, so a failure can unwind to a clean slate.
        let mut staged: Vec<usize> = Vec::new();
        let mut failure: Option<EngineError> = None;
        'events: for (event_id, rows) in &by_event {
            let Some(mut registered) = self.event_assignments.get_mut(event_id) else {
                failure = Some(EngineError::NotFound(*event_id));
                break 'events;
            };
            let span = match self.events.get(event_id) {
                Some(e) => e.value().span,
                None => {
                    failure = Some(EngineError::NotFound(*event_id));
                    break 'events;
                }
            };
            for &i in rows {
                planned[i].span = span;
                let idx = rs_map[&planned[i].resource_id];
                {
                    let guard = &guards[idx];
                    if guard.assignments.len() >= MAX_ASSIGNMENTS_PER_RESOURCE {
                        failure =
                            Some(EngineError::LimitExceeded("too many assignments on resource"));
                        break 'events;
                    }
                    if let Err(e) = check_window(guard, &span) {
                        failure = Some(e);
                        break 'events;
                    }
                    if let Err(e) = check_no_conflict(guard, &span) {
                        metrics::counter!(CONFLICTS_TOTAL).increment(1);
                        failure = Some(e);
                        break 'events;
                    }
                }
                match self.assignment_to_resource.entry(planned[i].id) {
                    Entry::Occupied(_) => {
                        failure = Some(EngineError::AlreadyExists(planned[i].id));
                        break 'events;
                    }
                    Entry::Vacant(slot) => slot.insert(planned[i].resource_id),
                };
                guards[idx].insert(planned[i]);
                registered.push(planned[i].id);
                staged.push(i);
            }
        }

        if let Some(err) = failure {
            for &i in &staged {
                let p = planned[i];
                guards[rs_map[&p.resource_id]].remove(p.id);
                self.assignment_to_resource.remove(&p.id);
                if let Some(mut evs) = self.event_assignments.get_mut(&p.event_id) {
                    evs.retain(|a| a != &p.id);
                }
            }
            drop(guards);
            return Err(err);
        }

        drop(guards);
        metrics::counter!(ASSIGNMENTS_TOTAL).increment(planned.len() as u64);
        for p in &planned {
            self.commit(
                Some(p.resource_id),
                Change::Assigned {
                    id: p.id,
                    resource_id: p.resource_id,
                    event_id: p.event_id,
                    span: p.span,
                },
            );
        }
        Ok(planned)
    }

    pub async fn unassign(&self, id: Ulid) -> Result<(), EngineError> {
        let (resource_id, mut guard) = self.resolve_assignment_write(&id).await?;
        let removed = guard.remove(id).ok_or(EngineError::NotFound(id))?;
        self.assignment_to_resource.remove(&id);
        if let Some(mut evs) = self.event_assignments.get_mut(&removed.event_id) {
            evs.retain(|a| a != &id);
        }
        drop(guard);
        self.commit(
            Some(resource_id),
            Change::Unassigned {
                id,
                resource_id,
                event_id: removed.event_id,
            },
        );
        Ok(())
    }

    pub fn set_meta(&self, key: String, value: String) -> Result<(), EngineError> {
        validate_name(&key)?;
        validate_text(Some(&value), "meta value too long")?;
        if self.meta.len() >= MAX_META_ENTRIES && !self.meta.contains_key(&key) {
            return Err(EngineError::LimitExceeded("too many meta entries"));
        }
        self.meta.insert(key.clone(), value);
        self.commit(None, Change::MetaSet { key });
        Ok(())
    }
}
