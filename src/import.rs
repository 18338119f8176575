//! Batch import boundary.
//!
//! External loaders parse portable data files into [`ImportBatch`] records
//! and hand them over in one call; the engine never touches the file format.
//! Records reference each other through caller-chosen string keys, ids are
//! minted here. Every record is validated independently: one bad record is
//! reported and skipped, the rest of the batch still lands.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::{Ms, ResourceDetail, Span};
use crate::observability::IMPORT_RECORDS_TOTAL;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRecord {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    pub key: String,
    /// Key of the site this room belongs to.
    pub site: String,
    pub name: String,
    #[serde(default)]
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub key: String,
    /// Key of the room this event is scheduled in.
    pub room: String,
    pub title: String,
    pub start: Ms,
    pub end: Ms,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffRecord {
    pub key: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub contact: Option<String>,
    pub window_start: Ms,
    pub window_end: Ms,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentRecord {
    pub key: String,
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub window_start: Ms,
    pub window_end: Ms,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRecord {
    /// Key of the staff or equipment record to book.
    pub resource: String,
    /// Key of the event to book it for.
    pub event: String,
}

/// One portable data file, already deserialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportBatch {
    #[serde(default)]
    pub sites: Vec<SiteRecord>,
    #[serde(default)]
    pub rooms: Vec<RoomRecord>,
    #[serde(default)]
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub staff: Vec<StaffRecord>,
    #[serde(default)]
    pub equipment: Vec<EquipmentRecord>,
    #[serde(default)]
    pub assignments: Vec<AssignmentRecord>,
}

/// Per-record result. `key` is the record's own key, or
/// `resource/event` for assignment records.
#[derive(Debug)]
pub struct RecordOutcome {
    pub entity: &'static str,
    pub key: String,
    pub result: Result<Ulid, EngineError>,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub outcomes: Vec<RecordOutcome>,
}

impl ImportReport {
    pub fn accepted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn rejected(&self) -> usize {
        self.outcomes.len() - self.accepted()
    }

    fn push(&mut self, entity: &'static str, key: String, result: Result<Ulid, EngineError>) {
        let status = if result.is_ok() { "accepted" } else { "rejected" };
        metrics::counter!(IMPORT_RECORDS_TOTAL, "entity" => entity, "status" => status)
            .increment(1);
        self.outcomes.push(RecordOutcome {
            entity,
            key,
            result,
        });
    }
}

impl Engine {
    /// Load a whole batch, in dependency order. Returns one outcome per
    /// record; references to keys that failed (or never existed) are
    /// rejected, not propagated.
    pub async fn import(&self, batch: ImportBatch) -> ImportReport {
        let mut report = ImportReport::default();
        let mut sites: HashMap<String, Ulid> = HashMap::new();
        let mut rooms: HashMap<String, Ulid> = HashMap::new();
        let mut events: HashMap<String, Ulid> = HashMap::new();
        let mut resources: HashMap<String, Ulid> = HashMap::new();

        for rec in batch.sites {
            if sites.contains_key(&rec.key) {
                report.push(
                    "site",
                    rec.key,
                    Err(EngineError::Validation("duplicate site key")),
                );
                continue;
            }
            let id = Ulid::new();
            let result = self.create_site(id, rec.name, rec.address).map(|()| id);
            if result.is_ok() {
                sites.insert(rec.key.clone(), id);
            }
            report.push("site", rec.key, result);
        }

        for rec in batch.rooms {
            if rooms.contains_key(&rec.key) {
                report.push(
                    "room",
                    rec.key,
                    Err(EngineError::Validation("duplicate room key")),
                );
                continue;
            }
            let Some(&site_id) = sites.get(&rec.site) else {
                report.push(
                    "room",
                    rec.key,
                    Err(EngineError::Validation("unknown site key")),
                );
                continue;
            };
            let id = Ulid::new();
            let result = self
                .create_room(id, site_id, rec.name, rec.capacity)
                .map(|()| id);
            if result.is_ok() {
                rooms.insert(rec.key.clone(), id);
            }
            report.push("room", rec.key, result);
        }

        for rec in batch.events {
            if events.contains_key(&rec.key) {
                report.push(
                    "event",
                    rec.key,
                    Err(EngineError::Validation("duplicate event key")),
                );
                continue;
            }
            let Some(&room_id) = rooms.get(&rec.room) else {
                report.push(
                    "event",
                    rec.key,
                    Err(EngineError::Validation("unknown room key")),
                );
                continue;
            };
            let id = Ulid::new();
            let span = Span {
                start: rec.start,
                end: rec.end,
            };
            let result = self
                .create_event(id, room_id, rec.title, span)
                .map(|()| id);
            if result.is_ok() {
                events.insert(rec.key.clone(), id);
            }
            report.push("event", rec.key, result);
        }

        for rec in batch.staff {
            if resources.contains_key(&rec.key) {
                report.push(
                    "staff",
                    rec.key,
                    Err(EngineError::Validation("duplicate resource key")),
                );
                continue;
            }
            let id = Ulid::new();
            let window = Span {
                start: rec.window_start,
                end: rec.window_end,
            };
            let detail = ResourceDetail::Staff {
                name: rec.name,
                role: rec.role,
                contact: rec.contact,
            };
            let result = self.create_resource(id, window, detail).map(|()| id);
            if result.is_ok() {
                resources.insert(rec.key.clone(), id);
            }
            report.push("staff", rec.key, result);
        }

        for rec in batch.equipment {
            if resources.contains_key(&rec.key) {
                report.push(
                    "equipment",
                    rec.key,
                    Err(EngineError::Validation("duplicate resource key")),
                );
                continue;
            }
            let id = Ulid::new();
            let window = Span {
                start: rec.window_start,
                end: rec.window_end,
            };
            let detail = ResourceDetail::Equipment {
                name: rec.name,
                class: rec.class,
                notes: rec.notes,
            };
            let result = self.create_resource(id, window, detail).map(|()| id);
            if result.is_ok() {
                resources.insert(rec.key.clone(), id);
            }
            report.push("equipment", rec.key, result);
        }

        for rec in batch.assignments {
            let key = format!("{}/{}", rec.resource, rec.event);
            let Some(&resource_id) = resources.get(&rec.resource) else {
                report.push(
                    "assignment",
                    key,
                    Err(EngineError::Validation("unknown resource key")),
                );
                continue;
            };
            let Some(&event_id) = events.get(&rec.event) else {
                report.push(
                    "assignment",
                    key,
                    Err(EngineError::Validation("unknown event key")),
                );
                continue;
            };
            let result = self
                .assign(Ulid::new(), resource_id, event_id)
                .await
                .map(|a| a.id);
            report.push("assignment", key, result);
        }

        let accepted = report.accepted();
        let rejected = report.rejected();
        tracing::info!("import finished: {accepted} accepted, {rejected} rejected");
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::notify::ChangeHub;

    const H: Ms = 3_600_000;

    fn engine() -> Engine {
        Engine::new(Arc::new(ChangeHub::new()))
    }

    fn site(key: &str, name: &str) -> SiteRecord {
        SiteRecord {
            key: key.into(),
            name: name.into(),
            address: None,
        }
    }

    fn room(key: &str, site: &str, name: &str) -> RoomRecord {
        RoomRecord {
            key: key.into(),
            site: site.into(),
            name: name.into(),
            capacity: Some(100),
        }
    }

    fn event(key: &str, room: &str, title: &str, start: Ms, end: Ms) -> EventRecord {
        EventRecord {
            key: key.into(),
            room: room.into(),
            title: title.into(),
            start,
            end,
        }
    }

    fn staff(key: &str, name: &str) -> StaffRecord {
        StaffRecord {
            key: key.into(),
            name: name.into(),
            role: "crew".into(),
            contact: None,
            window_start: 0,
            window_end: 48 * H,
        }
    }

    fn booking(resource: &str, event: &str) -> AssignmentRecord {
        AssignmentRecord {
            resource: resource.into(),
            event: event.into(),
        }
    }

    #[tokio::test]
    async fn full_batch_lands() {
        let engine = engine();
        let batch = ImportBatch {
            sites: vec![site("hq", "Convention Center")],
            rooms: vec![room("hall", "hq", "Hall A")],
            events: vec![
                event("talk", "hall", "Opening Talk", 9 * H, 10 * H),
                event("panel", "hall", "Panel", 10 * H, 11 * H),
            ],
            staff: vec![staff("ana", "Ana")],
            equipment: vec![EquipmentRecord {
                key: "proj".into(),
                name: "Projector 1".into(),
                class: "projector".into(),
                notes: None,
                window_start: 0,
                window_end: 48 * H,
            }],
            assignments: vec![booking("ana", "talk"), booking("proj", "talk")],
        };

        let report = engine.import(batch).await;
        assert_eq!(report.accepted(), 8);
        assert_eq!(report.rejected(), 0);

        let stats = engine.stats();
        assert_eq!(stats.sites, 1);
        assert_eq!(stats.rooms, 1);
        assert_eq!(stats.events, 2);
        assert_eq!(stats.staff, 1);
        assert_eq!(stats.equipment, 1);
        assert_eq!(stats.assignments, 2);
    }

    #[tokio::test]
    async fn bad_record_does_not_block_the_rest() {
        let engine = engine();
        let batch = ImportBatch {
            sites: vec![site("hq", "Convention Center")],
            rooms: vec![
                room("lost", "nowhere", "Orphan Room"),
                room("hall", "hq", "Hall A"),
            ],
            events: vec![event("talk", "hall", "Opening Talk", 9 * H, 10 * H)],
            ..ImportBatch::default()
        };

        let report = engine.import(batch).await;
        assert_eq!(report.accepted(), 3);
        assert_eq!(report.rejected(), 1);
        let failed = report
            .outcomes
            .iter()
            .find(|o| o.key == "lost")
            .unwrap();
        assert!(matches!(
            failed.result,
            Err(EngineError::Validation("unknown site key"))
        ));
        assert_eq!(engine.stats().rooms, 1);
    }

    #[tokio::test]
    async fn conflicting_assignment_reported() {
        let engine = engine();
        let batch = ImportBatch {
            sites: vec![site("hq", "Convention Center")],
            rooms: vec![room("hall", "hq", "Hall A")],
            events: vec![
                event("talk", "hall", "Opening Talk", 9 * H, 11 * H),
                event("panel", "hall", "Panel", 10 * H, 12 * H),
            ],
            staff: vec![staff("ana", "Ana")],
            assignments: vec![booking("ana", "talk"), booking("ana", "panel")],
            ..ImportBatch::default()
        };

        let report = engine.import(batch).await;
        assert_eq!(report.rejected(), 1);
        let failed = report
            .outcomes
            .iter()
            .find(|o| o.key == "ana/panel")
            .unwrap();
        assert!(matches!(failed.result, Err(EngineError::Conflict(_))));
        assert_eq!(engine.stats().assignments, 1);
    }

    #[tokio::test]
    async fn duplicate_key_rejected() {
        let engine = engine();
        let batch = ImportBatch {
            sites: vec![site("hq", "Convention Center"), site("hq", "Annex")],
            ..ImportBatch::default()
        };

        let report = engine.import(batch).await;
        assert_eq!(report.accepted(), 1);
        assert!(matches!(
            report.outcomes[1].result,
            Err(EngineError::Validation("duplicate site key"))
        ));
    }

    #[tokio::test]
    async fn inverted_span_rejected_per_record() {
        let engine = engine();
        let batch = ImportBatch {
            sites: vec![site("hq", "Convention Center")],
            rooms: vec![room("hall", "hq", "Hall A")],
            events: vec![
                event("bad", "hall", "Backwards", 10 * H, 9 * H),
                event("good", "hall", "Fine", 9 * H, 10 * H),
            ],
            ..ImportBatch::default()
        };

        let report = engine.import(batch).await;
        assert_eq!(report.accepted(), 3);
        assert_eq!(report.rejected(), 1);
        assert_eq!(engine.stats().events, 1);
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let engine = engine();
        let before = engine.generation();
        let report = engine.import(ImportBatch::default()).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(engine.generation(), before);
    }
}
