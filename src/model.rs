use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Topology entities ─────────────────────────────────────────────

/// A venue. Owns its rooms exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: Ulid,
    pub name: String,
    pub address: Option<String>,
}

/// A room inside exactly one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub site_id: Ulid,
    pub name: String,
    /// Seats, when known.
    pub capacity: Option<u32>,
}

/// A scheduled happening, hosted in exactly one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub room_id: Ulid,
    pub title: String,
    pub span: Span,
}

// ── Assignable resources ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Staff,
    Equipment,
}

impl ResourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Staff => "staff",
            ResourceKind::Equipment => "equipment",
        }
    }
}

/// Kind-specific fields of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceDetail {
    Staff {
        name: String,
        role: String,
        contact: Option<String>,
    },
    Equipment {
        name: String,
        class: String,
        notes: Option<String>,
    },
}

/// One assignable unit: a person or a single piece of equipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    /// Outside this window the resource can never be assigned.
    pub window: Span,
    pub detail: ResourceDetail,
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self.detail {
            ResourceDetail::Staff { .. } => ResourceKind::Staff,
            ResourceDetail::Equipment { .. } => ResourceKind::Equipment,
        }
    }

    pub fn name(&self) -> &str {
        match &self.detail {
            ResourceDetail::Staff { name, .. } => name,
            ResourceDetail::Equipment { name, .. } => name,
        }
    }

    /// Staff role or equipment class.
    pub fn category(&self) -> &str {
        match &self.detail {
            ResourceDetail::Staff { role, .. } => role,
            ResourceDetail::Equipment { class, .. } => class,
        }
    }
}

// ── Ledger entries ────────────────────────────────────────────────

/// A committed binding of one resource to one event. The span is copied
/// from the event at commit time and kept in sync on reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub event_id: Ulid,
    pub span: Span,
}

/// One collision found when probing a resource's schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub assignment_id: Ulid,
    pub event_id: Ulid,
    /// The overlapping sub-interval.
    pub overlap: Span,
}

/// Per-resource schedule, the unit of write locking.
#[derive(Debug, Clone)]
pub struct ResourceSchedule {
    pub resource_id: Ulid,
    /// Mirror of the catalog record's availability window.
    pub window: Span,
    /// Committed assignments, sorted by `span.start`.
    pub assignments: Vec<Assignment>,
}

impl ResourceSchedule {
    pub fn new(resource_id: Ulid, window: Span) -> Self {
        Self {
            resource_id,
            window,
            assignments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, assignment: Assignment) {
        let pos = self
            .assignments
            .binary_search_by_key(&assignment.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.assignments.insert(pos, assignment);
    }

    /// Remove an assignment by id.
    pub fn remove(&mut self, id: Ulid) -> Option<Assignment> {
        if let Some(pos) = self.assignments.iter().position(|a| a.id == id) {
            Some(self.assignments.remove(pos))
        } else {
            None
        }
    }

    /// Return only assignments whose span overlaps the query window.
    /// Uses binary search to skip assignments starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Assignment> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .assignments
            .partition_point(|a| a.span.start < query.end);
        self.assignments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }
}

// ── Change feed ───────────────────────────────────────────────────

/// Committed state changes, published to subscribers after each mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    SiteCreated { id: Ulid },
    SiteUpdated { id: Ulid },
    SiteDeleted { id: Ulid },
    RoomCreated { id: Ulid, site_id: Ulid },
    RoomUpdated { id: Ulid, site_id: Ulid },
    RoomDeleted { id: Ulid, site_id: Ulid },
    EventCreated { id: Ulid, room_id: Ulid, span: Span },
    EventUpdated { id: Ulid, room_id: Ulid, span: Span },
    EventDeleted { id: Ulid, room_id: Ulid },
    ResourceCreated { id: Ulid },
    ResourceUpdated { id: Ulid },
    ResourceDeleted { id: Ulid },
    Assigned {
        id: Ulid,
        resource_id: Ulid,
        event_id: Ulid,
        span: Span,
    },
    Unassigned {
        id: Ulid,
        resource_id: Ulid,
        event_id: Ulid,
    },
    MetaSet { key: String },
}

// ── Query result types ───────────────────────────────────────────

/// A ranked alternative produced by the resolver. Conflict-free candidates
/// sort first, then matching categories, then soonest window start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub resource_id: Ulid,
    pub name: String,
    pub category: String,
    pub category_match: bool,
    pub window_start: Ms,
    /// Empty when the candidate is free for the probed window.
    pub conflicts: Vec<Conflict>,
}

/// Entity counts for an overview line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub sites: usize,
    pub rooms: usize,
    pub events: usize,
    pub staff: usize,
    pub equipment: usize,
    pub assignments: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(start: Ms, end: Ms) -> Assignment {
        Assignment {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            event_id: Ulid::new(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer)); // self-containment
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn schedule_keeps_sort_order() {
        let mut sched = ResourceSchedule::new(Ulid::new(), Span::new(0, 10_000));
        sched.insert(assignment(300, 400));
        sched.insert(assignment(100, 200));
        sched.insert(assignment(200, 300));
        assert_eq!(sched.assignments[0].span.start, 100);
        assert_eq!(sched.assignments[1].span.start, 200);
        assert_eq!(sched.assignments[2].span.start, 300);
    }

    #[test]
    fn schedule_remove() {
        let mut sched = ResourceSchedule::new(Ulid::new(), Span::new(0, 10_000));
        let a = assignment(100, 200);
        let id = a.id;
        sched.insert(a);
        assert_eq!(sched.assignments.len(), 1);
        sched.remove(id);
        assert!(sched.assignments.is_empty());
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut sched = ResourceSchedule::new(Ulid::new(), Span::new(0, 10_000));
        sched.insert(assignment(100, 200));
        let result = sched.remove(Ulid::new());
        assert!(result.is_none());
        assert_eq!(sched.assignments.len(), 1); // original still there
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut sched = ResourceSchedule::new(Ulid::new(), Span::new(0, 10_000));
        let entries: Vec<Assignment> = (0..3)
            .map(|i| assignment((i as Ms) * 100, (i as Ms) * 100 + 50))
            .collect();
        for a in &entries {
            sched.insert(*a);
        }
        sched.remove(entries[1].id); // remove middle
        assert_eq!(sched.assignments.len(), 2);
        assert_eq!(sched.assignments[0].id, entries[0].id);
        assert_eq!(sched.assignments[1].id, entries[2].id);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut sched = ResourceSchedule::new(Ulid::new(), Span::new(0, 100_000));
        sched.insert(assignment(100, 200)); // past
        sched.insert(assignment(450, 600)); // overlapping
        sched.insert(assignment(1000, 1100)); // starts after query end

        let query = Span::new(500, 800);
        let hits: Vec<_> = sched.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        // Assignment ending exactly at query.start is NOT overlapping (half-open)
        let mut sched = ResourceSchedule::new(Ulid::new(), Span::new(0, 100_000));
        sched.insert(assignment(100, 200));
        let query = Span::new(200, 300);
        assert!(sched.overlapping(&query).next().is_none());
    }

    #[test]
    fn overlapping_large_span_covering_query() {
        let mut sched = ResourceSchedule::new(Ulid::new(), Span::new(0, 100_000));
        sched.insert(assignment(0, 10_000));
        let query = Span::new(500, 600);
        let hits: Vec<_> = sched.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn overlapping_empty_schedule() {
        let sched = ResourceSchedule::new(Ulid::new(), Span::new(0, 100_000));
        assert!(sched.overlapping(&Span::new(0, 1000)).next().is_none());
    }

    #[test]
    fn overlapping_single_ms_overlap() {
        let mut sched = ResourceSchedule::new(Ulid::new(), Span::new(0, 100_000));
        // [100, 201) overlaps query [200, 300) by exactly 1ms
        sched.insert(assignment(100, 201));
        let query = Span::new(200, 300);
        assert_eq!(sched.overlapping(&query).count(), 1);
    }

    #[test]
    fn resource_accessors() {
        let staff = Resource {
            id: Ulid::new(),
            window: Span::new(0, 1000),
            detail: ResourceDetail::Staff {
                name: "Ana Petrov".into(),
                role: "rigger".into(),
                contact: None,
            },
        };
        assert_eq!(staff.kind(), ResourceKind::Staff);
        assert_eq!(staff.name(), "Ana Petrov");
        assert_eq!(staff.category(), "rigger");

        let gear = Resource {
            id: Ulid::new(),
            window: Span::new(0, 1000),
            detail: ResourceDetail::Equipment {
                name: "Projector 4K #2".into(),
                class: "projector".into(),
                notes: Some("HDMI only".into()),
            },
        };
        assert_eq!(gear.kind(), ResourceKind::Equipment);
        assert_eq!(gear.category(), "projector");
        assert_eq!(gear.kind().label(), "equipment");
    }

    #[test]
    fn change_serialization_roundtrip() {
        let change = Change::Assigned {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            event_id: Ulid::new(),
            span: Span::new(1000, 2000),
        };
        let json = serde_json::to_string(&change).unwrap();
        let decoded: Change = serde_json::from_str(&json).unwrap();
        assert_eq!(change, decoded);
    }
}
