use crate::model::Change;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: mutations committed. Labels: op.
pub const MUTATIONS_TOTAL: &str = "callsheet_mutations_total";

/// Counter: assignments committed.
pub const ASSIGNMENTS_TOTAL: &str = "callsheet_assignments_total";

/// Counter: assignment attempts rejected with a conflict.
pub const CONFLICTS_TOTAL: &str = "callsheet_conflicts_total";

/// Counter: report runs. Labels: module.
pub const REPORT_RUNS_TOTAL: &str = "callsheet_report_runs_total";

/// Histogram: report execution latency in seconds.
pub const REPORT_DURATION_SECONDS: &str = "callsheet_report_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: snapshot copy duration in seconds.
pub const SNAPSHOT_BUILD_SECONDS: &str = "callsheet_snapshot_build_seconds";

/// Counter: report runs served from the cached snapshot.
pub const SNAPSHOT_CACHE_HITS_TOTAL: &str = "callsheet_snapshot_cache_hits_total";

/// Counter: import records processed. Labels: entity, status.
pub const IMPORT_RECORDS_TOTAL: &str = "callsheet_import_records_total";

/// Map a Change variant to a short label for metrics.
pub fn change_label(change: &Change) -> &'static str {
    match change {
        Change::SiteCreated { .. } => "site_created",
        Change::SiteUpdated { .. } => "site_updated",
        Change::SiteDeleted { .. } => "site_deleted",
        Change::RoomCreated { .. } => "room_created",
        Change::RoomUpdated { .. } => "room_updated",
        Change::RoomDeleted { .. } => "room_deleted",
        Change::EventCreated { .. } => "event_created",
        Change::EventUpdated { .. } => "event_updated",
        Change::EventDeleted { .. } => "event_deleted",
        Change::ResourceCreated { .. } => "resource_created",
        Change::ResourceUpdated { .. } => "resource_updated",
        Change::ResourceDeleted { .. } => "resource_deleted",
        Change::Assigned { .. } => "assigned",
        Change::Unassigned { .. } => "unassigned",
        Change::MetaSet { .. } => "meta_set",
    }
}
