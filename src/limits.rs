//! Defensive caps enforced at mutation and query boundaries.

use crate::model::Ms;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// Matches the 48-bit timestamp ceiling of ULIDs.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 1 << 48;

/// Longest single span (10 years).
pub const MAX_SPAN_DURATION_MS: Ms = 10 * 365 * 24 * 3_600_000;

/// Widest free-window probe (2 years).
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 365 * 24 * 3_600_000;

pub const MAX_NAME_LEN: usize = 256;
/// Addresses, notes, contact strings, meta values.
pub const MAX_TEXT_LEN: usize = 4096;

pub const MAX_SITES: usize = 1_000;
pub const MAX_ROOMS_PER_SITE: usize = 1_000;
pub const MAX_EVENTS: usize = 100_000;
pub const MAX_RESOURCES: usize = 100_000;
pub const MAX_ASSIGNMENTS_PER_RESOURCE: usize = 10_000;
pub const MAX_BATCH_SIZE: usize = 1_000;
pub const MAX_META_ENTRIES: usize = 1_000;

pub const MAX_REPORT_MODULES: usize = 256;

/// Snapshot copies are retried when a mutation lands mid-copy.
pub const MAX_SNAPSHOT_RETRIES: usize = 4;
