//! callsheet: an in-memory assignment and conflict-resolution engine for
//! conference logistics, with a modular report query layer on top.
//!
//! The [`engine::Engine`] owns venue topology (sites, rooms, events), the
//! resource catalog (staff, equipment) and the assignment ledger, and
//! rejects any booking that would double-book a resource or fall outside
//! its availability window. [`report::QueryEngine`] runs registered report
//! modules against consistent point-in-time snapshots of that state.
//!
//! Everything lives in process memory. Parsing portable data files is the
//! loader's job; it hands deserialized records to [`Engine::import`].

pub mod engine;
pub mod import;
mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod report;

pub use engine::{Engine, EngineError, Snapshot};
pub use import::{ImportBatch, ImportReport};
pub use notify::ChangeHub;
pub use report::{QueryEngine, QueryError, ReportModule, ReportOutput};
