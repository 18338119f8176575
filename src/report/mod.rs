mod builtin;
mod error;
mod schema;

pub use builtin::{DaySheet, EquipmentManifest, SiteSummary, StaffRoster};
pub use error::QueryError;
pub use schema::{EntityKind, Operand, Predicate, QuerySpec, Row, fields_for};

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::engine::{Engine, Snapshot};
use crate::limits::MAX_REPORT_MODULES;
use crate::observability::{REPORT_DURATION_SECONDS, REPORT_RUNS_TOTAL, SNAPSHOT_CACHE_HITS_TOTAL};

/// Named values supplied per run, referenced from filters via
/// [`Operand::Param`].
pub type Params = serde_json::Map<String, Value>;

/// A pluggable report: a declarative query plus a presentation step.
/// Modules never touch the engine; they see only the rows their own query
/// produced.
pub trait ReportModule: Send + Sync {
    /// Stable identifier used for registration and run calls.
    fn id(&self) -> &str;
    /// Human-readable title for listings.
    fn title(&self) -> &str;
    /// What this module reads.
    fn query(&self) -> QuerySpec;
    /// Shape the materialized rows into the final output.
    fn present(&self, rows: Vec<Row>, params: &Params) -> Result<ReportOutput, QueryError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportOutput {
    Table {
        title: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Document {
        title: String,
        body: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub id: String,
    pub title: String,
}

/// Runs registered report modules against generation-cached snapshots.
pub struct QueryEngine {
    engine: Arc<Engine>,
    modules: DashMap<String, Arc<dyn ReportModule>>,
    /// Last snapshot taken, reused while the engine generation is unchanged.
    cache: Mutex<Option<Arc<Snapshot>>>,
}

impl QueryEngine {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            modules: DashMap::new(),
            cache: Mutex::new(None),
        }
    }

    /// Register a module after validating its query against the schema.
    pub fn register(&self, module: Arc<dyn ReportModule>) -> Result<(), QueryError> {
        if self.modules.len() >= MAX_REPORT_MODULES {
            return Err(QueryError::LimitExceeded("too many report modules"));
        }
        schema::validate_spec(&module.query())?;
        let id = module.id().to_string();
        if self.modules.contains_key(&id) {
            return Err(QueryError::DuplicateModule(id));
        }
        tracing::debug!("registered report module {id}");
        self.modules.insert(id, module);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> Result<(), QueryError> {
        self.modules
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| QueryError::UnknownModule(id.to_string()))
    }

    /// Installed modules, sorted by id.
    pub fn modules(&self) -> Vec<ModuleInfo> {
        let mut out: Vec<ModuleInfo> = self
            .modules
            .iter()
            .map(|e| ModuleInfo {
                id: e.value().id().to_string(),
                title: e.value().title().to_string(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Install the stock modules: day sheet, staff roster, equipment
    /// manifest, site summary.
    pub fn register_builtins(&self) -> Result<(), QueryError> {
        self.register(Arc::new(DaySheet))?;
        self.register(Arc::new(StaffRoster))?;
        self.register(Arc::new(EquipmentManifest))?;
        self.register(Arc::new(SiteSummary))?;
        Ok(())
    }

    /// Run one module: materialize its query against the current snapshot,
    /// then let the module present the rows.
    pub async fn run(&self, module_id: &str, params: &Params) -> Result<ReportOutput, QueryError> {
        let module = self
            .modules
            .get(module_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| QueryError::UnknownModule(module_id.to_string()))?;

        let started = Instant::now();
        let snapshot = self.current_snapshot().await;
        let rows = schema::materialize(&snapshot, &module.query(), params)?;
        let output = module.present(rows, params)?;

        metrics::counter!(REPORT_RUNS_TOTAL, "module" => module_id.to_string()).increment(1);
        metrics::histogram!(REPORT_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(output)
    }

    async fn current_snapshot(&self) -> Arc<Snapshot> {
        let mut cache = self.cache.lock().await;
        if let Some(snap) = cache.as_ref()
            && snap.generation == self.engine.generation() {
                metrics::counter!(SNAPSHOT_CACHE_HITS_TOTAL).increment(1);
                return snap.clone();
            }
        let fresh = Arc::new(self.engine.snapshot().await);
        *cache = Some(fresh.clone());
        fresh
    }
}
