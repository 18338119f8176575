use ulid::Ulid;

use crate::model::*;

use super::conflict::{find_conflicts, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Every collision that committing `event_id` onto `resource_id` would
    /// produce right now. Empty means the assignment would go through.
    pub async fn explain(
        &self,
        resource_id: Ulid,
        event_id: Ulid,
    ) -> Result<Vec<Conflict>, EngineError> {
        let span = self
            .events
            .get(&event_id)
            .map(|e| e.value().span)
            .ok_or(EngineError::NotFound(event_id))?;
        let sched = self
            .get_schedule(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = sched.read().await;
        Ok(find_conflicts(&guard, &span, None))
    }

    /// Ranked alternatives whose availability window covers `window`.
    /// Conflict-free candidates sort first, then matching category, then
    /// soonest window start; ties break on resource id for a stable order.
    pub async fn suggest_alternatives(
        &self,
        kind: ResourceKind,
        category: &str,
        window: Span,
        limit: Option<usize>,
    ) -> Result<Vec<Candidate>, EngineError> {
        validate_span(&window)?;

        // Collect probes before locking so no shard guard is held across an await.
        let mut probes: Vec<(Ulid, String, String, Ms)> = Vec::new();
        for entry in self.resources.iter() {
            let r = entry.value();
            if r.kind() != kind || !r.window.contains_span(&window) {
                continue;
            }
            probes.push((
                r.id,
                r.name().to_string(),
                r.category().to_string(),
                r.window.start,
            ));
        }

        let mut candidates = Vec::with_capacity(probes.len());
        for (resource_id, name, category_found, window_start) in probes {
            let sched = match self.get_schedule(&resource_id) {
                Some(s) => s,
                None => continue,
            };
            let guard = sched.read().await;
            let conflicts = find_conflicts(&guard, &window, None);
            drop(guard);
            let category_match = category_found.eq_ignore_ascii_case(category);
            candidates.push(Candidate {
                resource_id,
                name,
                category: category_found,
                category_match,
                window_start,
                conflicts,
            });
        }

        candidates.sort_by_key(|c| {
            (
                !c.conflicts.is_empty(),
                !c.category_match,
                c.window_start,
                c.resource_id,
            )
        });
        if let Some(n) = limit {
            candidates.truncate(n);
        }
        Ok(candidates)
    }
}
