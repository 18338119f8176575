use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::Validation("span start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("name must not be empty"));
    }
    if name.len() > crate::limits::MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_text(text: Option<&str>, what: &'static str) -> Result<(), EngineError> {
    if let Some(t) = text
        && t.len() > crate::limits::MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded(what));
        }
    Ok(())
}

pub(crate) fn validate_detail(detail: &ResourceDetail) -> Result<(), EngineError> {
    match detail {
        ResourceDetail::Staff {
            name,
            role,
            contact,
        } => {
            validate_name(name)?;
            validate_name(role)?;
            validate_text(contact.as_deref(), "contact too long")
        }
        ResourceDetail::Equipment { name, class, notes } => {
            validate_name(name)?;
            validate_name(class)?;
            validate_text(notes.as_deref(), "notes too long")
        }
    }
}

/// The span must lie inside the schedule's availability window.
pub(crate) fn check_window(sched: &ResourceSchedule, span: &Span) -> Result<(), EngineError> {
    if !sched.window.contains_span(span) {
        return Err(EngineError::OutsideWindow {
            resource_id: sched.resource_id,
            window: sched.window,
        });
    }
    Ok(())
}

/// Collect every committed assignment colliding with `span`, with the exact
/// overlapping sub-interval. `skip` excludes one assignment, used when an
/// event is being rescheduled and its own entry must not count against it.
pub(crate) fn find_conflicts(
    sched: &ResourceSchedule,
    span: &Span,
    skip: Option<Ulid>,
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for a in sched.overlapping(span) {
        if skip.is_some_and(|id| id == a.id) {
            continue;
        }
        conflicts.push(Conflict {
            assignment_id: a.id,
            event_id: a.event_id,
            overlap: Span::new(a.span.start.max(span.start), a.span.end.min(span.end)),
        });
    }
    conflicts
}

/// Probe-then-fail: the full collision list when the span is occupied.
pub(crate) fn check_no_conflict(sched: &ResourceSchedule, span: &Span) -> Result<(), EngineError> {
    let conflicts = find_conflicts(sched, span, None);
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Conflict(conflicts))
    }
}
