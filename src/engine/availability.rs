use crate::model::*;

// ── Free-window algebra ───────────────────────────────────────────

/// Free sub-spans of `query` for one schedule: the availability window
/// minus committed assignments, clamped to the query.
pub fn free_windows_in(sched: &ResourceSchedule, query: &Span) -> Vec<Span> {
    let start = sched.window.start.max(query.start);
    let end = sched.window.end.min(query.end);
    if start >= end {
        return Vec::new();
    }
    let base = [Span::new(start, end)];

    // The schedule is sorted by start, so the busy list is too.
    let busy: Vec<Span> = sched.overlapping(query).map(|a| a.span).collect();
    let busy = merge_overlapping(&busy);

    subtract_intervals(&base, &busy)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
