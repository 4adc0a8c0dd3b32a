use crate::model::*;
use crate::sweep::compute_saturated_spans;

// ── Bookable time ────────────────────────────────────────────────

/// Free time on an airfield inside `query`.
///
/// Available timeslots (clamped to the query) minus blocked timeslots minus
/// every range where reservations already reach `max_concurrent_flights`.
/// Adjacent available timeslots stay separate pieces: a reservation has to
/// fit inside one of them.
pub fn bookable(airfield: &AirfieldState, query: &Span) -> Vec<Span> {
    let clamp = |s: &Span| Span::new(s.start.max(query.start), s.end.min(query.end));

    let mut open: Vec<Span> = Vec::new();
    let mut blocked: Vec<Span> = Vec::new();
    for slot in airfield.timeslots_overlapping(query) {
        match slot.kind {
            TimeslotKind::Available => open.push(clamp(&slot.span)),
            TimeslotKind::Blocked => blocked.push(clamp(&slot.span)),
        }
    }
    if open.is_empty() {
        return open;
    }
    open.sort_by_key(|s| s.start);

    if !blocked.is_empty() {
        blocked.sort_by_key(|s| s.start);
        open = subtract_intervals(&open, &merge_overlapping(&blocked));
    }

    let booked: Vec<Span> = airfield
        .reservations_overlapping(query)
        .map(|r| r.span)
        .collect();
    let saturated = compute_saturated_spans(&booked, airfield.settings.max_concurrent_flights);
    if !saturated.is_empty() {
        open = subtract_intervals(&open, &saturated);
    }

    open
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
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
