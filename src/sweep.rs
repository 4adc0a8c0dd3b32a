//! Sweep-line passes over interval start/end events.
//!
//! Events at the same instant are ordered close-before-open, so an interval
//! ending at `t` and one starting at `t` never count as concurrent.

use crate::model::{Ms, Span};

/// `(instant, delta)` pairs sorted by instant, then `-1` before `+1`.
fn sorted_events(spans: &[Span]) -> Vec<(Ms, i8)> {
    let mut events: Vec<(Ms, i8)> = Vec::with_capacity(spans.len() * 2);
    for s in spans {
        events.push((s.start, 1));
        events.push((s.end, -1));
    }
    events.sort_unstable();
    events
}

/// Maximum number of spans open at any single instant.
///
/// A zero-length span emits its close before its open and so never raises the
/// count, not even for itself.
pub fn count_most_concurrent(spans: &[Span]) -> usize {
    let mut open: i64 = 0;
    let mut most: i64 = 0;
    for (_, delta) in sorted_events(spans) {
        open += delta as i64;
        if delta > 0 {
            most = most.max(open);
        }
    }
    most as usize
}

/// Time ranges where at least `capacity` spans are open, sorted and merged.
pub fn compute_saturated_spans(spans: &[Span], capacity: u32) -> Vec<Span> {
    if spans.is_empty() || capacity == 0 {
        return Vec::new();
    }
    let capacity = capacity as i64;
    let mut result: Vec<Span> = Vec::new();
    let mut open: i64 = 0;
    let mut saturated_since: Option<Ms> = None;

    for (time, delta) in sorted_events(spans) {
        open += delta as i64;
        if open >= capacity && saturated_since.is_none() {
            saturated_since = Some(time);
        } else if open < capacity
            && let Some(start) = saturated_since.take()
            && time > start
        {
            match result.last_mut() {
                Some(last) if last.end == start => last.end = time,
                _ => result.push(Span::new(start, time)),
            }
        }
    }

    result
}
