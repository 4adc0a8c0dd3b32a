use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

/// Interval `[start, end]`.
///
/// Both bounds are inclusive, but an interval ending at `t` and another one
/// starting at `t` are not concurrent: at equal instants a close is processed
/// before an open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn shifted(&self, by: Ms) -> Span {
        Span::new(self.start + by, self.end + by)
    }
}

/// A timestamp as it arrives from a client: integer milliseconds or an
/// ISO-8601 string. Anything else is kept so it can be reported per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeInput {
    Millis(Ms),
    Text(String),
    Other(serde_json::Value),
}

impl TimeInput {
    pub fn to_ms(&self) -> Result<Ms, String> {
        match self {
            TimeInput::Millis(ms) => Ok(*ms),
            TimeInput::Text(s) => parse_timestamp(s),
            TimeInput::Other(v) => Err(format!("expected a timestamp, got {v}")),
        }
    }
}

impl From<Ms> for TimeInput {
    fn from(ms: Ms) -> Self {
        TimeInput::Millis(ms)
    }
}

impl From<&str> for TimeInput {
    fn from(s: &str) -> Self {
        TimeInput::Text(s.to_string())
    }
}

/// RFC 3339 with offset, or a naive `YYYY-MM-DDTHH:MM[:SS[.fff]]` read as UTC.
pub fn parse_timestamp(s: &str) -> Result<Ms, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    Err(format!("not an ISO-8601 timestamp: {s:?}"))
}

/// UTC calendar date of an instant.
pub fn utc_date(ms: Ms) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}

// ── Configuration records ────────────────────────────────────────

/// Per-airfield settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirfieldSettings {
    pub name: String,
    /// Interval bounds must sit on this grid (minutes since the epoch).
    pub granularity_minutes: u32,
    pub max_concurrent_flights: u32,
}

impl AirfieldSettings {
    /// Reject settings the validator cannot work with.
    pub fn check(&self) -> Result<(), &'static str> {
        use crate::limits::*;
        if self.name.trim().is_empty() {
            return Err("airfield name must not be empty");
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err("airfield name too long");
        }
        if self.granularity_minutes == 0 || self.granularity_minutes > MAX_GRANULARITY_MINUTES {
            return Err("granularity must be between 1 and 1440 minutes");
        }
        if self.max_concurrent_flights == 0 || self.max_concurrent_flights > MAX_CONCURRENT_FLIGHTS {
            return Err("max concurrent flights must be between 1 and 10000");
        }
        Ok(())
    }
}

/// Global booking window: reservations must start within
/// `[now + days_to_start, now + max_days_in_future]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingWindow {
    pub days_to_start: u32,
    pub max_days_in_future: u32,
}

impl Default for BookingWindow {
    fn default() -> Self {
        Self {
            days_to_start: 0,
            max_days_in_future: 90,
        }
    }
}

impl BookingWindow {
    pub fn check(&self) -> Result<(), &'static str> {
        if self.max_days_in_future > crate::limits::MAX_BOOKING_DAYS {
            return Err("booking horizon too far");
        }
        if self.days_to_start > self.max_days_in_future {
            return Err("days_to_start must not exceed max_days_in_future");
        }
        Ok(())
    }

    /// Earliest and latest admissible reservation start relative to `now`.
    pub fn horizon(&self, now: Ms) -> Span {
        Span::new(
            now + self.days_to_start as Ms * DAY_MS,
            now + self.max_days_in_future as Ms * DAY_MS,
        )
    }
}

// ── Intervals ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeslotKind {
    /// Reservations may be placed inside.
    Available,
    /// Administratively closed.
    Blocked,
}

impl TimeslotKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "available" => Some(TimeslotKind::Available),
            "blocked" => Some(TimeslotKind::Blocked),
            _ => None,
        }
    }
}

/// Recurrence of a timeslot on selected weekdays until `end` (inclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub end: NaiveDate,
    pub name: String,
    /// Monday first.
    pub days: [bool; 7],
}

impl Period {
    pub fn selects(&self, date: NaiveDate) -> bool {
        self.days[date.weekday().num_days_from_monday() as usize]
    }

    /// `first` followed by a copy on every selected weekday after it, up to and
    /// including `self.end`. `None` if that would exceed `limit` spans.
    pub fn occurrences(&self, first: Span, limit: usize) -> Option<Vec<Span>> {
        let mut spans = vec![first];
        let Some(mut date) = utc_date(first.start) else {
            return Some(spans);
        };
        let mut offset: Ms = 0;
        loop {
            date = date.succ_opt()?;
            offset += DAY_MS;
            if date > self.end {
                break;
            }
            if self.selects(date) {
                if spans.len() >= limit {
                    return None;
                }
                spans.push(first.shifted(offset));
            }
        }
        Some(spans)
    }
}

pub trait Scheduled {
    fn id(&self) -> Ulid;
    fn span(&self) -> Span;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeslot {
    pub id: Ulid,
    pub airfield_id: Ulid,
    pub span: Span,
    pub kind: TimeslotKind,
    pub info: Option<String>,
}

impl Scheduled for Timeslot {
    fn id(&self) -> Ulid {
        self.id
    }

    fn span(&self) -> Span {
        self.span
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub airfield_id: Ulid,
    pub span: Span,
    pub aircraft_id: String,
    pub phone: String,
    pub info: Option<String>,
}

impl Scheduled for Reservation {
    fn id(&self) -> Ulid {
        self.id
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// Insert keeping the list sorted by `span.start`.
fn insert_sorted<T: Scheduled>(items: &mut Vec<T>, item: T) {
    let pos = items.partition_point(|i| i.span().start <= item.span().start);
    items.insert(pos, item);
}

fn remove_by_id<T: Scheduled>(items: &mut Vec<T>, id: Ulid) -> Option<T> {
    let pos = items.iter().position(|i| i.id() == id)?;
    Some(items.remove(pos))
}

/// Items whose span overlaps `query`; items starting at or after `query.end`
/// are skipped by binary search.
fn overlapping<'a, T: Scheduled>(items: &'a [T], query: &Span) -> impl Iterator<Item = &'a T> {
    let right_bound = items.partition_point(|i| i.span().start < query.end);
    let query_start = query.start;
    items[..right_bound]
        .iter()
        .filter(move |i| i.span().end > query_start)
}

/// Everything the engine holds for one airfield.
#[derive(Debug, Clone)]
pub struct AirfieldState {
    pub id: Ulid,
    pub settings: AirfieldSettings,
    /// Sorted by `span.start`.
    pub timeslots: Vec<Timeslot>,
    /// Sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl AirfieldState {
    pub fn new(id: Ulid, settings: AirfieldSettings) -> Self {
        Self {
            id,
            settings,
            timeslots: Vec::new(),
            reservations: Vec::new(),
        }
    }

    pub fn interval_count(&self) -> usize {
        self.timeslots.len() + self.reservations.len()
    }

    pub fn insert_timeslot(&mut self, timeslot: Timeslot) {
        insert_sorted(&mut self.timeslots, timeslot);
    }

    pub fn remove_timeslot(&mut self, id: Ulid) -> Option<Timeslot> {
        remove_by_id(&mut self.timeslots, id)
    }

    pub fn timeslot(&self, id: Ulid) -> Option<&Timeslot> {
        self.timeslots.iter().find(|t| t.id == id)
    }

    pub fn insert_reservation(&mut self, reservation: Reservation) {
        insert_sorted(&mut self.reservations, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        remove_by_id(&mut self.reservations, id)
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn timeslots_overlapping(&self, query: &Span) -> impl Iterator<Item = &Timeslot> {
        overlapping(&self.timeslots, query)
    }

    pub fn reservations_overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        overlapping(&self.reservations, query)
    }
}

/// The event types, flat. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AirfieldCreated {
        id: Ulid,
        settings: AirfieldSettings,
    },
    AirfieldUpdated {
        id: Ulid,
        settings: AirfieldSettings,
    },
    AirfieldDeleted {
        id: Ulid,
    },
    BookingWindowSet {
        window: BookingWindow,
    },
    TimeslotAdded {
        id: Ulid,
        airfield_id: Ulid,
        span: Span,
        kind: TimeslotKind,
        info: Option<String>,
    },
    TimeslotUpdated {
        id: Ulid,
        airfield_id: Ulid,
        span: Span,
        kind: TimeslotKind,
        info: Option<String>,
    },
    TimeslotRemoved {
        id: Ulid,
        airfield_id: Ulid,
    },
    ReservationPlaced {
        id: Ulid,
        airfield_id: Ulid,
        span: Span,
        aircraft_id: String,
        phone: String,
        info: Option<String>,
    },
    ReservationUpdated {
        id: Ulid,
        airfield_id: Ulid,
        span: Span,
        aircraft_id: String,
        phone: String,
        info: Option<String>,
    },
    ReservationCancelled {
        id: Ulid,
        airfield_id: Ulid,
    },
}

impl Event {
    /// The airfield an event belongs to, for airfield-scoped events.
    pub fn airfield_id(&self) -> Option<Ulid> {
        match self {
            Event::AirfieldUpdated { id, .. } => Some(*id),
            Event::TimeslotAdded { airfield_id, .. }
            | Event::TimeslotUpdated { airfield_id, .. }
            | Event::TimeslotRemoved { airfield_id, .. }
            | Event::ReservationPlaced { airfield_id, .. }
            | Event::ReservationUpdated { airfield_id, .. }
            | Event::ReservationCancelled { airfield_id, .. } => Some(*airfield_id),
            Event::AirfieldCreated { .. }
            | Event::AirfieldDeleted { .. }
            | Event::BookingWindowSet { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AirfieldInfo {
    pub id: Ulid,
    #[serde(flatten)]
    pub settings: AirfieldSettings,
    pub timeslots: usize,
    pub reservations: usize,
}
