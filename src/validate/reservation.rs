use serde::{Deserialize, Serialize};

use crate::model::{BookingWindow, Ms, Span, TimeInput};

use super::{Bound, Collector, Mode, Pipeline, Rule, Subject, ValidationFailure, coerce_instant, field};

/// Reservation fields as submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservationInput {
    #[serde(default)]
    pub start: Option<TimeInput>,
    #[serde(default)]
    pub end: Option<TimeInput>,
    #[serde(default)]
    pub aircraft_id: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
}

impl ReservationInput {
    /// Interval covered by the input if both bounds parse, ordered.
    pub fn span_hint(&self) -> Option<Span> {
        let a = self.start.as_ref()?.to_ms().ok()?;
        let b = self.end.as_ref()?.to_ms().ok()?;
        Some(Span::new(a.min(b), a.max(b)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidReservation {
    pub span: Span,
    pub aircraft_id: String,
    pub phone: String,
    pub info: Option<String>,
}

/// Everything a reservation is judged against besides its own fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationContext {
    pub granularity_minutes: u32,
    pub max_concurrent_flights: u32,
    pub window: BookingWindow,
    /// Available timeslots the reservation may sit in.
    pub timeslots: Vec<Span>,
    /// The airfield's other reservations.
    pub siblings: Vec<Span>,
    /// Set when editing a reservation that has already started.
    pub ignore_start: bool,
}

pub fn reservation_pipeline(ctx: &ReservationContext) -> Pipeline {
    let mut p = Pipeline::new()
        .rule(Rule::StartBeforeEnd)
        .rule(Rule::GranularityAlignment {
            bound: Bound::Start,
            granularity_minutes: ctx.granularity_minutes,
        })
        .rule(Rule::GranularityAlignment {
            bound: Bound::End,
            granularity_minutes: ctx.granularity_minutes,
        })
        .rule(Rule::NotInPast {
            bound: Bound::Start,
            ignore_start: ctx.ignore_start,
        })
        .rule(Rule::NotInPast {
            bound: Bound::End,
            ignore_start: ctx.ignore_start,
        });
    // The lead time only applies to starts that are still ahead of us.
    if !ctx.ignore_start {
        p.push(Rule::NotTooSoon {
            bound: Bound::Start,
            days_to_start: ctx.window.days_to_start,
        });
    }
    p.rule(Rule::WithinFutureHorizon {
        bound: Bound::Start,
        max_days_in_future: ctx.window.max_days_in_future,
    })
    .rule(Rule::NonEmptyString { field: field::AIRCRAFT_ID })
    .rule(Rule::NonEmptyString { field: field::PHONE })
    .rule(Rule::ContainedWithin {
        parents: ctx.timeslots.clone(),
    })
    .rule(Rule::ConcurrencyBound {
        max_concurrent: ctx.max_concurrent_flights,
        siblings: ctx.siblings.clone(),
    })
}

struct Draft<'a> {
    start: Option<Ms>,
    end: Option<Ms>,
    input: &'a ReservationInput,
}

impl Subject for Draft<'_> {
    fn instant(&self, bound: Bound) -> Option<Ms> {
        match bound {
            Bound::Start => self.start,
            Bound::End => self.end,
        }
    }

    fn text(&self, name: &str) -> Option<&str> {
        match name {
            field::AIRCRAFT_ID => self.input.aircraft_id.as_deref(),
            field::PHONE => self.input.phone.as_deref(),
            _ => None,
        }
    }
}

pub fn validate_reservation(
    input: &ReservationInput,
    ctx: &ReservationContext,
    now: Ms,
    mode: Mode,
) -> Result<ValidReservation, ValidationFailure> {
    let mut c = Collector::new(mode);
    let start = coerce_instant(input.start.as_ref(), Bound::Start, &mut c);
    let end = coerce_instant(input.end.as_ref(), Bound::End, &mut c);
    let draft = Draft { start, end, input };
    reservation_pipeline(ctx).run_into(&draft, now, &mut c);
    let span = c.finish_with(start.zip(end).map(|(start, end)| Span::new(start, end)))?;

    Ok(ValidReservation {
        span,
        aircraft_id: trimmed(&input.aircraft_id).unwrap_or_default(),
        phone: trimmed(&input.phone).unwrap_or_default(),
        info: trimmed(&input.info),
    })
}

pub(super) fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
