use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{Ms, Period, Span, TimeInput, TimeslotKind, parse_timestamp, utc_date};

use super::reservation::trimmed;
use super::{
    Bound, Collector, Mode, Pipeline, Rule, Subject, ValidationFailure, Violation, ViolationKind,
    coerce_instant, field,
};

/// Recurrence descriptor as submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodInput {
    /// `YYYY-MM-DD`, or a full timestamp whose UTC date is used.
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Monday first.
    #[serde(default)]
    pub days: Option<Vec<bool>>,
}

/// Timeslot fields as submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeslotInput {
    #[serde(default)]
    pub start: Option<TimeInput>,
    #[serde(default)]
    pub end: Option<TimeInput>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default)]
    pub period: Option<PeriodInput>,
}

impl TimeslotInput {
    pub fn span_hint(&self) -> Option<Span> {
        let a = self.start.as_ref()?.to_ms().ok()?;
        let b = self.end.as_ref()?.to_ms().ok()?;
        Some(Span::new(a.min(b), a.max(b)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidTimeslot {
    pub span: Span,
    pub kind: TimeslotKind,
    pub info: Option<String>,
    pub period: Option<Period>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeslotContext {
    pub granularity_minutes: u32,
    /// Other timeslots of the airfield; timeslots never overlap each other.
    pub siblings: Vec<Span>,
    pub ignore_start: bool,
}

pub fn timeslot_pipeline(ctx: &TimeslotContext) -> Pipeline {
    Pipeline::new()
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
        })
        .rule(Rule::ConcurrencyBound {
            max_concurrent: 1,
            siblings: ctx.siblings.clone(),
        })
}

struct Bounds {
    start: Option<Ms>,
    end: Option<Ms>,
}

impl Subject for Bounds {
    fn instant(&self, bound: Bound) -> Option<Ms> {
        match bound {
            Bound::Start => self.start,
            Bound::End => self.end,
        }
    }

    fn text(&self, _name: &str) -> Option<&str> {
        None
    }
}

fn coerce_kind(raw: Option<&str>, c: &mut Collector) -> Option<TimeslotKind> {
    let Some(raw) = raw else {
        c.push(Violation::new(field::KIND, "parse", ViolationKind::Required, "type is required"));
        return None;
    };
    let kind = TimeslotKind::parse(raw);
    if kind.is_none() {
        c.push(Violation::new(
            field::KIND,
            "parse",
            ViolationKind::Malformed,
            format!("type must be \"available\" or \"blocked\", got {raw:?}"),
        ));
    }
    kind
}

pub fn validate_timeslot(
    input: &TimeslotInput,
    ctx: &TimeslotContext,
    now: Ms,
    mode: Mode,
) -> Result<ValidTimeslot, ValidationFailure> {
    let mut c = Collector::new(mode);
    let start = coerce_instant(input.start.as_ref(), Bound::Start, &mut c);
    let end = coerce_instant(input.end.as_ref(), Bound::End, &mut c);
    let kind = coerce_kind(input.kind.as_deref(), &mut c);
    timeslot_pipeline(ctx).run_into(&Bounds { start, end }, now, &mut c);

    let period = match &input.period {
        Some(p) if !c.stopped() => period_into(p, start.and_then(utc_date), &mut c),
        _ => None,
    };
    let ((start, end), kind) = c.finish_with(start.zip(end).zip(kind))?;

    Ok(ValidTimeslot {
        span: Span::new(start, end),
        kind,
        info: trimmed(&input.info),
        period,
    })
}

/// Period sub-validator on its own, e.g. for a form section.
pub fn validate_period(
    input: &PeriodInput,
    first_day: Option<NaiveDate>,
    mode: Mode,
) -> Result<Period, ValidationFailure> {
    let mut c = Collector::new(mode);
    let period = period_into(input, first_day, &mut c);
    c.finish_with(period)
}

struct PeriodDraft<'a>(&'a PeriodInput);

impl Subject for PeriodDraft<'_> {
    fn instant(&self, _bound: Bound) -> Option<Ms> {
        None
    }

    fn text(&self, name: &str) -> Option<&str> {
        match name {
            field::PERIOD_NAME => self.0.name.as_deref(),
            _ => None,
        }
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(raw).ok().and_then(utc_date))
}

fn period_into(input: &PeriodInput, first_day: Option<NaiveDate>, c: &mut Collector) -> Option<Period> {
    let end = match input.end.as_deref() {
        None => {
            c.push(Violation::new(field::PERIOD_END, "parse", ViolationKind::Required, "period end is required"));
            None
        }
        Some(raw) => {
            let date = parse_date(raw);
            if date.is_none() {
                c.push(Violation::new(
                    field::PERIOD_END,
                    "parse",
                    ViolationKind::Malformed,
                    format!("not a date: {raw:?}"),
                ));
            }
            date
        }
    };

    if let (Some(end), Some(first)) = (end, first_day)
        && end < first
    {
        c.push(Violation::new(
            field::PERIOD_END,
            "period_end_after_start",
            ViolationKind::EmptyInterval,
            "period must not end before the timeslot starts",
        ));
    }

    Pipeline::new()
        .rule(Rule::NonEmptyString { field: field::PERIOD_NAME })
        .run_into(&PeriodDraft(input), 0, c);

    let days = match input.days.as_deref() {
        None => {
            c.push(Violation::new(field::PERIOD_DAYS, "parse", ViolationKind::Required, "weekdays are required"));
            None
        }
        Some(raw) => match <[bool; 7]>::try_from(raw) {
            Ok(days) if days.iter().any(|d| *d) => Some(days),
            Ok(_) => {
                c.push(Violation::new(
                    field::PERIOD_DAYS,
                    "weekdays",
                    ViolationKind::Required,
                    "select at least one weekday",
                ));
                None
            }
            Err(_) => {
                c.push(Violation::new(
                    field::PERIOD_DAYS,
                    "parse",
                    ViolationKind::Malformed,
                    format!("expected 7 weekday flags, got {}", raw.len()),
                ));
                None
            }
        },
    };

    Some(Period {
        end: end?,
        name: trimmed(&input.name)?,
        days: days?,
    })
}
