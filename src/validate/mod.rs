//! Admissibility checks for reservations and timeslots.
//!
//! Raw input is coerced into typed values first; a [`Pipeline`] of [`Rule`]s
//! then runs against the coerced draft. In [`Mode::CollectAll`] every failing
//! rule is reported, in [`Mode::FailFast`] only the first one, in pipeline
//! order. The current time is always passed in by the caller.

mod reservation;
mod rule;
mod timeslot;

pub use reservation::{
    ReservationContext, ReservationInput, ValidReservation, reservation_pipeline,
    validate_reservation,
};
pub use rule::{Bound, Rule};
pub use timeslot::{
    PeriodInput, TimeslotContext, TimeslotInput, ValidTimeslot, timeslot_pipeline,
    validate_period, validate_timeslot,
};

use serde::{Deserialize, Serialize};

use crate::model::{Ms, Span, TimeInput};

/// Field paths used in violations.
pub mod field {
    pub const START: &str = "start";
    pub const END: &str = "end";
    /// Whole-interval checks (containment, concurrency).
    pub const INTERVAL: &str = "interval";
    pub const AIRCRAFT_ID: &str = "aircraft_id";
    pub const PHONE: &str = "phone";
    pub const KIND: &str = "type";
    pub const PERIOD_END: &str = "period.end";
    pub const PERIOD_NAME: &str = "period.name";
    pub const PERIOD_DAYS: &str = "period.days";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Report every violation (form feedback).
    #[default]
    CollectAll,
    /// Stop at the first violation.
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Malformed,
    Required,
    Misaligned,
    InPast,
    BeyondHorizon,
    TooSoon,
    EmptyInterval,
    NotContained,
    CapacityExceeded,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::Malformed => "malformed",
            ViolationKind::Required => "required",
            ViolationKind::Misaligned => "misaligned",
            ViolationKind::InPast => "in_past",
            ViolationKind::BeyondHorizon => "beyond_horizon",
            ViolationKind::TooSoon => "too_soon",
            ViolationKind::EmptyInterval => "empty_interval",
            ViolationKind::NotContained => "not_contained",
            ViolationKind::CapacityExceeded => "capacity_exceeded",
        }
    }
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub rule: &'static str,
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    pub fn new(field: &str, rule: &'static str, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            rule,
            kind,
            message: message.into(),
        }
    }
}

/// Ordered list of everything that failed for one input.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct ValidationFailure {
    pub violations: Vec<Violation>,
}

impl ValidationFailure {
    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }

    pub fn capacity_exceeded(&self) -> bool {
        self.has(ViolationKind::CapacityExceeded)
    }

    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }

    pub fn kinds(&self) -> Vec<ViolationKind> {
        self.violations.iter().map(|v| v.kind).collect()
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", v.field, v.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

/// A coerced draft a rule can inspect.
pub trait Subject {
    fn instant(&self, bound: Bound) -> Option<Ms>;
    fn text(&self, field: &str) -> Option<&str>;
}

impl Subject for Span {
    fn instant(&self, bound: Bound) -> Option<Ms> {
        Some(match bound {
            Bound::Start => self.start,
            Bound::End => self.end,
        })
    }

    fn text(&self, _field: &str) -> Option<&str> {
        None
    }
}

/// Accumulates violations and knows when fail-fast mode has to stop.
pub(crate) struct Collector {
    mode: Mode,
    violations: Vec<Violation>,
}

impl Collector {
    pub(crate) fn new(mode: Mode) -> Self {
        Self {
            mode,
            violations: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, violation: Violation) {
        if !self.stopped() {
            self.violations.push(violation);
        }
    }

    pub(crate) fn stopped(&self) -> bool {
        self.mode == Mode::FailFast && !self.violations.is_empty()
    }

    pub(crate) fn finish(self) -> Result<(), ValidationFailure> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationFailure {
                violations: self.violations,
            })
        }
    }

    /// Hand back the coerced `value` when nothing failed.
    ///
    /// Coercion records a violation whenever it yields `None`, so a missing
    /// value without violations only comes from a coercer that forgot to
    /// report; that surfaces as an empty failure rather than a panic.
    pub(crate) fn finish_with<T>(self, value: Option<T>) -> Result<T, ValidationFailure> {
        self.finish()?;
        value.ok_or_else(ValidationFailure::default)
    }
}

/// Parse a raw timestamp field, recording `required`/`malformed` on failure.
pub(crate) fn coerce_instant(value: Option<&TimeInput>, bound: Bound, c: &mut Collector) -> Option<Ms> {
    let name = bound.field();
    match value {
        None => {
            c.push(Violation::new(name, "parse", ViolationKind::Required, format!("{name} is required")));
            None
        }
        Some(raw) => match raw.to_ms() {
            Ok(ms) => Some(ms),
            Err(e) => {
                c.push(Violation::new(name, "parse", ViolationKind::Malformed, e));
                None
            }
        },
    }
}

/// Ordered rule list with a generic runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    rules: Vec<Rule>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn run(&self, subject: &dyn Subject, now: Ms, mode: Mode) -> Result<(), ValidationFailure> {
        let mut c = Collector::new(mode);
        self.run_into(subject, now, &mut c);
        c.finish()
    }

    pub(crate) fn run_into(&self, subject: &dyn Subject, now: Ms, c: &mut Collector) {
        for rule in &self.rules {
            if c.stopped() {
                return;
            }
            if let Err(v) = rule.check(subject, now) {
                c.push(v);
            }
        }
    }
}
