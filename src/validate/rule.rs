use crate::model::{DAY_MS, MINUTE_MS, Ms, Span};
use crate::sweep::count_most_concurrent;

use super::{Subject, Violation, ViolationKind, field};

/// Which bound of an interval a rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Start,
    End,
}

impl Bound {
    pub fn field(self) -> &'static str {
        match self {
            Bound::Start => field::START,
            Bound::End => field::END,
        }
    }
}

/// A named admissibility predicate.
///
/// Rules whose inputs failed coercion are skipped; the coercion step has
/// already reported those fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Bound sits on the airfield's minute grid.
    GranularityAlignment { bound: Bound, granularity_minutes: u32 },
    /// Bound is not before `now`. The start passes unconditionally when
    /// `ignore_start` is set.
    NotInPast { bound: Bound, ignore_start: bool },
    WithinFutureHorizon { bound: Bound, max_days_in_future: u32 },
    /// Booking lead time.
    NotTooSoon { bound: Bound, days_to_start: u32 },
    StartBeforeEnd,
    NonEmptyString { field: &'static str },
    /// Interval fits entirely inside at least one of `parents`.
    ContainedWithin { parents: Vec<Span> },
    /// Adding the interval to `siblings` keeps the peak at or below the bound.
    ConcurrencyBound { max_concurrent: u32, siblings: Vec<Span> },
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::GranularityAlignment { .. } => "granularity_alignment",
            Rule::NotInPast { .. } => "not_in_past",
            Rule::WithinFutureHorizon { .. } => "within_future_horizon",
            Rule::NotTooSoon { .. } => "not_too_soon",
            Rule::StartBeforeEnd => "start_before_end",
            Rule::NonEmptyString { .. } => "non_empty_string",
            Rule::ContainedWithin { .. } => "contained_within",
            Rule::ConcurrencyBound { .. } => "concurrency_bound",
        }
    }

    pub fn kind(&self) -> ViolationKind {
        match self {
            Rule::GranularityAlignment { .. } => ViolationKind::Misaligned,
            Rule::NotInPast { .. } => ViolationKind::InPast,
            Rule::WithinFutureHorizon { .. } => ViolationKind::BeyondHorizon,
            Rule::NotTooSoon { .. } => ViolationKind::TooSoon,
            Rule::StartBeforeEnd => ViolationKind::EmptyInterval,
            Rule::NonEmptyString { .. } => ViolationKind::Required,
            Rule::ContainedWithin { .. } => ViolationKind::NotContained,
            Rule::ConcurrencyBound { .. } => ViolationKind::CapacityExceeded,
        }
    }

    fn fail(&self, field: &str, message: impl Into<String>) -> Result<(), Violation> {
        Err(Violation::new(field, self.name(), self.kind(), message))
    }

    /// Evaluate against `subject` at time `now`.
    ///
    /// Panics on a zero granularity: that is a configuration bug, not bad input.
    pub fn check(&self, subject: &dyn Subject, now: Ms) -> Result<(), Violation> {
        match self {
            Rule::GranularityAlignment { bound, granularity_minutes } => {
                assert!(*granularity_minutes > 0, "granularity must be at least one minute");
                let Some(t) = subject.instant(*bound) else { return Ok(()) };
                let grid = *granularity_minutes as Ms * MINUTE_MS;
                if t.rem_euclid(grid) != 0 {
                    return self.fail(
                        bound.field(),
                        format!("must be a multiple of {granularity_minutes} minutes"),
                    );
                }
                Ok(())
            }
            Rule::NotInPast { bound, ignore_start } => {
                if *ignore_start && *bound == Bound::Start {
                    return Ok(());
                }
                let Some(t) = subject.instant(*bound) else { return Ok(()) };
                if t < now {
                    return self.fail(bound.field(), "must not be in the past");
                }
                Ok(())
            }
            Rule::WithinFutureHorizon { bound, max_days_in_future } => {
                let Some(t) = subject.instant(*bound) else { return Ok(()) };
                if t > now + *max_days_in_future as Ms * DAY_MS {
                    return self.fail(
                        bound.field(),
                        format!("must be at most {max_days_in_future} days in the future"),
                    );
                }
                Ok(())
            }
            Rule::NotTooSoon { bound, days_to_start } => {
                let Some(t) = subject.instant(*bound) else { return Ok(()) };
                if t < now + *days_to_start as Ms * DAY_MS {
                    return self.fail(
                        bound.field(),
                        format!("must be at least {days_to_start} days from now"),
                    );
                }
                Ok(())
            }
            Rule::StartBeforeEnd => {
                let (Some(start), Some(end)) =
                    (subject.instant(Bound::Start), subject.instant(Bound::End))
                else {
                    return Ok(());
                };
                if start >= end {
                    return self.fail(field::END, "start must be before end");
                }
                Ok(())
            }
            Rule::NonEmptyString { field } => {
                match subject.text(field) {
                    Some(s) if !s.trim().is_empty() => Ok(()),
                    _ => self.fail(field, format!("{field} is required")),
                }
            }
            Rule::ContainedWithin { parents } => {
                let Some(span) = proper_span(subject) else { return Ok(()) };
                if parents.iter().any(|p| p.contains_span(&span)) {
                    return Ok(());
                }
                self.fail(field::INTERVAL, "must lie within an available timeslot")
            }
            Rule::ConcurrencyBound { max_concurrent, siblings } => {
                let Some(span) = proper_span(subject) else { return Ok(()) };
                let mut all = Vec::with_capacity(siblings.len() + 1);
                all.extend_from_slice(siblings);
                all.push(span);
                let peak = count_most_concurrent(&all);
                if peak > *max_concurrent as usize {
                    return self.fail(
                        field::INTERVAL,
                        format!("at most {max_concurrent} at the same time, this would make {peak}"),
                    );
                }
                Ok(())
            }
        }
    }
}

/// The subject's interval, when both bounds coerced and start < end.
fn proper_span(subject: &dyn Subject) -> Option<Span> {
    let start = subject.instant(Bound::Start)?;
    let end = subject.instant(Bound::End)?;
    (start < end).then(|| Span::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;
    const NOW: Ms = 1_676_188_800_000; // 2023-02-12T08:00Z

    struct Text(&'static str, Option<&'static str>);

    impl Subject for Text {
        fn instant(&self, _bound: Bound) -> Option<Ms> {
            None
        }

        fn text(&self, field: &str) -> Option<&str> {
            if field == self.0 { self.1 } else { None }
        }
    }

    fn at(start: Ms) -> Span {
        Span { start, end: start + H }
    }

    #[test]
    fn granularity_alignment() {
        let rule = Rule::GranularityAlignment { bound: Bound::Start, granularity_minutes: 20 };
        let day = 1_676_160_000_000; // 2023-02-12T00:00Z
        assert!(rule.check(&at(day + 8 * H + 7 * M), NOW).is_err());
        assert!(rule.check(&at(day + 8 * H + 20 * M), NOW).is_ok());
        let v = rule.check(&at(day + 8 * H + 7 * M), NOW).unwrap_err();
        assert_eq!(v.field, "start");
        assert_eq!(v.kind, ViolationKind::Misaligned);
    }

    #[test]
    fn granularity_checks_negative_timestamps_on_the_grid() {
        let rule = Rule::GranularityAlignment { bound: Bound::Start, granularity_minutes: 15 };
        assert!(rule.check(&at(-15 * M), NOW).is_ok());
        assert!(rule.check(&at(-7 * M), NOW).is_err());
    }

    #[test]
    #[should_panic(expected = "granularity")]
    fn zero_granularity_panics() {
        let rule = Rule::GranularityAlignment { bound: Bound::Start, granularity_minutes: 0 };
        let _ = rule.check(&at(0), NOW);
    }

    #[test]
    fn not_in_past() {
        let rule = Rule::NotInPast { bound: Bound::Start, ignore_start: false };
        assert!(rule.check(&at(NOW - M), NOW).is_err());
        assert!(rule.check(&at(NOW), NOW).is_ok());

        let ignored = Rule::NotInPast { bound: Bound::Start, ignore_start: true };
        assert!(ignored.check(&at(NOW - H), NOW).is_ok());

        // ignore_start never exempts the end
        let end = Rule::NotInPast { bound: Bound::End, ignore_start: true };
        assert!(end.check(&Span { start: NOW - 3 * H, end: NOW - H }, NOW).is_err());
    }

    #[test]
    fn booking_horizon() {
        let soon = Rule::NotTooSoon { bound: Bound::Start, days_to_start: 1 };
        let far = Rule::WithinFutureHorizon { bound: Bound::Start, max_days_in_future: 7 };

        let same_day = at(1_676_192_400_000); // 2023-02-12T09:00Z
        let too_far = at(1_677_315_600_000); // 2023-02-25T09:00Z
        let fine = at(1_676_365_200_000); // 2023-02-14T09:00Z

        assert_eq!(soon.check(&same_day, NOW).unwrap_err().kind, ViolationKind::TooSoon);
        assert!(far.check(&same_day, NOW).is_ok());

        assert!(soon.check(&too_far, NOW).is_ok());
        assert_eq!(far.check(&too_far, NOW).unwrap_err().kind, ViolationKind::BeyondHorizon);

        assert!(soon.check(&fine, NOW).is_ok());
        assert!(far.check(&fine, NOW).is_ok());
    }

    #[test]
    fn start_before_end() {
        let rule = Rule::StartBeforeEnd;
        assert!(rule.check(&Span::new(H, 2 * H), NOW).is_ok());
        assert!(rule.check(&Span::new(H, H), NOW).is_err());
        assert!(rule.check(&Span { start: 2 * H, end: H }, NOW).is_err());
    }

    #[test]
    fn non_empty_string() {
        let rule = Rule::NonEmptyString { field: "phone" };
        assert!(rule.check(&Text("phone", Some("+49 611 1234")), NOW).is_ok());
        assert!(rule.check(&Text("phone", Some("   ")), NOW).is_err());
        assert!(rule.check(&Text("phone", None), NOW).is_err());
        assert_eq!(rule.check(&Text("phone", None), NOW).unwrap_err().field, "phone");
    }

    #[test]
    fn contained_within() {
        let slot = Span::new(9 * H, 10 * H);
        let rule = Rule::ContainedWithin { parents: vec![slot] };
        assert!(rule.check(&Span::new(9 * H + 10 * M, 9 * H + 50 * M), NOW).is_ok());
        assert!(rule.check(&slot, NOW).is_ok());
        assert_eq!(
            rule.check(&Span::new(8 * H + 50 * M, 9 * H + 50 * M), NOW).unwrap_err().kind,
            ViolationKind::NotContained
        );
        let none = Rule::ContainedWithin { parents: vec![] };
        assert!(none.check(&slot, NOW).is_err());
    }

    #[test]
    fn concurrency_bound_counts_candidate() {
        let rule = Rule::ConcurrencyBound {
            max_concurrent: 2,
            siblings: vec![Span::new(10 * H, 11 * H), Span::new(9 * H, 10 * H + 30 * M)],
        };
        let v = rule.check(&Span::new(10 * H, 10 * H + 30 * M), NOW).unwrap_err();
        assert_eq!(v.kind, ViolationKind::CapacityExceeded);
        assert!(v.message.contains("would make 3"));

        // Back-to-back with both siblings is fine.
        assert!(rule.check(&Span::new(11 * H, 12 * H), NOW).is_ok());
    }

    #[test]
    fn span_rules_skip_inverted_intervals() {
        let contained = Rule::ContainedWithin { parents: vec![] };
        let bound = Rule::ConcurrencyBound { max_concurrent: 0, siblings: vec![] };
        let inverted = Span { start: 2 * H, end: H };
        assert!(contained.check(&inverted, NOW).is_ok());
        assert!(bound.check(&inverted, NOW).is_ok());
    }
}
