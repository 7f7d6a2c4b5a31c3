//! Daily punch card rules: one punch-in, one punch-out, and any number of
//! non-overlapping breaks in between.

use chrono::{DateTime, Duration, Utc};
use derive_more::Display;

use crate::error::AppError;
use crate::model::student_punch::BreakSegment;

#[derive(Debug, Display, PartialEq, Eq)]
pub enum PunchError {
    #[display(fmt = "Already punched in today")]
    AlreadyPunchedIn,
    #[display(fmt = "No punch-in found for today")]
    NotPunchedIn,
    #[display(fmt = "Already punched out today")]
    AlreadyPunchedOut,
    #[display(fmt = "Punch-out cannot be earlier than punch-in")]
    PunchOutBeforePunchIn,
    #[display(fmt = "A break is already in progress")]
    BreakAlreadyOpen,
    #[display(fmt = "No break in progress")]
    NoOpenBreak,
    #[display(fmt = "Break cannot end before it starts")]
    BreakEndsBeforeStart,
}

impl From<PunchError> for AppError {
    fn from(e: PunchError) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// Mutable view of a day's punch record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PunchCard {
    pub punch_in_at: Option<DateTime<Utc>>,
    pub punch_out_at: Option<DateTime<Utc>>,
    pub breaks: Vec<BreakSegment>,
}

impl PunchCard {
    pub fn punch_in(&mut self, at: DateTime<Utc>) -> Result<(), PunchError> {
        if self.punch_in_at.is_some() {
            return Err(PunchError::AlreadyPunchedIn);
        }
        self.punch_in_at = Some(at);
        Ok(())
    }

    fn ensure_on_shift(&self) -> Result<DateTime<Utc>, PunchError> {
        let punch_in = self.punch_in_at.ok_or(PunchError::NotPunchedIn)?;
        if self.punch_out_at.is_some() {
            return Err(PunchError::AlreadyPunchedOut);
        }
        Ok(punch_in)
    }

    pub fn open_break(&self) -> Option<&BreakSegment> {
        self.breaks.iter().rev().find(|b| b.end_time.is_none())
    }

    pub fn start_break(&mut self, at: DateTime<Utc>, reason: Option<String>) -> Result<(), PunchError> {
        self.ensure_on_shift()?;
        if self.open_break().is_some() {
            return Err(PunchError::BreakAlreadyOpen);
        }
        self.breaks.push(BreakSegment {
            start_time: at,
            end_time: None,
            reason,
        });
        Ok(())
    }

    /// Closes the most recently opened break.
    pub fn end_break(&mut self, at: DateTime<Utc>) -> Result<(), PunchError> {
        self.ensure_on_shift()?;
        let open = self
            .breaks
            .iter_mut()
            .rev()
            .find(|b| b.end_time.is_none())
            .ok_or(PunchError::NoOpenBreak)?;
        if at < open.start_time {
            return Err(PunchError::BreakEndsBeforeStart);
        }
        open.end_time = Some(at);
        Ok(())
    }

    /// Records punch-out and returns effective working hours. An open break ends at `at`.
    pub fn punch_out(&mut self, at: DateTime<Utc>) -> Result<f64, PunchError> {
        let punch_in = self.ensure_on_shift()?;
        if at < punch_in {
            return Err(PunchError::PunchOutBeforePunchIn);
        }

        for open in self.breaks.iter_mut().filter(|b| b.end_time.is_none()) {
            open.end_time = Some(at.max(open.start_time));
        }
        self.punch_out_at = Some(at);

        Ok(effective_working_hours(punch_in, at, &self.breaks))
    }

    pub fn total_break_minutes(&self, now: DateTime<Utc>) -> i64 {
        total_break(&self.breaks, now).num_minutes()
    }

    pub fn on_break(&self) -> bool {
        self.punch_out_at.is_none() && self.open_break().is_some()
    }
}

/// Closed breaks plus the elapsed part of an open one.
pub fn total_break(breaks: &[BreakSegment], now: DateTime<Utc>) -> Duration {
    breaks
        .iter()
        .map(|b| {
            let end = b.end_time.unwrap_or(now);
            if end > b.start_time {
                end - b.start_time
            } else {
                Duration::zero()
            }
        })
        .fold(Duration::zero(), |acc, d| acc + d)
}

/// `(punch_out - punch_in) - breaks`, in hours with two decimals, never negative.
pub fn effective_working_hours(
    punch_in: DateTime<Utc>,
    punch_out: DateTime<Utc>,
    breaks: &[BreakSegment],
) -> f64 {
    let worked = (punch_out - punch_in) - total_break(breaks, punch_out);
    let seconds = worked.num_seconds().max(0);
    (seconds as f64 / 36.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn nine_to_six_with_half_hour_lunch_is_eight_and_a_half() {
        let mut card = PunchCard::default();
        card.punch_in(at(9, 0)).unwrap();
        card.start_break(at(12, 0), Some("lunch".into())).unwrap();
        card.end_break(at(12, 30)).unwrap();

        let hours = card.punch_out(at(18, 0)).unwrap();
        assert_eq!(hours, 8.5);
        assert_eq!(card.total_break_minutes(at(18, 0)), 30);
    }

    #[test]
    fn second_punch_in_fails() {
        let mut card = PunchCard::default();
        card.punch_in(at(9, 0)).unwrap();
        assert_eq!(card.punch_in(at(9, 5)), Err(PunchError::AlreadyPunchedIn));
    }

    #[test]
    fn punch_out_requires_punch_in_and_happens_once() {
        let mut card = PunchCard::default();
        assert_eq!(card.punch_out(at(18, 0)), Err(PunchError::NotPunchedIn));

        card.punch_in(at(9, 0)).unwrap();
        card.punch_out(at(17, 0)).unwrap();
        assert_eq!(card.punch_out(at(18, 0)), Err(PunchError::AlreadyPunchedOut));
    }

    #[test]
    fn punch_out_before_punch_in_is_rejected() {
        let mut card = PunchCard::default();
        card.punch_in(at(9, 0)).unwrap();
        assert_eq!(
            card.punch_out(at(8, 59)),
            Err(PunchError::PunchOutBeforePunchIn)
        );
        assert!(card.punch_out_at.is_none());
    }

    #[test]
    fn only_one_break_open_at_a_time() {
        let mut card = PunchCard::default();
        assert_eq!(card.start_break(at(10, 0), None), Err(PunchError::NotPunchedIn));

        card.punch_in(at(9, 0)).unwrap();
        card.start_break(at(10, 0), None).unwrap();
        assert!(card.on_break());
        assert_eq!(card.start_break(at(10, 5), None), Err(PunchError::BreakAlreadyOpen));

        card.end_break(at(10, 15)).unwrap();
        assert_eq!(card.end_break(at(10, 20)), Err(PunchError::NoOpenBreak));
        assert!(!card.on_break());
    }

    #[test]
    fn break_out_closes_latest_break() {
        let mut card = PunchCard::default();
        card.punch_in(at(9, 0)).unwrap();
        card.start_break(at(10, 0), None).unwrap();
        card.end_break(at(10, 10)).unwrap();
        card.start_break(at(13, 0), Some("lunch".into())).unwrap();
        card.end_break(at(13, 45)).unwrap();

        assert_eq!(card.breaks[0].end_time, Some(at(10, 10)));
        assert_eq!(card.breaks[1].end_time, Some(at(13, 45)));
        assert_eq!(card.total_break_minutes(at(17, 0)), 55);
    }

    #[test]
    fn open_break_counts_elapsed_time() {
        let mut card = PunchCard::default();
        card.punch_in(at(9, 0)).unwrap();
        card.start_break(at(11, 0), None).unwrap();
        card.end_break(at(11, 20)).unwrap();
        card.start_break(at(15, 0), None).unwrap();

        assert_eq!(card.total_break_minutes(at(15, 10)), 30);
    }

    #[test]
    fn punch_out_closes_open_break() {
        let mut card = PunchCard::default();
        card.punch_in(at(9, 0)).unwrap();
        card.start_break(at(17, 0), None).unwrap();

        let hours = card.punch_out(at(18, 0)).unwrap();
        assert_eq!(card.breaks[0].end_time, Some(at(18, 0)));
        assert_eq!(hours, 8.0);
    }

    #[test]
    fn breaks_longer_than_shift_never_go_negative() {
        let breaks = vec![BreakSegment {
            start_time: at(8, 0),
            end_time: Some(at(12, 0)),
            reason: None,
        }];
        assert_eq!(effective_working_hours(at(9, 0), at(10, 0), &breaks), 0.0);
    }

    #[test]
    fn hours_round_to_two_decimals() {
        // 7h 20m = 7.333.. hours
        assert_eq!(effective_working_hours(at(9, 0), at(16, 20), &[]), 7.33);
    }
}
