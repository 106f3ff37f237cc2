//! Classification of arrival instants relative to the target minute.
//!
//! With the default 13:37 target and one minute of tolerance on each side:
//!
//!   13:35:59  Before   (outside, no points)
//!   13:36:xx  Early    (near miss, -1)
//!   13:37:xx  OnTime   (contestant, ranked at settlement)
//!   13:38:xx  Late     (near miss, -1)
//!   13:39:00  After    (outside, no points)

use std::fmt;

use chrono::{Duration, NaiveTime, Timelike};

use crate::constants::{
    DEFAULT_HOUR, DEFAULT_MINUTE, DEFAULT_TOLERANCE_MINUTES, NEAR_MISS_POINTS, ON_TIME_POINTS,
};
use crate::error::LeetError;
use crate::types::{Points, Timestamp};

/// Where an instant falls relative to the target minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemporalCode {
    Before,
    Early,
    OnTime,
    Late,
    After,
}

impl TemporalCode {
    pub fn inside_window(self) -> bool {
        matches!(self, Self::Early | Self::OnTime | Self::Late)
    }

    pub fn near_miss(self) -> bool {
        matches!(self, Self::Early | Self::Late)
    }

    /// Lower is closer to the target. An early miss is at most one tolerance
    /// away while a late one is at least a full minute past the target start,
    /// so Early outranks Late.
    pub fn closeness_rank(self) -> u8 {
        match self {
            Self::OnTime => 0,
            Self::Early => 1,
            Self::Late => 2,
            Self::Before | Self::After => 3,
        }
    }
}

impl fmt::Display for TemporalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Before => "before",
            Self::Early => "early",
            Self::OnTime => "on time",
            Self::Late => "late",
            Self::After => "after",
        };
        f.write_str(s)
    }
}

/// The target minute plus a tolerance in whole minutes on each side.
///
/// The window never wraps across an hour boundary: any instant in another
/// hour than the target is Before or After.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    target: NaiveTime,
    before: u32,
    after: u32,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            target: NaiveTime::from_hms_opt(DEFAULT_HOUR, DEFAULT_MINUTE, 0)
                .unwrap_or(NaiveTime::MIN),
            before: DEFAULT_TOLERANCE_MINUTES,
            after: DEFAULT_TOLERANCE_MINUTES,
        }
    }
}

impl TimeWindow {
    pub fn new(hour: u32, minute: u32) -> Result<Self, LeetError> {
        let target = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or(LeetError::InvalidTarget { hour, minute })?;
        Ok(Self {
            target,
            before: DEFAULT_TOLERANCE_MINUTES,
            after: DEFAULT_TOLERANCE_MINUTES,
        })
    }

    pub fn with_tolerance(mut self, before_minutes: u32, after_minutes: u32) -> Self {
        self.before = before_minutes;
        self.after = after_minutes;
        self
    }

    pub fn hour(&self) -> u32 {
        self.target.hour()
    }

    pub fn minute(&self) -> u32 {
        self.target.minute()
    }

    pub fn tolerance_before(&self) -> u32 {
        self.before
    }

    pub fn tolerance_after(&self) -> u32 {
        self.after
    }

    pub fn target_time(&self) -> NaiveTime {
        self.target
    }

    /// The season's target score: HHMM read as a number.
    pub fn target_score(&self) -> Points {
        (self.hour() * 100 + self.minute()) as Points
    }

    /// Classify `t` by its wall-clock hour and minute.
    pub fn code<T: Timelike>(&self, t: &T) -> TemporalCode {
        let hour = self.hour();
        if t.hour() < hour {
            return TemporalCode::Before;
        }
        if t.hour() > hour {
            return TemporalCode::After;
        }

        let m = t.minute() as i64;
        let first = self.minute() as i64 - self.before as i64;
        let last = self.minute() as i64 + self.after as i64;
        match m {
            m if m < first => TemporalCode::Before,
            m if m > last => TemporalCode::After,
            m if m == first => TemporalCode::Early,
            m if m == last => TemporalCode::Late,
            _ => TemporalCode::OnTime,
        }
    }

    /// Absolute time-of-day distance from the start of the target minute.
    /// The date is ignored.
    pub fn distance(&self, t: &Timestamp) -> Duration {
        let d = t.time().signed_duration_since(self.target);
        if d < Duration::zero() {
            -d
        } else {
            d
        }
    }

    /// Immediate points for an attempt with the given code.
    pub fn base_points(code: TemporalCode) -> Points {
        if code.near_miss() {
            NEAR_MISS_POINTS
        } else {
            ON_TIME_POINTS
        }
    }

    /// The same window with its target moved by `adjust`, wrapping at
    /// midnight. Used to derive the time of day for related jobs, such as a
    /// clock check a few minutes ahead of the target.
    pub fn shifted(&self, adjust: Duration) -> Self {
        Self {
            target: self.target + adjust,
            ..*self
        }
    }

    /// Time left from `t` until the late minute ends. Zero once the window
    /// has closed. Only meaningful for instants in the target hour.
    pub fn until_close(&self, t: &Timestamp) -> Duration {
        let open_for = Duration::minutes(self.after as i64 + 1);
        let elapsed = t.time().signed_duration_since(self.target);
        (open_for - elapsed).max(Duration::zero())
    }

    /// The next instant strictly after `now` at which the target minute
    /// starts, in `now`'s offset.
    pub fn next_occurrence(&self, now: &Timestamp) -> Timestamp {
        let mut delta = self.target.signed_duration_since(now.time());
        if delta <= Duration::zero() {
            delta += Duration::days(1);
        }
        *now + delta
    }
}
