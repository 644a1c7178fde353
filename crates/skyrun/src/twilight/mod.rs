//! Time-of-night gating.
//!
//! The sequencer only dispatches targets while the clock is inside a
//! [`TwilightWindow`]. Where the window comes from is behind
//! [`TwilightSource`]; the crate ships [`FixedTwilight`], which takes dusk
//! and dawn as local clock times from the schedule file. Time itself is
//! behind [`Clock`] so tests can drive it.

use crate::error::{ScopeError, ScopeResult};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use std::thread;
use std::time::Duration;

/// Source of "now" and of blocking sleeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
    fn sleep(&self, duration: Duration);
}

/// Wall clock reported in a fixed UTC offset.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Where a moment falls relative to a window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowPhase {
    BeforeDusk,
    Open,
    AfterDawn,
}

/// The permitted observing interval `[dusk, dawn)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TwilightWindow {
    pub dusk: DateTime<FixedOffset>,
    pub dawn: DateTime<FixedOffset>,
}

impl TwilightWindow {
    pub fn phase(&self, now: DateTime<FixedOffset>) -> WindowPhase {
        if now < self.dusk {
            WindowPhase::BeforeDusk
        } else if now < self.dawn {
            WindowPhase::Open
        } else {
            WindowPhase::AfterDawn
        }
    }

    pub fn contains(&self, now: DateTime<FixedOffset>) -> bool {
        self.phase(now) == WindowPhase::Open
    }
}

/// Ephemeris collaborator: yields the night containing or following `now`.
pub trait TwilightSource {
    fn window_for(&self, now: DateTime<FixedOffset>) -> ScopeResult<TwilightWindow>;
}

/// Dusk and dawn at fixed local clock times.
#[derive(Clone, Copy, Debug)]
pub struct FixedTwilight {
    dusk: NaiveTime,
    dawn: NaiveTime,
    offset: FixedOffset,
}

impl FixedTwilight {
    pub fn new(dusk: NaiveTime, dawn: NaiveTime, offset: FixedOffset) -> Self {
        Self { dusk, dawn, offset }
    }

    /// Build from schedule text: `"HH:MM"` times and a `"+HH:MM"` offset.
    pub fn parse(dusk: &str, dawn: &str, offset: &str) -> ScopeResult<Self> {
        Ok(Self::new(
            parse_clock_time(dusk)?,
            parse_clock_time(dawn)?,
            parse_utc_offset(offset)?,
        ))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn at(&self, date: NaiveDate, time: NaiveTime) -> ScopeResult<DateTime<FixedOffset>> {
        self.offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .ok_or_else(|| ScopeError::internal(format!("no single local time for {date} {time}")))
    }
}

impl TwilightSource for FixedTwilight {
    fn window_for(&self, now: DateTime<FixedOffset>) -> ScopeResult<TwilightWindow> {
        let local = now.with_timezone(&self.offset);
        let today = local.date_naive();
        let time = local.time();
        let day = |date: Option<NaiveDate>| {
            date.ok_or_else(|| ScopeError::internal("date out of range"))
        };

        let (dusk_date, dawn_date) = if self.dusk > self.dawn {
            // Night spans midnight.
            if time < self.dawn {
                (day(today.pred_opt())?, today)
            } else {
                (today, day(today.succ_opt())?)
            }
        } else if time < self.dawn {
            (today, today)
        } else {
            let tomorrow = day(today.succ_opt())?;
            (tomorrow, tomorrow)
        };

        Ok(TwilightWindow {
            dusk: self.at(dusk_date, self.dusk)?,
            dawn: self.at(dawn_date, self.dawn)?,
        })
    }
}

/// Parse `"HH:MM"` or `"HH:MM:SS"`.
pub fn parse_clock_time(text: &str) -> ScopeResult<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .map_err(|err| ScopeError::config(format!("invalid clock time {text:?}"), err))
}

/// Parse a UTC offset: `"+02:00"`, `"-0530"`, `"Z"` or `"UTC"`.
pub fn parse_utc_offset(text: &str) -> ScopeResult<FixedOffset> {
    let text = text.trim();
    let invalid = || ScopeError::config(format!("invalid UTC offset {text:?}"), "expected +HH:MM");
    if text.eq_ignore_ascii_case("z") || text.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }
    let (sign, rest) = if let Some(rest) = text.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = text.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(invalid());
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some(parts) => parts,
        None if rest.len() == 4 => rest.get(..2).zip(rest.get(2..)).ok_or_else(invalid)?,
        None => return Err(invalid()),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..60).contains(&minutes) {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
