//! Nominal sampling frequency of a series
//!
//! Frequencies use pandas-style codes (`D`, `MS`, `H`, `5min`, ...) so configs
//! written for the Python tooling keep working. Calendar rules (month/quarter/year
//! starts and ends, business days) are stepped with calendar arithmetic; everything
//! else is a fixed delta.

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ForecastError, Result};

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 3_600;
const SECS_PER_DAY: i64 = 86_400;
const SECS_PER_WEEK: i64 = 604_800;

/// Time delta between consecutive observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    /// Every `n` minutes
    Minutely(u32),
    /// Every `n` hours
    Hourly(u32),
    Daily,
    /// Monday to Friday
    BusinessDaily,
    Weekly,
    MonthStart,
    MonthEnd,
    QuarterStart,
    QuarterEnd,
    YearStart,
    YearEnd,
    /// Any other uniform spacing, in seconds
    Fixed(i64),
}

impl Frequency {
    /// Parse a pandas-style frequency code.
    ///
    /// Returns `None` for codes that do not describe a supported frequency.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.is_empty() {
            return None;
        }

        let digits_end = code
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(code.len());
        let multiplier: u32 = if digits_end == 0 {
            1
        } else {
            code[..digits_end].parse().ok()?
        };
        if multiplier == 0 {
            return None;
        }
        let unit = &code[digits_end..];
        // Anchors like "W-SUN" or "QS-JAN" do not change the step
        let base = unit.split('-').next().unwrap_or(unit);

        let freq = match base {
            "T" | "min" | "MIN" | "Min" => Frequency::Minutely(multiplier),
            "H" | "h" => Frequency::Hourly(multiplier),
            "S" | "s" => Frequency::Fixed(multiplier as i64),
            "D" | "d" if multiplier == 1 => Frequency::Daily,
            "D" | "d" => Frequency::Fixed(multiplier as i64 * SECS_PER_DAY),
            "B" if multiplier == 1 => Frequency::BusinessDaily,
            "W" if multiplier == 1 => Frequency::Weekly,
            "W" => Frequency::Fixed(multiplier as i64 * SECS_PER_WEEK),
            _ if multiplier != 1 => return None,
            "MS" => Frequency::MonthStart,
            "M" | "ME" => Frequency::MonthEnd,
            "QS" => Frequency::QuarterStart,
            "Q" | "QE" => Frequency::QuarterEnd,
            "YS" | "AS" => Frequency::YearStart,
            "Y" | "A" | "YE" => Frequency::YearEnd,
            _ => return None,
        };
        Some(freq)
    }

    /// Pandas-style code for this frequency
    pub fn code(&self) -> String {
        match self {
            Frequency::Minutely(1) => "min".to_string(),
            Frequency::Minutely(n) => format!("{}min", n),
            Frequency::Hourly(1) => "H".to_string(),
            Frequency::Hourly(n) => format!("{}H", n),
            Frequency::Daily => "D".to_string(),
            Frequency::BusinessDaily => "B".to_string(),
            Frequency::Weekly => "W".to_string(),
            Frequency::MonthStart => "MS".to_string(),
            Frequency::MonthEnd => "ME".to_string(),
            Frequency::QuarterStart => "QS".to_string(),
            Frequency::QuarterEnd => "QE".to_string(),
            Frequency::YearStart => "YS".to_string(),
            Frequency::YearEnd => "YE".to_string(),
            Frequency::Fixed(secs) => format!("{}s", secs),
        }
    }

    /// Infer the frequency of an ordered timestamp index.
    ///
    /// Needs at least three points. Irregular spacing yields `None`.
    pub fn infer(timestamps: &[NaiveDateTime]) -> Option<Self> {
        if timestamps.len() < 3 {
            return None;
        }

        let deltas: Vec<i64> = timestamps
            .windows(2)
            .map(|w| (w[1] - w[0]).num_seconds())
            .collect();
        if deltas.iter().any(|&d| d <= 0) {
            return None;
        }

        let first = deltas[0];
        if deltas.iter().all(|&d| d == first) {
            return Some(match first {
                SECS_PER_WEEK => Frequency::Weekly,
                SECS_PER_DAY => Frequency::Daily,
                d if d < SECS_PER_HOUR && d % SECS_PER_MINUTE == 0 => {
                    Frequency::Minutely((d / SECS_PER_MINUTE) as u32)
                }
                d if d < SECS_PER_DAY && d % SECS_PER_HOUR == 0 => {
                    Frequency::Hourly((d / SECS_PER_HOUR) as u32)
                }
                d => Frequency::Fixed(d),
            });
        }

        Self::infer_calendar(timestamps).or_else(|| Self::infer_business(timestamps))
    }

    fn infer_calendar(timestamps: &[NaiveDateTime]) -> Option<Self> {
        let time = timestamps[0].time();
        if timestamps.iter().any(|ts| ts.time() != time) {
            return None;
        }

        let month_index = |ts: &NaiveDateTime| ts.year() as i64 * 12 + ts.month0() as i64;
        let step = month_index(&timestamps[1]) - month_index(&timestamps[0]);
        if !timestamps
            .windows(2)
            .all(|w| month_index(&w[1]) - month_index(&w[0]) == step)
        {
            return None;
        }

        let all_start = timestamps.iter().all(|ts| ts.day() == 1);
        let all_end = timestamps.iter().all(|ts| is_month_end(ts.date()));

        match (step, all_start, all_end) {
            (1, true, _) => Some(Frequency::MonthStart),
            (1, _, true) => Some(Frequency::MonthEnd),
            (3, true, _) => Some(Frequency::QuarterStart),
            (3, _, true) => Some(Frequency::QuarterEnd),
            (12, true, _) => Some(Frequency::YearStart),
            (12, _, true) => Some(Frequency::YearEnd),
            _ => None,
        }
    }

    fn infer_business(timestamps: &[NaiveDateTime]) -> Option<Self> {
        let weekday_only = timestamps
            .iter()
            .all(|ts| !matches!(ts.weekday(), Weekday::Sat | Weekday::Sun));
        if !weekday_only {
            return None;
        }

        let business_steps = timestamps.windows(2).all(|w| {
            let days = (w[1] - w[0]).num_seconds();
            match w[0].weekday() {
                Weekday::Fri => days == 3 * SECS_PER_DAY,
                _ => days == SECS_PER_DAY,
            }
        });
        business_steps.then_some(Frequency::BusinessDaily)
    }

    /// Approximate length of one step in seconds
    pub fn nominal_seconds(&self) -> f64 {
        match self {
            Frequency::Minutely(n) => (*n as i64 * SECS_PER_MINUTE) as f64,
            Frequency::Hourly(n) => (*n as i64 * SECS_PER_HOUR) as f64,
            Frequency::Daily | Frequency::BusinessDaily => SECS_PER_DAY as f64,
            Frequency::Weekly => SECS_PER_WEEK as f64,
            Frequency::MonthStart | Frequency::MonthEnd => 30.436875 * SECS_PER_DAY as f64,
            Frequency::QuarterStart | Frequency::QuarterEnd => 91.310625 * SECS_PER_DAY as f64,
            Frequency::YearStart | Frequency::YearEnd => 365.2425 * SECS_PER_DAY as f64,
            Frequency::Fixed(secs) => *secs as f64,
        }
    }

    /// Timestamp `n` steps after `ts`, or `None` when it leaves the representable range
    pub fn advance(&self, ts: NaiveDateTime, n: usize) -> Option<NaiveDateTime> {
        let n_i64 = i64::try_from(n).ok()?;
        match self {
            Frequency::Minutely(k) => add_seconds(ts, (*k as i64).checked_mul(SECS_PER_MINUTE)?, n_i64),
            Frequency::Hourly(k) => add_seconds(ts, (*k as i64).checked_mul(SECS_PER_HOUR)?, n_i64),
            Frequency::Daily => add_seconds(ts, SECS_PER_DAY, n_i64),
            Frequency::Weekly => add_seconds(ts, SECS_PER_WEEK, n_i64),
            Frequency::Fixed(secs) => add_seconds(ts, *secs, n_i64),
            Frequency::BusinessDaily => add_business_days(ts, n_i64),
            Frequency::MonthStart => add_months_anchored(ts, n, 1, false),
            Frequency::MonthEnd => add_months_anchored(ts, n, 1, true),
            Frequency::QuarterStart => add_months_anchored(ts, n, 3, false),
            Frequency::QuarterEnd => add_months_anchored(ts, n, 3, true),
            Frequency::YearStart => add_months_anchored(ts, n, 12, false),
            Frequency::YearEnd => add_months_anchored(ts, n, 12, true),
        }
    }

    /// The `steps` timestamps following `last`.
    ///
    /// Fails with `HorizonOverflow` as soon as one of them is not representable.
    pub fn horizon(&self, last: NaiveDateTime, steps: usize) -> Result<Vec<NaiveDateTime>> {
        (1..=steps)
            .map(|i| {
                self.advance(last, i)
                    .ok_or(ForecastError::HorizonOverflow { steps })
            })
            .collect()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

fn add_seconds(ts: NaiveDateTime, step_secs: i64, n: i64) -> Option<NaiveDateTime> {
    let total = step_secs.checked_mul(n)?;
    let delta = Duration::try_seconds(total)?;
    ts.checked_add_signed(delta)
}

fn add_business_days(ts: NaiveDateTime, n: i64) -> Option<NaiveDateTime> {
    let weeks = n / 5;
    let mut current = add_seconds(ts, SECS_PER_WEEK, weeks)?;
    let mut remaining = n % 5;
    while remaining > 0 {
        current = add_seconds(current, SECS_PER_DAY, 1)?;
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    // A weekend anchor rolls forward to Monday
    while matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
        current = add_seconds(current, SECS_PER_DAY, 1)?;
    }
    Some(current)
}

fn add_months_anchored(
    ts: NaiveDateTime,
    n: usize,
    months_per_step: u32,
    month_end: bool,
) -> Option<NaiveDateTime> {
    let total = u32::try_from(n).ok()?.checked_mul(months_per_step)?;
    let first = ts.date().with_day(1)?;
    let target_first = first.checked_add_months(Months::new(total))?;
    let date = if month_end {
        last_day_of_month(target_first)?
    } else {
        target_first
    };
    Some(date.and_time(ts.time()))
}

fn last_day_of_month(first: NaiveDate) -> Option<NaiveDate> {
    first
        .checked_add_months(Months::new(1))?
        .pred_opt()
}

fn is_month_end(date: NaiveDate) -> bool {
    date.succ_opt().map(|next| next.day() == 1).unwrap_or(true)
}
