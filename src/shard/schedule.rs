//! Calendar schedules for time-based rotation
//!
//! Defines the rotation granularities, computes the next rotation boundary
//! for a wall-clock time and renders the filename suffix of the period that
//! contains it.

use std::fmt;

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, TimeZone,
    Timelike, Utc,
};
use serde::{Deserialize, Serialize};

/// Largest minute step that still rotates within the hour
pub const MAX_MINUTE_STEP: u32 = 30;

/// Calendar rotation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// One file per calendar month
    Monthly,
    /// One file per week, weeks start on Sunday
    Weekly,
    /// One file per day
    Daily,
    /// Two files per day, split at noon
    TwiceDaily,
    /// One file per hour
    Hourly,
    /// One file every `n` minutes, aligned to multiples of `n` within the hour
    Minutely(u32),
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Daily
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Minutely(step) if *step > 1 => write!(f, "minutely({})", step),
            other => f.write_str(other.name()),
        }
    }
}

impl Schedule {
    /// Build a minutely schedule from a raw multiple.
    ///
    /// Steps below one are raised to one; anything above [`MAX_MINUTE_STEP`]
    /// degrades to [`Schedule::Hourly`].
    pub fn minutely(multiple: i64) -> Self {
        if multiple > MAX_MINUTE_STEP as i64 {
            Self::Hourly
        } else {
            Self::Minutely(multiple.max(1) as u32)
        }
    }

    /// Parse a schedule name such as `daily` or `TWICE_DAILY`
    pub fn from_name(name: &str, multiple: Option<i64>) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "monthly" => Some(Self::Monthly),
            "weekly" => Some(Self::Weekly),
            "daily" => Some(Self::Daily),
            "twice_daily" => Some(Self::TwiceDaily),
            "hourly" => Some(Self::Hourly),
            "minutely" => Some(Self::minutely(multiple.unwrap_or(1))),
            _ => None,
        }
    }

    /// Get the name of the schedule
    pub fn name(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Weekly => "weekly",
            Self::Daily => "daily",
            Self::TwiceDaily => "twice_daily",
            Self::Hourly => "hourly",
            Self::Minutely(_) => "minutely",
        }
    }

    /// Re-apply the minute step limits, e.g. after deserialization
    pub fn normalized(self) -> Self {
        match self {
            Self::Minutely(step) => Self::minutely(step as i64),
            other => other,
        }
    }

    /// Compute the first boundary strictly after the period containing `now`
    pub fn next_boundary(&self, now: NaiveDateTime) -> NaiveDateTime {
        let truncated = now
            - ChronoDuration::seconds(now.second() as i64)
            - ChronoDuration::nanoseconds(now.nanosecond() as i64);
        let hour_start = truncated - ChronoDuration::minutes(truncated.minute() as i64);
        let midnight = hour_start - ChronoDuration::hours(hour_start.hour() as i64);

        match *self {
            Self::Monthly => {
                let date = midnight.date();
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .unwrap_or(midnight + ChronoDuration::days(31))
            }
            Self::Weekly => {
                let back = midnight.weekday().num_days_from_sunday() as i64;
                midnight - ChronoDuration::days(back) + ChronoDuration::days(7)
            }
            Self::Daily => midnight + ChronoDuration::days(1),
            Self::TwiceDaily => {
                let half = if hour_start.hour() >= 12 { 12 } else { 0 };
                midnight + ChronoDuration::hours(half + 12)
            }
            Self::Hourly => hour_start + ChronoDuration::hours(1),
            Self::Minutely(step) => {
                let step = step.clamp(1, MAX_MINUTE_STEP);
                let advanced = truncated + ChronoDuration::minutes(step as i64);
                advanced - ChronoDuration::minutes((advanced.minute() % step) as i64)
            }
        }
    }

    /// Render the filename suffix for the period containing `now`
    pub fn suffix(&self, now: NaiveDateTime) -> String {
        match *self {
            Self::Monthly => now.format("%Y-%m").to_string(),
            Self::Weekly => now.format("%Y-%W").to_string(),
            Self::Daily => now.format("%Y-%m-%d").to_string(),
            Self::TwiceDaily => now.format("%Y-%m-%d-%p").to_string(),
            Self::Hourly => now.format("%Y-%m-%d-%H").to_string(),
            Self::Minutely(step) => {
                let step = step.clamp(1, MAX_MINUTE_STEP);
                let aligned = now - ChronoDuration::minutes((now.minute() % step) as i64);
                aligned.format("%Y-%m-%d-%H-%M").to_string()
            }
        }
    }
}

/// Which wall clock schedules are evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBasis {
    /// The host's local time zone
    #[default]
    Local,
    /// UTC, regardless of the host's time zone
    Utc,
}

impl TimeBasis {
    /// Convert an instant to wall-clock time in this basis
    pub fn to_naive(&self, instant: &DateTime<Utc>) -> NaiveDateTime {
        match self {
            Self::Local => instant.with_timezone(&Local).naive_local(),
            Self::Utc => instant.naive_utc(),
        }
    }

    /// Convert wall-clock time in this basis back to an instant.
    ///
    /// A local time that falls into a DST gap resolves to the first valid
    /// instant after it.
    pub fn to_instant(&self, wall: NaiveDateTime) -> DateTime<Utc> {
        match self {
            Self::Utc => Utc.from_utc_datetime(&wall),
            Self::Local => Local
                .from_local_datetime(&wall)
                .earliest()
                .or_else(|| {
                    Local
                        .from_local_datetime(&(wall + ChronoDuration::hours(1)))
                        .earliest()
                })
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&wall)),
        }
    }
}
