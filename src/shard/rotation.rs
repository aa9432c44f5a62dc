//! Rotation policy
//!
//! Pure decision logic shared by every shard of a sink: whether a shard is
//! due for rotation, when the next calendar rotation happens, and which file
//! name a shard is currently writing to.

use chrono::{DateTime, Utc};

use crate::shard::{Schedule, TimeBasis};

/// Calendar rotation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarRotation {
    schedule: Schedule,
    basis: TimeBasis,
    next_deadline: DateTime<Utc>,
}

impl CalendarRotation {
    /// Create calendar rotation state whose first deadline follows `now`
    pub fn new(schedule: Schedule, basis: TimeBasis, now: DateTime<Utc>) -> Self {
        let schedule = schedule.normalized();
        let mut rotation = Self {
            schedule,
            basis,
            next_deadline: now,
        };
        rotation.next_deadline = rotation.deadline_after(now);
        rotation
    }

    /// Get the schedule
    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Get the time basis
    pub fn basis(&self) -> TimeBasis {
        self.basis
    }

    /// Get the next rotation deadline
    pub fn next_deadline(&self) -> DateTime<Utc> {
        self.next_deadline
    }

    /// Check whether `now` has reached the deadline
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_deadline
    }

    /// Move the deadline past `now`
    pub fn advance(&mut self, now: DateTime<Utc>) {
        self.next_deadline = self.deadline_after(now);
    }

    /// Compute the aligned deadline that follows `now`
    pub fn deadline_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let wall = self.basis.to_naive(&now);
        self.basis.to_instant(self.schedule.next_boundary(wall))
    }

    /// Suffix of the period that contains `now`
    pub fn suffix(&self, now: DateTime<Utc>) -> String {
        self.schedule.suffix(self.basis.to_naive(&now))
    }
}

/// How the shards of a sink retire their active files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Files grow without bound
    None,
    /// Rename the active file once it reaches `max_bytes`
    SizeBased {
        max_bytes: u64,
        max_backups: u32,
    },
    /// Switch every shard to a new timestamped file at each calendar boundary
    Calendar(CalendarRotation),
}

impl RotationPolicy {
    /// Create a calendar policy whose first deadline follows `now`
    pub fn calendar(schedule: Schedule, basis: TimeBasis, now: DateTime<Utc>) -> Self {
        Self::Calendar(CalendarRotation::new(schedule, basis, now))
    }

    /// Compute the active file name for a shard.
    ///
    /// `base` is the configured file name and `postfix` is `.gz` when the
    /// sink compresses.
    pub fn active_filename(&self, base: &str, postfix: &str, now: DateTime<Utc>) -> String {
        match self {
            Self::None | Self::SizeBased { .. } => format!("{}{}", base, postfix),
            Self::Calendar(calendar) => format!("{}.{}{}", base, calendar.suffix(now), postfix),
        }
    }

    /// File name of the `n`th size-based backup
    pub fn backup_filename(base: &str, n: u32, postfix: &str) -> String {
        format!("{}.{}{}", base, n, postfix)
    }

    /// Check if the policy is calendar based
    pub fn is_calendar(&self) -> bool {
        matches!(self, Self::Calendar(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_active_filename() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 10, 59, 30).unwrap();

        assert_eq!(RotationPolicy::None.active_filename("app.log", "", now), "app.log");

        let size = RotationPolicy::SizeBased {
            max_bytes: 1024,
            max_backups: 2,
        };
        assert_eq!(size.active_filename("app.log", ".gz", now), "app.log.gz");

        let hourly = RotationPolicy::calendar(Schedule::Hourly, TimeBasis::Utc, now);
        assert_eq!(hourly.active_filename("app.log", "", now), "app.log.2024-03-10-10");
        assert_eq!(hourly.active_filename("app.log", ".gz", now), "app.log.2024-03-10-10.gz");

        assert_eq!(RotationPolicy::backup_filename("app.log", 2, ".gz"), "app.log.2.gz");
    }

    #[test]
    fn test_calendar_deadline() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 10, 59, 30).unwrap();
        let mut calendar = CalendarRotation::new(Schedule::Hourly, TimeBasis::Utc, now);

        assert_eq!(calendar.next_deadline(), Utc.with_ymd_and_hms(2024, 3, 10, 11, 0, 0).unwrap());
        assert!(!calendar.is_due(now));

        let later = Utc.with_ymd_and_hms(2024, 3, 10, 11, 0, 0).unwrap();
        assert!(calendar.is_due(later));

        calendar.advance(later);
        assert_eq!(calendar.next_deadline(), Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_calendar_normalizes_schedule() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 10, 0, 0).unwrap();
        let calendar = CalendarRotation::new(Schedule::Minutely(50), TimeBasis::Utc, now);
        assert_eq!(calendar.schedule(), Schedule::Hourly);
    }
}
