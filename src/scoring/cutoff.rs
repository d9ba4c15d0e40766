//! The cutoff is "today at 08:00" in a fixed UTC offset.
//!
//! "Today" comes from a [`Clock`], which in production is the invoking machine's wall clock.
//! Nothing here talks to a network time source, so a badly skewed host clock moves the cutoff
//! with it.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// `hour:00:00` on the calendar date that `now` falls on in `offset`, as a UTC instant.
///
/// Before `hour` local time this is later today, so nothing qualifies yet.
pub fn cutoff_for(
    now: DateTime<Utc>,
    offset: FixedOffset,
    hour: u32,
) -> CutoffResult<DateTime<Utc>> {
    let local_day = now.with_timezone(&offset).date_naive();
    let local = local_day
        .and_hms_opt(hour, 0, 0)
        .ok_or(CutoffErr::InvalidHour(hour))?;

    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or(CutoffErr::Unrepresentable(local))
}

pub fn todays_cutoff(
    clock: &dyn Clock,
    offset: FixedOffset,
    hour: u32,
) -> CutoffResult<DateTime<Utc>> {
    cutoff_for(clock.now(), offset, hour)
}

pub type CutoffResult<T> = core::result::Result<T, CutoffErr>;

#[derive(Debug, Error)]
pub enum CutoffErr {
    #[error("{0} is not an hour of the day")]
    InvalidHour(u32),

    #[error("local time {0} has no single UTC equivalent")]
    Unrepresentable(NaiveDateTime),
}

#[cfg(test)]
mod test {
    use super::*;

    fn pacific() -> FixedOffset {
        FixedOffset::west_opt(8 * 3600).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_cutoff_after_eight_local() {
        // 09:30 local
        let clock = FixedClock(utc(2024, 3, 4, 17, 30));
        assert_eq!(
            todays_cutoff(&clock, pacific(), 8).unwrap(),
            utc(2024, 3, 4, 16, 0)
        );
    }

    #[test]
    fn test_cutoff_across_utc_midnight() {
        // 22:00 local on the 4th is already the 5th in UTC
        let clock = FixedClock(utc(2024, 3, 5, 6, 0));
        assert_eq!(
            todays_cutoff(&clock, pacific(), 8).unwrap(),
            utc(2024, 3, 4, 16, 0)
        );
    }

    #[test]
    fn test_cutoff_before_eight_is_in_the_future() {
        // 07:00 local
        let now = utc(2024, 3, 4, 15, 0);
        let cutoff = cutoff_for(now, pacific(), 8).unwrap();
        assert_eq!(cutoff, utc(2024, 3, 4, 16, 0));
        assert!(cutoff > now);
    }

    #[test]
    fn test_cutoff_other_offsets() {
        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        assert_eq!(
            cutoff_for(utc(2024, 3, 4, 12, 0), ist, 8).unwrap(),
            utc(2024, 3, 4, 2, 30)
        );
        assert_eq!(
            cutoff_for(utc(2024, 3, 4, 12, 0), FixedOffset::east_opt(0).unwrap(), 0).unwrap(),
            utc(2024, 3, 4, 0, 0)
        );
    }

    #[test]
    fn test_invalid_hour() {
        assert!(matches!(
            cutoff_for(utc(2024, 3, 4, 12, 0), pacific(), 24),
            Err(CutoffErr::InvalidHour(24))
        ));
    }
}
