//! Wall-clock abstraction and calendar arithmetic
//!
//! Quota windows are aligned to the user's local calendar: trial windows
//! reset at local midnight, full-access windows at the start of the local
//! week. All instants are carried as `DateTime<Utc>`; only the boundary
//! computations look at a time zone.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Local, NaiveDate, NaiveTime, Offset, TimeZone,
    Utc, Weekday,
};
use std::sync::Mutex;

/// Source of the current instant plus local calendar boundaries
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// First instant of the local calendar day containing `at`
    fn start_of_day(&self, at: DateTime<Utc>) -> DateTime<Utc>;

    /// First instant of the local calendar week containing `at`
    fn start_of_week(&self, at: DateTime<Utc>) -> DateTime<Utc>;

    fn is_same_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.start_of_day(a) == self.start_of_day(b)
    }

    fn is_same_week(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.start_of_week(a) == self.start_of_week(b)
    }

    /// First instant of the day after the one containing `at`
    fn start_of_next_day(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        // 26h clears a 25h DST day without reaching the day after
        self.start_of_day(self.start_of_day(at) + Duration::hours(26))
    }

    /// First instant of the week after the one containing `at`
    fn start_of_next_week(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.start_of_week(self.start_of_week(at) + Duration::days(7) + Duration::hours(12))
    }
}

/// Resolve local midnight of `date` in `tz` to an instant.
///
/// When midnight does not exist (DST gap) the first hour after it is used.
fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(midnight + Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Start of the calendar day containing `at`, as seen in `tz`
pub fn start_of_day_in<Tz: TimeZone>(tz: &Tz, at: DateTime<Utc>) -> DateTime<Utc> {
    local_midnight(tz, at.with_timezone(tz).date_naive())
}

/// Start of the calendar week containing `at`, as seen in `tz`
pub fn start_of_week_in<Tz: TimeZone>(
    tz: &Tz,
    at: DateTime<Utc>,
    week_start: Weekday,
) -> DateTime<Utc> {
    let date = at.with_timezone(tz).date_naive();
    let back = (7 + date.weekday().num_days_from_monday() - week_start.num_days_from_monday()) % 7;
    local_midnight(tz, date - Duration::days(i64::from(back)))
}

/// Real clock using the host's local time zone
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    week_start: Weekday,
}

impl SystemClock {
    pub fn new(week_start: Weekday) -> Self {
        Self { week_start }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(Weekday::Sun)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn start_of_day(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        start_of_day_in(&Local, at)
    }

    fn start_of_week(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        start_of_week_in(&Local, at, self.week_start)
    }
}

/// Settable clock in a fixed-offset zone, for tests and support tooling
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
    week_start: Weekday,
}

impl ManualClock {
    /// Clock frozen at `now`, UTC calendar, weeks starting Sunday
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            offset: Utc.fix(),
            week_start: Weekday::Sun,
        }
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_week_start(mut self, week_start: Weekday) -> Self {
        self.week_start = week_start;
        self
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn start_of_day(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        start_of_day_in(&self.offset, at)
    }

    fn start_of_week(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        start_of_week_in(&self.offset, at, self.week_start)
    }
}
