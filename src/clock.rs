//! Time source used by the send-window gate, user expiry and row timestamps.

use std::fmt::Debug;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use time::{Duration, OffsetDateTime};

/// Source of "now" for the engine.
///
/// Nothing in the engine runs on a timer: every expiry is re-evaluated against
/// the clock when it is read, so swapping in a [`ManualClock`] is enough to
/// test expiry boundaries.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> OffsetDateTime;

    /// Current instant in the representation stored in the database.
    fn now_db(&self) -> DateTime<Utc> {
        to_db_timestamp(self.now())
    }

    /// Current UTC calendar date, used for `users.expires_at`.
    fn today(&self) -> NaiveDate {
        self.now_db().date_naive()
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(OffsetDateTime::now_utc())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Converts a `time` instant to the chrono timestamp SeaORM stores.
pub fn to_db_timestamp(time: OffsetDateTime) -> DateTime<Utc> {
    // `time` covers years -9999..=9999, which chrono always represents.
    DateTime::from_timestamp(time.unix_timestamp(), time.nanosecond())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn converts_to_utc_timestamp() {
        let t = datetime!(2024-03-05 10:20:30.5 +02:00);
        let db = to_db_timestamp(t);
        assert_eq!(db.to_rfc3339(), "2024-03-05T08:20:30.500+00:00");
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(datetime!(2024-01-01 23:59:30 UTC));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        clock.advance(Duration::minutes(1));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }
}
