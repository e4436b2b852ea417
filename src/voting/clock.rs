use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::model::common::ElectionStatus;

/// Classify an instant against an election window. Both ends are inclusive.
pub fn classify(now: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> ElectionStatus {
    if now < start {
        ElectionStatus::NotStarted
    } else if now > end {
        ElectionStatus::Closed
    } else {
        ElectionStatus::Open
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_boundaries_are_inclusive() {
        let start = Utc::now();
        let end = start + Duration::hours(2);

        assert_eq!(
            classify(start - Duration::milliseconds(1), start, end),
            ElectionStatus::NotStarted
        );
        assert_eq!(classify(start, start, end), ElectionStatus::Open);
        assert_eq!(
            classify(start + Duration::hours(1), start, end),
            ElectionStatus::Open
        );
        assert_eq!(classify(end, start, end), ElectionStatus::Open);
        assert_eq!(
            classify(end + Duration::milliseconds(1), start, end),
            ElectionStatus::Closed
        );
    }

    #[test]
    fn fixed_clock_moves_on_request() {
        let t = Utc::now();
        let clock = FixedClock::new(t);
        assert_eq!(clock.now(), t);

        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), t + Duration::minutes(5));

        clock.set(t);
        assert_eq!(clock.now(), t);
    }
}
