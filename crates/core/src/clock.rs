//! Process-local monotonic wall clock.

use std::sync::Mutex;

use chrono::{DateTime, SubsecRound, Utc};

/// Hands out UTC timestamps that never go backwards within this process.
///
/// Timestamps are truncated to microseconds, the precision of the Postgres
/// log, so a stored event reads back equal to the one that was published.
///
/// If the system clock steps back, the previous timestamp is repeated until
/// wall time catches up. No guarantee is made across processes.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.observe(Utc::now())
    }

    /// Fold a wall-clock reading into the clock and return the issued timestamp.
    pub fn observe(&self, wall: DateTime<Utc>) -> DateTime<Utc> {
        let wall = wall.trunc_subsecs(6);
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let issued = match *last {
            Some(prev) if prev > wall => prev,
            _ => wall,
        };
        *last = Some(issued);
        issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn never_goes_backwards() {
        let clock = MonotonicClock::new();
        let t0 = Utc::now().trunc_subsecs(6);
        assert_eq!(clock.observe(t0), t0);
        assert_eq!(clock.observe(t0 - Duration::seconds(5)), t0);
        let later = t0 + Duration::milliseconds(1);
        assert_eq!(clock.observe(later), later);
    }

    #[test]
    fn timestamps_carry_whole_microseconds() {
        let clock = MonotonicClock::new();
        let wall = DateTime::parse_from_rfc3339("2024-05-01T12:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let issued = clock.observe(wall);
        assert_eq!(issued.to_rfc3339(), "2024-05-01T12:00:00.123456+00:00");
        assert_eq!(clock.now().timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn now_is_non_decreasing() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next >= prev);
            prev = next;
        }
    }
}
