use chrono::{DateTime, NaiveDate, Utc};

/// Source of "now" for every service. Days are UTC calendar days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn system() -> Self {
        Self::System
    }

    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }

    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// 2023-11-14T22:13:20Z, a Tuesday.
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Deterministic instant used by tests.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::from_timestamp(FIXED_TEST_TIMESTAMP, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration, Weekday};

    #[test]
    fn fixed_instant_is_a_tuesday() {
        assert_eq!(fixed_now().to_rfc3339(), "2023-11-14T22:13:20+00:00");
        assert_eq!(fixed_now().weekday(), Weekday::Tue);
    }

    #[test]
    fn fixed_clock_reports_its_day() {
        let clock = Clock::fixed(fixed_now() + Duration::hours(2));
        assert_eq!(clock.today(), fixed_now().date_naive().succ_opt().unwrap());
        assert_eq!(Clock::default(), Clock::system());
    }
}
