//! Source of "today" for every day-boundary decision.
//!
//! A single implicit clock is used for all users; the per-user timezone is
//! stored on the profile but not applied here.

use std::sync::Mutex;

use chrono::{DateTime, Days, Local, NaiveDate, NaiveTime, Utc};

pub trait Clock: Send + Sync {
    /// Calendar date used for mainline lookup and streak accounting.
    fn today(&self) -> NaiveDate;

    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock in the process's local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock pinned to a date.
#[derive(Debug)]
pub struct FixedClock {
    date: Mutex<NaiveDate>,
}

impl FixedClock {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: Mutex::new(date),
        }
    }

    pub fn set(&self, date: NaiveDate) {
        if let Ok(mut d) = self.date.lock() {
            *d = date;
        }
    }

    /// Move forward by `days` calendar days.
    pub fn advance_days(&self, days: u64) {
        if let Ok(mut d) = self.date.lock()
            && let Some(next) = d.checked_add_days(Days::new(days))
        {
            *d = next;
        }
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        match self.date.lock() {
            Ok(d) => *d,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.today().and_time(NaiveTime::default()).and_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_across_month_end() {
        let clock = FixedClock::new(NaiveDate::from_ymd_opt(2025, 1, 31).expect("date"));
        clock.advance_days(1);
        assert_eq!(
            clock.today(),
            NaiveDate::from_ymd_opt(2025, 2, 1).expect("date")
        );
        assert_eq!(clock.now().date_naive(), clock.today());
    }

    #[test]
    fn fixed_clock_can_be_reset() {
        let clock = FixedClock::new(NaiveDate::from_ymd_opt(2025, 5, 5).expect("date"));
        let target = NaiveDate::from_ymd_opt(2024, 12, 24).expect("date");
        clock.set(target);
        assert_eq!(clock.today(), target);
    }
}
