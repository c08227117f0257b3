use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Inclusive calendar-day window, used for lookback fetches and range
/// reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::StartAfterEnd);
        }
        Ok(Self { start, end })
    }

    pub fn single_day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Window covering `days` of history up to and including `end`.
    /// `days == 0` collapses to the single day `end`.
    pub fn lookback(end: NaiveDate, days: u32) -> Self {
        let start = end
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(end);
        Self { start, end }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn days(&self) -> u32 {
        (self.end - self.start).num_days() as u32 + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// All days in the window, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut result = Vec::with_capacity(self.days() as usize);
        let mut current = self.start;

        while current <= self.end {
            result.push(current);
            current = current
                .checked_add_days(Days::new(1))
                .expect("date overflow within a valid range");
        }

        result
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DateRangeError {
    #[error("Start date must be before or equal to end date")]
    StartAfterEnd,
}
