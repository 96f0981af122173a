//! Request windows and the names derived from them.
//!
//! Dates arrive as `DD.MM.YYYY` (or `DD/MM/YYYY`). A window covers whole
//! local days: it starts at local midnight of the first day and ends at local
//! midnight after the last day, both expressed as UTC epoch milliseconds.

use chrono::{Days, NaiveDate, TimeZone};
use chrono_tz::Tz;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveDate,
    /// First day *not* covered.
    pub end: NaiveDate,
    pub tz: Tz,
}

/// Parse `DD.MM.YYYY` or `DD/MM/YYYY`.
pub fn parse_day(text: &str) -> Result<NaiveDate> {
    let clean = text.trim().replace('/', ".");
    NaiveDate::parse_from_str(&clean, "%d.%m.%Y")
        .map_err(|e| Error::config(format!("invalid date '{}': {}", text, e)))
}

impl TimeWindow {
    /// Window from `start` through `end` inclusive; `end` defaults to `start`.
    pub fn from_days(start: &str, end: Option<&str>, tz: Tz) -> Result<Self> {
        let start = parse_day(start)?;
        let last = match end {
            Some(end) => parse_day(end)?,
            None => start,
        };
        if last < start {
            return Err(Error::config(format!(
                "end date {} is before start date {}",
                last, start
            )));
        }
        let end = last
            .checked_add_days(Days::new(1))
            .ok_or_else(|| Error::config(format!("end date {} out of range", last)))?;
        Ok(Self { start, end, tz })
    }

    pub fn start_ms(&self) -> Result<i64> {
        local_midnight_ms(self.tz, self.start)
    }

    pub fn end_ms(&self) -> Result<i64> {
        local_midnight_ms(self.tz, self.end)
    }

    /// Object name of the staged artifact for a category pair:
    /// `{main}/{sub}/{start}_to_{end}.parquet`.
    pub fn artifact_name(&self, main: &str, sub: &str) -> String {
        format!(
            "{}/{}/{}_to_{}.parquet",
            main,
            sub,
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

fn local_midnight_ms(tz: Tz, day: NaiveDate) -> Result<i64> {
    let naive = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::config(format!("no midnight on {}", day)))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| Error::config(format!("midnight of {} does not exist in {}", day, tz)))
}
