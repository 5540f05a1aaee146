//! Business dates (`YYYYMMDD` at every boundary, `NaiveDate` inside).

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use super::errors::ValidationError;

pub const DATE_FORMAT: &str = "%Y%m%d";

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Inclusive day range; empty when `start > end`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

pub fn next_day(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(1))
}

/// Which dates a run covers.
///
/// `Latest` resumes an incremental task from its checkpoint; the explicit
/// variants ignore the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DateContext {
    Latest,
    On { date: NaiveDate },
    Range { start: NaiveDate, end: NaiveDate },
}

impl DateContext {
    /// Build from optional `YYYYMMDD` strings as they arrive from callers.
    pub fn from_args(
        date: Option<&str>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let parse = |field: &'static str, s: &str| {
            parse_date(s).ok_or_else(|| ValidationError::new("-", field, format!("'{s}' is not YYYYMMDD")))
        };
        match (date, start, end) {
            (Some(d), None, None) => Ok(DateContext::On {
                date: parse("date", d)?,
            }),
            (None, Some(s), e) => {
                let start = parse("start_date", s)?;
                let end = match e {
                    Some(e) => parse("end_date", e)?,
                    None => start,
                };
                if start > end {
                    return Err(ValidationError::new("-", "start_date", "is after end_date"));
                }
                Ok(DateContext::Range { start, end })
            }
            (None, None, None) => Ok(DateContext::Latest),
            _ => Err(ValidationError::new(
                "-",
                "date",
                "use either a single date or a start/end range",
            )),
        }
    }

    /// The date a full-mode run is stamped with.
    pub fn run_date(&self, today: NaiveDate) -> NaiveDate {
        match *self {
            DateContext::Latest => today,
            DateContext::On { date } => date,
            DateContext::Range { end, .. } => end,
        }
    }
}
