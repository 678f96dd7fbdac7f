use crate::error::Error;
use chrono::{Datelike, Duration, NaiveDate};
use clap::ValueEnum;

/// Inclusive range of calendar days to ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl IngestionWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, Error> {
        if start > end {
            return Err(Error::StartDateAfterEndDate {
                start_date: start.to_string(),
                end_date: end.to_string(),
            });
        }

        Ok(IngestionWindow { start, end })
    }

    pub fn single_day(day: NaiveDate) -> Self {
        IngestionWindow {
            start: day,
            end: day,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Days in ascending order, both ends included.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }

    pub fn len(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }
}

/// Named windows relative to the run date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RelativeWindow {
    #[value(name = "today")]
    Today,
    #[value(name = "last3days")]
    Last3Days,
    #[value(name = "last7days")]
    Last7Days,
    #[value(name = "thismonth")]
    ThisMonth,
    #[value(name = "lastmonth")]
    LastMonth,
}

impl RelativeWindow {
    pub fn resolve(self, today: NaiveDate) -> IngestionWindow {
        match self {
            RelativeWindow::Today => IngestionWindow::single_day(today),
            RelativeWindow::Last3Days => IngestionWindow {
                start: today - Duration::days(3),
                end: today,
            },
            RelativeWindow::Last7Days => IngestionWindow {
                start: today - Duration::days(7),
                end: today,
            },
            RelativeWindow::ThisMonth => IngestionWindow {
                start: first_of_month(today),
                end: today,
            },
            RelativeWindow::LastMonth => {
                let end = first_of_month(today) - Duration::days(1);
                IngestionWindow {
                    start: first_of_month(end),
                    end,
                }
            }
        }
    }
}

fn first_of_month(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.day0()))
}

pub fn validate_date(s: &str) -> Result<NaiveDate, String> {
    let error_message = "Invalid date, expected YYYY-MM-DD";

    let parts = s
        .split("-")
        .map(|part| part.parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| error_message)?;

    match parts.as_slice() {
        &[year, month, day] if month <= 12 && day <= 31 => {
            Ok(
                NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .ok_or(error_message)?,
            )
        }
        _ => Err(error_message.to_string()),
    }
}
