//! Date range planning
//!
//! Produces one entry per calendar day from `reference - lookback months` up to
//! and including `reference`. Each entry carries its 1-based ordinal, which is
//! what names the exported file.

use chrono::{Days, Months, NaiveDate};

use crate::errors::ExportError;

/// Default trailing window.
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 4;

/// Longest window accepted from configuration (ten years).
pub const MAX_LOOKBACK_MONTHS: u32 = 120;

/// Format the report date-range control accepts.
const DATE_FORMAT: &str = "%m/%d/%Y";

/// One day of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedDate {
    pub ordinal: u32,
    pub date: NaiveDate,
}

impl PlannedDate {
    /// `MM/DD/YYYY`
    pub fn formatted(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    /// Single-day window, e.g. `01/15/2024 - 01/15/2024`.
    pub fn date_range(&self) -> String {
        let day = self.formatted();
        format!("{day} - {day}")
    }

    pub fn artifact_name(&self) -> String {
        artifact_name(self.ordinal)
    }
}

/// File name for the export of the `ordinal`-th planned date.
pub fn artifact_name(ordinal: u32) -> String {
    format!("db_decay_{ordinal}.csv")
}

/// Inclusive, restartable range of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatePlan {
    start: NaiveDate,
    end: NaiveDate,
}

impl DatePlan {
    /// Month subtraction clamps to the end of shorter months (06/30 - 4 months = 02/29 in 2024).
    pub fn new(reference: NaiveDate, lookback_months: u32) -> Self {
        let start = reference
            .checked_sub_months(Months::new(lookback_months))
            .unwrap_or(NaiveDate::MIN);
        Self {
            start,
            end: reference,
        }
    }

    /// Like [`DatePlan::new`], but refuses windows longer than [`MAX_LOOKBACK_MONTHS`].
    pub fn try_new(reference: NaiveDate, lookback_months: u32) -> Result<Self, ExportError> {
        check_lookback(lookback_months)?;
        Ok(Self::new(reference, lookback_months))
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn first(&self) -> PlannedDate {
        PlannedDate {
            ordinal: 1,
            date: self.start,
        }
    }

    pub fn last(&self) -> PlannedDate {
        PlannedDate {
            ordinal: u32::try_from(self.len()).unwrap_or(u32::MAX),
            date: self.end,
        }
    }

    pub fn len(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// A fresh iterator over the plan, starting again from the first day.
    pub fn iter(&self) -> DatePlanIter {
        DatePlanIter {
            next: Some(self.start),
            end: self.end,
            ordinal: 1,
        }
    }
}

pub(crate) fn check_lookback(lookback_months: u32) -> Result<(), ExportError> {
    if lookback_months > MAX_LOOKBACK_MONTHS {
        return Err(ExportError::Config(format!(
            "lookback of {lookback_months} months exceeds the maximum of {MAX_LOOKBACK_MONTHS}"
        )));
    }
    Ok(())
}

impl IntoIterator for &DatePlan {
    type Item = PlannedDate;
    type IntoIter = DatePlanIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct DatePlanIter {
    next: Option<NaiveDate>,
    end: NaiveDate,
    ordinal: u32,
}

impl Iterator for DatePlanIter {
    type Item = PlannedDate;

    fn next(&mut self) -> Option<Self::Item> {
        let date = self.next.filter(|d| *d <= self.end)?;
        let item = PlannedDate {
            ordinal: self.ordinal,
            date,
        };
        self.ordinal += 1;
        self.next = date.checked_add_days(Days::new(1));
        Some(item)
    }
}
