use crate::data::{DayIndex, Hour};
use crate::error::DataError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::{Range, RangeInclusive};

/// Number of planned days: two five-day weeks.
pub const PLANNING_DAYS: usize = 10;
pub const DAYS_PER_WEEK: DayIndex = 5;

/// Bookings and availability ratings are recorded per two-hour bucket.
pub const BUCKET_HOURS: Hour = 2;

/// Start hour of the bucket containing `hour`.
pub fn bucket_start(hour: Hour) -> Hour {
    hour - hour % BUCKET_HOURS
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalendarInput {
    pub days: Vec<NaiveDate>,
    pub hours: Vec<Hour>,
}

/// The planning calendar: day indices `1..=10` mapped one-to-one onto dates,
/// and the ordered hour slots of every day.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "CalendarInput", into = "CalendarInput")]
pub struct Calendar {
    days: Vec<NaiveDate>,
    hours: Vec<Hour>,
}

impl TryFrom<CalendarInput> for Calendar {
    type Error = DataError;

    fn try_from(input: CalendarInput) -> Result<Self, Self::Error> {
        Calendar::new(input.days, input.hours)
    }
}

impl From<Calendar> for CalendarInput {
    fn from(calendar: Calendar) -> Self {
        CalendarInput {
            days: calendar.days,
            hours: calendar.hours,
        }
    }
}

impl Calendar {
    pub fn new(days: Vec<NaiveDate>, hours: Vec<Hour>) -> Result<Self, DataError> {
        if days.len() != PLANNING_DAYS {
            return Err(DataError::CalendarLength {
                expected: PLANNING_DAYS,
                found: days.len(),
            });
        }
        let mut seen = HashSet::new();
        for day in &days {
            if !seen.insert(*day) {
                return Err(DataError::DuplicateDate(*day));
            }
        }
        let consecutive = hours.windows(2).all(|pair| pair[1] == pair[0] + 1);
        if hours.is_empty() || !consecutive {
            return Err(DataError::InvalidHours);
        }
        Ok(Calendar { days, hours })
    }

    pub fn day_indices(&self) -> RangeInclusive<DayIndex> {
        1..=PLANNING_DAYS as DayIndex
    }

    pub fn first_week(&self) -> RangeInclusive<DayIndex> {
        1..=DAYS_PER_WEEK
    }

    pub fn second_week(&self) -> RangeInclusive<DayIndex> {
        DAYS_PER_WEEK + 1..=PLANNING_DAYS as DayIndex
    }

    /// Days strictly before the cutover day; treated as history by rolling planning.
    pub fn past_days(&self, cutover: DayIndex) -> Range<DayIndex> {
        1..cutover.min(PLANNING_DAYS as DayIndex + 1)
    }

    /// Days at or after the cutover day.
    pub fn coming_days(&self, cutover: DayIndex) -> RangeInclusive<DayIndex> {
        cutover.max(1)..=PLANNING_DAYS as DayIndex
    }

    pub fn hours(&self) -> &[Hour] {
        &self.hours
    }

    pub fn first_hour(&self) -> Hour {
        self.hours[0]
    }

    /// Pairs `(h, h + 1)` of adjacent hours within a day.
    pub fn adjacent_hours(&self) -> impl Iterator<Item = (Hour, Hour)> + '_ {
        self.hours.windows(2).map(|pair| (pair[0], pair[1]))
    }

    pub fn slots(&self) -> impl Iterator<Item = (DayIndex, Hour)> + '_ {
        self.day_indices()
            .flat_map(move |day| self.hours.iter().map(move |hour| (day, *hour)))
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.days
    }

    pub fn date(&self, day: DayIndex) -> Option<NaiveDate> {
        let position = usize::try_from(day).ok()?.checked_sub(1)?;
        self.days.get(position).copied()
    }

    pub fn day_index(&self, date: NaiveDate) -> Option<DayIndex> {
        self.days
            .iter()
            .position(|d| *d == date)
            .map(|position| position as DayIndex + 1)
    }

    pub fn contains_hour(&self, hour: Hour) -> bool {
        self.hours.contains(&hour)
    }

    /// Looks up a planned date by month and day of month.
    pub fn find_date(&self, month: u32, day: u32) -> Option<NaiveDate> {
        use chrono::Datelike;
        self.days
            .iter()
            .copied()
            .find(|date| date.month() == month && date.day() == day)
    }

    pub fn day_label(&self, day: DayIndex) -> String {
        match self.date(day) {
            Some(date) => date.format("%A, %d.%m.").to_string(),
            None => format!("Day {day}"),
        }
    }
}
