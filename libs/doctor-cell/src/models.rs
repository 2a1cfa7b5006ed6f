use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Practitioner {
    /// Same value as the practitioner's auth user id.
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub specialty: Option<String>,
    /// Fixed UTC offset such as `UTC` or `+02:00`.
    pub timezone: String,
    #[serde(default)]
    pub availability_template: Vec<WeeklyWindow>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Practitioner {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// One recurring block of working time, in the practitioner's local clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeeklyWindow {
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl WeeklyWindow {
    pub fn new(weekday: Weekday, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self { weekday, start_time, end_time }
    }
}

/// Half-open `[start, end)` interval in absolute time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Bookable interval as returned to callers. Derived, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailableSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i64,
}

impl From<TimeInterval> for AvailableSlot {
    fn from(interval: TimeInterval) -> Self {
        Self {
            start_time: interval.start,
            end_time: interval.end,
            duration_minutes: interval.duration().num_minutes(),
        }
    }
}

/// Inclusive range of local calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate, max_days: i64) -> Result<Self, AvailabilityError> {
        if to < from {
            return Err(AvailabilityError::InvalidRange(format!(
                "range end {} is before start {}",
                to, from
            )));
        }

        let days = (to - from).num_days() + 1;
        if days > max_days {
            return Err(AvailabilityError::InvalidRange(format!(
                "range spans {} days, maximum is {}",
                days, max_days
            )));
        }

        Ok(Self { from, to })
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + Clone {
        let to = self.to;
        self.from.iter_days().take_while(move |day| *day <= to)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateAvailabilityTemplateRequest {
    pub timezone: Option<String>,
    pub availability_template: Vec<WeeklyWindow>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PractitionerSearchFilters {
    pub specialty: Option<String>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AvailabilityError {
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid availability template: {0}")]
    InvalidTemplate(String),
}

#[derive(Debug, Error)]
pub enum DoctorError {
    #[error("Practitioner not found")]
    NotFound,

    #[error("Not allowed to manage this practitioner profile")]
    Unauthorized,

    #[error(transparent)]
    Availability(#[from] AvailabilityError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Malformed practitioner record: {0}")]
    Decode(String),
}
