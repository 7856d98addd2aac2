use crate::data::{DayIndex, Hour, Task};
use chrono::NaiveDate;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors in the domain data, target plan or configuration references.
/// Raised before any solve begins.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("calendar must contain exactly {expected} days, found {found}")]
    CalendarLength { expected: usize, found: usize },
    #[error("date {0} appears more than once in the calendar")]
    DuplicateDate(NaiveDate),
    #[error("planning hours must be non-empty, ascending and consecutive")]
    InvalidHours,
    #[error("duplicate tutor: {0}")]
    DuplicateTutor(String),
    #[error("duplicate room: {0}")]
    DuplicateRoom(String),
    #[error("tutor not found: {0}")]
    UnknownTutor(String),
    #[error("room not found: {0}")]
    UnknownRoom(String),
    #[error("tutor {0} has no availability entries")]
    MissingAvailability(String),
    #[error("target plan has no value for {task} on day {day} at {hour}")]
    MalformedTargetPlan { task: Task, day: DayIndex, hour: Hour },
    #[error("no candidate room for task {0}")]
    NoRoomForTask(Task),
    #[error("date {0} is not part of the planning calendar")]
    DateOutsideCalendar(NaiveDate),
    #[error("day {0} is not part of the planning calendar")]
    UnknownDay(DayIndex),
    #[error("cutover day {0} must lie within 2..=10")]
    InvalidCutover(DayIndex),
}

/// A stage of the planning pipeline could not be solved.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("stage {stage} ({name}) is infeasible")]
    Infeasible {
        stage: usize,
        name: &'static str,
        /// Constraint groups that together cannot be satisfied, when diagnosis succeeded.
        conflicting_groups: Option<Vec<String>>,
    },
    #[error("stage {stage} ({name}) failed: {message}")]
    Solver {
        stage: usize,
        name: &'static str,
        message: String,
    },
    #[error("no stage was run")]
    EmptyPipeline,
    #[error("stage {0} needs a past plan but none was supplied")]
    MissingHistory(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A manual edit conflicts with the current plan. The plan is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("{tutor} has already a task at {date} {hour}")]
    TutorBusy {
        tutor: String,
        date: NaiveDate,
        hour: Hour,
    },
    #[error("{tutor} is unavailable at {date} {hour}")]
    TutorUnavailable {
        tutor: String,
        date: NaiveDate,
        hour: Hour,
    },
    #[error("{room} is not booked at {date} {hour}")]
    RoomNotBooked {
        room: String,
        date: NaiveDate,
        hour: Hour,
    },
    #[error("{room} has already a task at {date} {hour}")]
    RoomOccupied {
        room: String,
        date: NaiveDate,
        hour: Hour,
    },
    #[error("{tutor} has no task at {date} {hour}")]
    NoTask {
        tutor: String,
        date: NaiveDate,
        hour: Hour,
    },
    #[error("task of {tutor} at {date} {hour} is not in {room}")]
    WrongRoom {
        tutor: String,
        date: NaiveDate,
        hour: Hour,
        room: String,
    },
}

/// A flat tutor-room plan could not be turned back into a personal plan.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Edit(#[from] EditError),
}

/// A textual task reference could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskParseError {
    #[error("expected TUTOR DATE HOUR ROOM")]
    Arity,
    #[error("invalid date format: {0}")]
    DateFormat(String),
    #[error("date not in calendar: {0}")]
    DateOutsideCalendar(String),
    #[error("invalid hour: {0}")]
    Hour(String),
    #[error("tutor not found: {0}")]
    UnknownTutor(String),
    #[error("room not found: {0}")]
    UnknownRoom(String),
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("malformed change log line {line:?}")]
    Malformed { line: String },
    #[error("invalid task in change log line {line:?}: {source}")]
    Task {
        line: String,
        #[source]
        source: TaskParseError,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid json in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no active plan")]
    NoActivePlan,
    #[error("no working plan")]
    NoWorkingPlan,
    #[error("no parent plan")]
    NoParentPlan,
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors of operations on the working copy.
#[derive(Debug, Error)]
pub enum WorkingError {
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error(transparent)]
    Parse(#[from] TaskParseError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("change log is empty")]
    EmptyLog,
}

/// Top-level error of the planner service.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Working(#[from] WorkingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_messages() {
        let date = NaiveDate::from_ymd_opt(2016, 10, 18).unwrap();
        let busy = EditError::TutorBusy {
            tutor: "Anna A".into(),
            date,
            hour: 10,
        };
        assert_eq!(busy.to_string(), "Anna A has already a task at 2016-10-18 10");
        let wrong = EditError::WrongRoom {
            tutor: "Anna A".into(),
            date,
            hour: 10,
            room: "MAR 0.001".into(),
        };
        assert_eq!(
            wrong.to_string(),
            "task of Anna A at 2016-10-18 10 is not in MAR 0.001"
        );
    }

    #[test]
    fn test_infeasible_names_stage() {
        let err = PlanError::Infeasible {
            stage: 3,
            name: "maximize_min_happiness",
            conflicting_groups: None,
        };
        assert_eq!(err.to_string(), "stage 3 (maximize_min_happiness) is infeasible");
    }
}
