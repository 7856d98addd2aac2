use crate::calendar::{bucket_start, Calendar, CalendarInput};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// Type aliases for clarity
pub type DayIndex = u32;
pub type Hour = u32;
pub type Rating = u8;

/// Ratings below this value mark a slot the tutor cannot be planned into.
pub const MIN_USABLE_RATING: Rating = 1;

/// The kind of duty a tutor performs in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Task {
    Tutorial,
    ExerciseTel,
    ExerciseMar,
    Grading,
}

impl Task {
    pub const ALL: [Task; 4] = [
        Task::Tutorial,
        Task::ExerciseTel,
        Task::ExerciseMar,
        Task::Grading,
    ];

    pub fn position(self) -> usize {
        match self {
            Task::Tutorial => 0,
            Task::ExerciseTel => 1,
            Task::ExerciseMar => 2,
            Task::Grading => 3,
        }
    }

    /// The room category that hosts this task.
    pub fn room_kind(self) -> RoomKind {
        match self {
            Task::Tutorial => RoomKind::Tutorial,
            Task::ExerciseTel => RoomKind::Exercise,
            Task::ExerciseMar => RoomKind::ExerciseMar,
            Task::Grading => RoomKind::Grading,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Task::Tutorial => "Tutorial",
            Task::ExerciseTel => "ExerciseTel",
            Task::ExerciseMar => "ExerciseMar",
            Task::Grading => "Grading",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum RoomKind {
    #[serde(rename = "tutorial")]
    Tutorial,
    /// TEL pool rooms.
    #[serde(rename = "exercise")]
    Exercise,
    #[serde(rename = "exerciseMAR")]
    ExerciseMar,
    #[serde(rename = "grading")]
    Grading,
}

impl RoomKind {
    pub fn task(self) -> Task {
        match self {
            RoomKind::Tutorial => Task::Tutorial,
            RoomKind::Exercise => Task::ExerciseTel,
            RoomKind::ExerciseMar => Task::ExerciseMar,
            RoomKind::Grading => Task::Grading,
        }
    }

    /// Pool rooms host several tutors at once.
    pub fn is_pool(self) -> bool {
        matches!(self, RoomKind::Exercise | RoomKind::ExerciseMar)
    }
}

/// Ratings per date and bucket start hour; `None` means no opportunity in that slot.
pub type Availability = BTreeMap<NaiveDate, BTreeMap<Hour, Option<Rating>>>;

/// A tutor with their working limits and availability.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tutor {
    pub last_name: String,
    #[serde(default)]
    pub first_name: Option<String>,
    pub monthly_work_hours: u32,
    pub max_hours_without_break: u32,
    pub max_tutorials_without_break: u32,
    #[serde(default)]
    pub availability: Availability,
}

impl Tutor {
    pub fn rating(&self, date: NaiveDate, hour: Hour) -> Option<Rating> {
        self.availability
            .get(&date)?
            .get(&bucket_start(hour))
            .copied()
            .flatten()
    }

    pub fn is_available(&self, date: NaiveDate, hour: Hour) -> bool {
        self.rating(date, hour)
            .is_some_and(|rating| rating >= MIN_USABLE_RATING)
    }
}

impl fmt::Display for Tutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.first_name {
            Some(first) => write!(f, "{} {}", first, self.last_name),
            None => f.write_str(&self.last_name),
        }
    }
}

/// A room and the slots reserved for it, keyed by date and bucket start hour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub capacity: u32,
    #[serde(default)]
    pub projector: bool,
    /// Reservations of this room are not tracked; it counts as booked everywhere.
    #[serde(default)]
    pub booking_exempt: bool,
    #[serde(default)]
    pub booked: BTreeMap<NaiveDate, BTreeSet<Hour>>,
}

impl Room {
    pub fn is_booked(&self, date: NaiveDate, hour: Hour) -> bool {
        self.booking_exempt
            || self
                .booked
                .get(&date)
                .is_some_and(|hours| hours.contains(&bucket_start(hour)))
    }
}

/// The raw domain input as read from disk or received over HTTP.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainInput {
    pub calendar: CalendarInput,
    pub tutors: Vec<Tutor>,
    pub rooms: Vec<Room>,
}

/// Values indexed by task, day and hour.
pub type TaskGrid<T> = BTreeMap<Task, BTreeMap<DayIndex, BTreeMap<Hour, T>>>;

/// Headcount per task and slot.
pub type CoarsePlan = TaskGrid<u32>;

/// Upper bound on the headcount per task and slot.
pub type TargetPlan = CoarsePlan;

/// Per tutor: whether they perform a task in a slot.
pub type TutorPlans = BTreeMap<String, TaskGrid<bool>>;

/// Per tutor: the room used for a task in a slot, empty when the task is not performed.
pub type TutorRoomPlans = BTreeMap<String, TaskGrid<String>>;

pub fn empty_grid<T: Clone>(calendar: &Calendar, value: T) -> TaskGrid<T> {
    Task::ALL
        .iter()
        .map(|task| {
            let days = calendar
                .day_indices()
                .map(|day| {
                    let hours = calendar
                        .hours()
                        .iter()
                        .map(|hour| (*hour, value.clone()))
                        .collect();
                    (day, hours)
                })
                .collect();
            (*task, days)
        })
        .collect()
}

pub fn cell<T>(grid: &TaskGrid<T>, task: Task, day: DayIndex, hour: Hour) -> Option<&T> {
    grid.get(&task)?.get(&day)?.get(&hour)
}

pub fn set_cell<T>(grid: &mut TaskGrid<T>, task: Task, day: DayIndex, hour: Hour, value: T) {
    grid.entry(task)
        .or_default()
        .entry(day)
        .or_default()
        .insert(hour, value);
}

/// Finds the task (and its room) a tutor performs in a slot of a room plan.
pub fn task_at(plan: &TaskGrid<String>, day: DayIndex, hour: Hour) -> Option<(Task, &str)> {
    Task::ALL.iter().find_map(|task| {
        cell(plan, *task, day, hour)
            .filter(|room| !room.is_empty())
            .map(|room| (*task, room.as_str()))
    })
}
