#![allow(dead_code)]

use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tutor_planner::config::Config;
use tutor_planner::data::{DomainInput, Task, TargetPlan, empty_grid, set_cell};
use tutor_planner::snapshot::DomainSnapshot;

pub const DATES: [&str; 10] = [
    "2016-10-17", "2016-10-18", "2016-10-19", "2016-10-20", "2016-10-21",
    "2016-10-24", "2016-10-25", "2016-10-26", "2016-10-27", "2016-10-28",
];

fn every_day(value: Value) -> Value {
    Value::Object(
        DATES
            .iter()
            .map(|date| (date.to_string(), value.clone()))
            .collect(),
    )
}

/// Two tutors, one tutorial room and one TEL pool room, four hours a day.
pub fn domain_input() -> DomainInput {
    serde_json::from_value(json!({
        "calendar": { "days": DATES, "hours": [10, 11, 12, 13] },
        "tutors": [
            {
                "lastName": "Berg", "firstName": "Bea", "monthlyWorkHours": 40,
                "maxHoursWithoutBreak": 2, "maxTutorialsWithoutBreak": 2,
                "availability": every_day(json!({ "10": 3, "12": 2 }))
            },
            {
                "lastName": "Adler", "firstName": "Ada", "monthlyWorkHours": 40,
                "maxHoursWithoutBreak": 4, "maxTutorialsWithoutBreak": 2,
                "availability": every_day(json!({ "10": 2, "12": 3 }))
            }
        ],
        "rooms": [
            {
                "name": "MAR 0.001", "type": "tutorial", "capacity": 30,
                "booked": every_day(json!([10, 12]))
            },
            {
                "name": "TEL 106li", "type": "exercise", "capacity": 60,
                "booked": every_day(json!([10, 12]))
            }
        ]
    }))
    .unwrap()
}

pub fn snapshot() -> DomainSnapshot {
    DomainSnapshot::new(domain_input()).unwrap()
}

/// One tutorial in the morning hours and one TEL exercise in the afternoon hours of every day.
pub fn target(snapshot: &DomainSnapshot) -> TargetPlan {
    let calendar = snapshot.calendar();
    let mut target = empty_grid(calendar, 0);
    for day in calendar.day_indices() {
        for hour in [10, 11] {
            set_cell(&mut target, Task::Tutorial, day, hour, 1);
        }
        for hour in [12, 13] {
            set_cell(&mut target, Task::ExerciseTel, day, hour, 1);
        }
    }
    target
}

pub fn config(plans: PathBuf) -> Config {
    let mut config = Config::default();
    config.paths.plans = plans;
    config
}

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

pub fn scratch_dir(label: &str) -> PathBuf {
    let n = NEXT_DIR.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "tutor_planner-it-{label}-{}-{n}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
