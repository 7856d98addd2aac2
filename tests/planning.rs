mod common;

use tutor_planner::config::Config;
use tutor_planner::data::{Task, TaskGrid, cell, task_at};
use tutor_planner::model::ModelBuilder;
use tutor_planner::planner::{NoArtifacts, Planner};
use tutor_planner::stages::{History, INITIAL_STAGES, ROLLING_STAGES};

fn worked(plan: &TaskGrid<bool>, day: u32, hour: u32) -> u32 {
    Task::ALL
        .into_iter()
        .filter(|task| cell(plan, *task, day, hour).copied().unwrap_or(false))
        .count() as u32
}

#[test]
fn initial_plan_respects_demand_cap_and_pauses() {
    let snapshot = common::snapshot();
    let config = Config::default();
    let target = common::target(&snapshot);
    let builder = ModelBuilder::new(&snapshot, &config, &target).unwrap();
    let outcome = Planner::new(builder).plan_initial(&mut NoArtifacts).unwrap();

    assert_eq!(outcome.stages.len(), INITIAL_STAGES.len());
    assert!(outcome.stages[0].objective.abs() < 1e-6, "all demand can be covered");

    let calendar = snapshot.calendar();
    for task in Task::ALL {
        for (day, hour) in calendar.slots() {
            assert!(
                cell(&outcome.projection.coarse, task, day, hour)
                    <= cell(&target, task, day, hour)
            );
        }
    }

    for tutor in snapshot.tutors() {
        let plan = &outcome.projection.tutors[&tutor.last_name];
        let window = tutor.max_hours_without_break as usize + 1;
        for day in calendar.day_indices() {
            for hours in calendar.hours().windows(window) {
                let load: u32 = hours.iter().map(|hour| worked(plan, day, *hour)).sum();
                assert!(load <= tutor.max_hours_without_break);
            }
        }
    }

    let rooms = outcome.projection.rooms.as_ref().unwrap();
    for (tutor, plan) in &outcome.projection.tutors {
        for task in Task::ALL {
            for (day, hour) in calendar.slots() {
                let has_room = cell(&rooms[tutor], task, day, hour).is_some_and(|r| !r.is_empty());
                assert_eq!(cell(plan, task, day, hour).copied().unwrap_or(false), has_room);
            }
        }
    }
}

#[test]
fn rolling_plan_keeps_days_before_cutover() {
    let snapshot = common::snapshot();
    let config = Config::default();
    let target = common::target(&snapshot);

    let builder = ModelBuilder::new(&snapshot, &config, &target).unwrap();
    let initial = Planner::new(builder).plan_initial(&mut NoArtifacts).unwrap();
    let past = initial.projection.rooms.unwrap();

    let builder = ModelBuilder::new(&snapshot, &config, &target).unwrap();
    let history = History { past, cutover: 4 };
    let rolling = Planner::new(builder)
        .plan_rolling(&history, &mut NoArtifacts)
        .unwrap();
    assert_eq!(rolling.stages.len(), ROLLING_STAGES.len());

    let rooms = rolling.projection.rooms.unwrap();
    for tutor in snapshot.tutors() {
        for day in 1..4 {
            for hour in snapshot.calendar().hours() {
                assert_eq!(
                    task_at(&rooms[&tutor.last_name], day, *hour),
                    task_at(&history.past[&tutor.last_name], day, *hour),
                    "{} on day {day} at {hour}",
                    tutor.last_name
                );
            }
        }
    }
}

#[test]
fn deviation_stage_alone_with_zero_target() {
    let snapshot = common::snapshot();
    let mut config = Config::default();
    for tutor in snapshot.tutors() {
        config.specific_working_hours.insert(
            tutor.last_name.clone(),
            serde_json::from_value(serde_json::json!({
                "total": { "min": 0, "max": 0 },
                "firstWeek": { "min": 0, "max": 0 },
                "secondWeek": { "min": 0, "max": 0 }
            }))
            .unwrap(),
        );
    }
    let target = tutor_planner::data::empty_grid(snapshot.calendar(), 0);
    let builder = ModelBuilder::new(&snapshot, &config, &target).unwrap();
    let outcome = Planner::new(builder)
        .stop_after(1)
        .plan_initial(&mut NoArtifacts)
        .unwrap();

    assert_eq!(outcome.stages.len(), 1);
    assert!(outcome.stages[0].objective.abs() < 1e-6);
    for plan in outcome.projection.tutors.values() {
        for (day, hour) in snapshot.calendar().slots() {
            assert_eq!(worked(plan, day, hour), 0);
        }
    }
}
