use crate::calendar::Calendar;
use crate::data::{
    DayIndex, Hour, RoomKind, Task, TaskGrid, TutorPlans, TutorRoomPlans, cell, task_at,
};
use crate::snapshot::{DomainSnapshot, TutorId};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

pub fn workload(plan: &TaskGrid<bool>, days: impl IntoIterator<Item = DayIndex>) -> u32 {
    let days: BTreeSet<DayIndex> = days.into_iter().collect();
    plan.values()
        .flat_map(|by_day| by_day.iter())
        .filter(|(day, _)| days.contains(*day))
        .flat_map(|(_, by_hour)| by_hour.values())
        .filter(|worked| **worked)
        .count() as u32
}

/// Average rating over the assigned slots; `None` when the tutor does not work.
pub fn happiness(snapshot: &DomainSnapshot, tutor: TutorId, plan: &TaskGrid<bool>) -> Option<f64> {
    let mut hours = 0u32;
    let mut rating = 0.0;
    for by_day in plan.values() {
        for (day, by_hour) in by_day {
            for (hour, worked) in by_hour {
                if *worked {
                    hours += 1;
                    rating += snapshot.rating_weight(tutor, *day, *hour);
                }
            }
        }
    }
    (hours > 0).then(|| rating / f64::from(hours))
}

/// Largest ratio of worked to expected hours; tutors expected to work nothing are skipped.
pub fn max_workload(
    snapshot: &DomainSnapshot,
    plans: &TutorPlans,
    expected: impl Fn(TutorId) -> f64,
) -> f64 {
    let days = snapshot.calendar().day_indices();
    snapshot
        .tutors()
        .iter()
        .enumerate()
        .filter_map(|(id, tutor)| {
            let expected = expected(id);
            let plan = plans.get(&tutor.last_name)?;
            (expected > 0.0).then(|| f64::from(workload(plan, days.clone())) / expected)
        })
        .fold(0.0, f64::max)
}

pub fn min_happiness(snapshot: &DomainSnapshot, plans: &TutorPlans) -> Option<f64> {
    snapshot
        .tutors()
        .iter()
        .enumerate()
        .filter_map(|(id, tutor)| happiness(snapshot, id, plans.get(&tutor.last_name)?))
        .reduce(f64::min)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorSummary {
    pub tutor: String,
    pub total: u32,
    pub first_week: u32,
    pub second_week: u32,
    pub happiness: Option<f64>,
    /// Worked hours relative to the expected hours; undefined for tutors expected to work nothing.
    pub workload_ratio: Option<f64>,
}

pub fn summarize(
    snapshot: &DomainSnapshot,
    plans: &TutorPlans,
    expected: impl Fn(TutorId) -> f64,
) -> Vec<TutorSummary> {
    let calendar = snapshot.calendar();
    snapshot
        .tutors()
        .iter()
        .enumerate()
        .filter_map(|(id, tutor)| {
            let plan = plans.get(&tutor.last_name)?;
            let total = workload(plan, calendar.day_indices());
            let expected = expected(id);
            Some(TutorSummary {
                tutor: tutor.last_name.clone(),
                total,
                first_week: workload(plan, calendar.first_week()),
                second_week: workload(plan, calendar.second_week()),
                happiness: happiness(snapshot, id, plan),
                workload_ratio: (expected > 0.0).then(|| f64::from(total) / expected),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotSeries {
    pub tutors: Vec<String>,
    pub workload_ratio: Vec<Option<f64>>,
    pub happiness: Vec<Option<f64>>,
}

pub fn plot_series(summaries: &[TutorSummary]) -> PlotSeries {
    PlotSeries {
        tutors: summaries.iter().map(|s| s.tutor.clone()).collect(),
        workload_ratio: summaries.iter().map(|s| s.workload_ratio).collect(),
        happiness: summaries.iter().map(|s| s.happiness).collect(),
    }
}

pub fn tutor_report(
    calendar: &Calendar,
    summary: &TutorSummary,
    plan: &TaskGrid<bool>,
    rooms: Option<&TaskGrid<String>>,
) -> String {
    let happiness = summary
        .happiness
        .map_or_else(|| "undefined".to_string(), |h| format!("{h:.2}"));
    let mut report = format!(
        "Tutor: {}\tTotal hours: {}\tFirst week: {}\tSecond week: {}\tHappiness (1 to 3): {}\n\n",
        summary.tutor, summary.total, summary.first_week, summary.second_week, happiness
    );
    for day in calendar.day_indices() {
        let mut lines = Vec::new();
        for hour in calendar.hours() {
            for task in Task::ALL {
                if !cell(plan, task, day, *hour).copied().unwrap_or(false) {
                    continue;
                }
                let mut line = format!("{hour} to {} --> {task}", hour + 1);
                if let Some(room) = rooms.and_then(|r| cell(r, task, day, *hour)) {
                    line.push_str(&format!(" --> {room}"));
                }
                lines.push(line);
            }
        }
        if !lines.is_empty() {
            report.push_str(&format!("{}:\n", calendar.day_label(day)));
            for line in lines {
                report.push_str(&line);
                report.push('\n');
            }
            report.push('\n');
        }
    }
    report
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanChange {
    pub tutor: String,
    pub day: DayIndex,
    pub hour: Hour,
    pub old_task: Option<Task>,
    pub new_task: Option<Task>,
    pub old_room: Option<String>,
    pub new_room: Option<String>,
}

pub fn plan_diff(calendar: &Calendar, old: &TutorRoomPlans, new: &TutorRoomPlans) -> Vec<PlanChange> {
    let tutors: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let mut changes = Vec::new();
    for tutor in tutors {
        for (day, hour) in calendar.slots() {
            let before = old.get(tutor).and_then(|plan| task_at(plan, day, hour));
            let after = new.get(tutor).and_then(|plan| task_at(plan, day, hour));
            if before != after {
                changes.push(PlanChange {
                    tutor: tutor.clone(),
                    day,
                    hour,
                    old_task: before.map(|(task, _)| task),
                    new_task: after.map(|(task, _)| task),
                    old_room: before.map(|(_, room)| room.to_string()),
                    new_room: after.map(|(_, room)| room.to_string()),
                });
            }
        }
    }
    changes
}

fn describe(task: Option<Task>, room: Option<&String>) -> String {
    match (task, room) {
        (Some(task), Some(room)) => format!("{task} in {room}"),
        (Some(task), None) => task.to_string(),
        _ => "nothing".to_string(),
    }
}

pub fn change_report(calendar: &Calendar, tutor: &str, changes: &[PlanChange]) -> String {
    let mut report = format!("Changes for {tutor}\n\n");
    let mine: Vec<_> = changes.iter().filter(|c| c.tutor == tutor).collect();
    if mine.is_empty() {
        report.push_str("no changes\n");
        return report;
    }
    let mut current_day = None;
    for change in mine {
        if current_day != Some(change.day) {
            report.push_str(&format!("{}:\n", calendar.day_label(change.day)));
            current_day = Some(change.day);
        }
        report.push_str(&format!(
            "{} to {}: {} --> {}\n",
            change.hour,
            change.hour + 1,
            describe(change.old_task, change.old_room.as_ref()),
            describe(change.new_task, change.new_room.as_ref()),
        ));
    }
    report
}

/// Tutorial seats in use on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCapacity {
    pub day: DayIndex,
    pub date: Option<NaiveDate>,
    pub capacity: u32,
    pub conservative: u32,
    /// The conservative sum with 2, 4 and 6 extra seats per tutorial.
    pub conservative_plus: [u32; 3],
}

pub fn tutorial_capacity(
    snapshot: &DomainSnapshot,
    plans: &TutorRoomPlans,
    conservative_size: u32,
) -> Vec<DayCapacity> {
    let calendar = snapshot.calendar();
    calendar
        .day_indices()
        .map(|day| {
            let capacities: Vec<u32> = plans
                .values()
                .flat_map(move |plan| {
                    calendar
                        .hours()
                        .iter()
                        .filter_map(move |hour| cell(plan, Task::Tutorial, day, *hour))
                })
                .filter(|room| !room.is_empty())
                .filter_map(|room| snapshot.room_id(room).map(|id| snapshot.room(id)))
                .filter(|room| room.kind == RoomKind::Tutorial)
                .map(|room| room.capacity)
                .collect();
            let tutorials = capacities.len() as u32;
            let conservative = capacities
                .iter()
                .map(|capacity| (*capacity).min(conservative_size))
                .sum::<u32>();
            DayCapacity {
                day,
                date: calendar.date(day),
                capacity: capacities.iter().sum(),
                conservative,
                conservative_plus: [2, 4, 6].map(|extra| conservative + extra * tutorials),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{empty_grid, set_cell};
    use crate::snapshot::tests::fixture;

    fn plans_with(entries: &[(&str, Task, DayIndex, Hour, &str)]) -> (TutorPlans, TutorRoomPlans) {
        let snapshot = fixture();
        let calendar = snapshot.calendar();
        let mut plans = TutorPlans::new();
        let mut rooms = TutorRoomPlans::new();
        for tutor in snapshot.tutors() {
            plans.insert(tutor.last_name.clone(), empty_grid(calendar, false));
            rooms.insert(tutor.last_name.clone(), empty_grid(calendar, String::new()));
        }
        for (tutor, task, day, hour, room) in entries {
            set_cell(plans.get_mut(*tutor).unwrap(), *task, *day, *hour, true);
            set_cell(rooms.get_mut(*tutor).unwrap(), *task, *day, *hour, room.to_string());
        }
        (plans, rooms)
    }

    #[test]
    fn test_workload_and_happiness() {
        let snapshot = fixture();
        let (plans, _) = plans_with(&[
            ("A", Task::Tutorial, 2, 10, "MAR 0.001"),
            ("A", Task::ExerciseTel, 2, 16, "TEL 106li"),
            ("A", Task::ExerciseTel, 7, 10, "TEL 106li"),
        ]);
        let plan = &plans["A"];
        assert_eq!(workload(plan, snapshot.calendar().day_indices()), 3);
        assert_eq!(workload(plan, snapshot.calendar().first_week()), 2);
        // ratings 3 and 2 on day 2, none on day 7
        assert_eq!(happiness(&snapshot, 0, plan), Some(5.0 / 3.0));
        assert_eq!(happiness(&snapshot, 1, &plans["B"]), None);
    }

    #[test]
    fn test_max_workload_skips_zero_expectation() {
        let snapshot = fixture();
        let (plans, _) = plans_with(&[
            ("A", Task::Tutorial, 2, 10, "MAR 0.001"),
            ("A", Task::Tutorial, 2, 11, "MAR 0.001"),
            ("B", Task::Grading, 2, 12, "X"),
        ]);
        let expected = |id: TutorId| if id == 1 { 0.0 } else { 20.0 };
        assert_eq!(max_workload(&snapshot, &plans, expected), 0.1);
        let summaries = summarize(&snapshot, &plans, expected);
        assert_eq!(summaries[1].workload_ratio, None);
        assert_eq!(summaries[0].workload_ratio, Some(0.1));
        let series = plot_series(&summaries);
        assert_eq!(series.tutors, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_min_happiness_ignores_idle_tutors() {
        let snapshot = fixture();
        let (plans, _) = plans_with(&[
            ("A", Task::Tutorial, 2, 10, "MAR 0.001"),
            ("C", Task::Tutorial, 3, 10, "MAR 0.001"),
        ]);
        assert_eq!(min_happiness(&snapshot, &plans), Some(1.0));
    }

    #[test]
    fn test_plan_diff_and_report() {
        let snapshot = fixture();
        let calendar = snapshot.calendar();
        let (_, old) = plans_with(&[
            ("A", Task::Tutorial, 2, 10, "MAR 0.001"),
            ("B", Task::ExerciseTel, 2, 12, "TEL 106li"),
        ]);
        let (_, new) = plans_with(&[
            ("A", Task::Tutorial, 2, 10, "MAR 0.003"),
            ("B", Task::ExerciseTel, 2, 12, "TEL 106li"),
        ]);
        let changes = plan_diff(calendar, &old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_room.as_deref(), Some("MAR 0.001"));
        assert_eq!(changes[0].new_task, Some(Task::Tutorial));

        let report = change_report(calendar, "A", &changes);
        assert!(report.contains("10 to 11: Tutorial in MAR 0.001 --> Tutorial in MAR 0.003"));
        assert!(change_report(calendar, "B", &changes).contains("no changes"));
    }

    #[test]
    fn test_tutor_report_lists_tasks_chronologically() {
        let snapshot = fixture();
        let (plans, rooms) = plans_with(&[
            ("A", Task::ExerciseTel, 2, 16, "TEL 106li"),
            ("A", Task::Tutorial, 2, 10, "MAR 0.001"),
        ]);
        let summaries = summarize(&snapshot, &plans, |_| 20.0);
        let report = tutor_report(snapshot.calendar(), &summaries[0], &plans["A"], Some(&rooms["A"]));
        let tutorial = report.find("10 to 11 --> Tutorial --> MAR 0.001").unwrap();
        let exercise = report.find("16 to 17 --> ExerciseTel --> TEL 106li").unwrap();
        assert!(tutorial < exercise);
        assert!(report.starts_with("Tutor: A\tTotal hours: 2"));
        assert!(report.contains("Tuesday, 18.10.:"));
    }

    #[test]
    fn test_tutorial_capacity() {
        let snapshot = fixture();
        let (_, rooms) = plans_with(&[
            ("A", Task::Tutorial, 2, 10, "MAR 0.003"),
            ("B", Task::Tutorial, 2, 10, "MAR 0.001"),
        ]);
        let capacity = tutorial_capacity(&snapshot, &rooms, 35);
        let day = &capacity[1];
        assert_eq!(day.capacity, 70);
        assert_eq!(day.conservative, 65);
        assert_eq!(day.conservative_plus, [69, 73, 77]);
        assert_eq!(capacity[0].capacity, 0);
    }
}
