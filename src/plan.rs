use crate::calendar::Calendar;
use crate::data::{
    CoarsePlan, Hour, Room, RoomKind, Task, TaskGrid, Tutor, TutorPlans, TutorRoomPlans, cell,
    empty_grid, set_cell,
};
use crate::error::{DataError, EditError, ImportError};
use crate::snapshot::DomainSnapshot;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Tutor last name -> date -> hour -> room name. A removed task leaves `None` behind.
pub type PlanByTutor = BTreeMap<String, BTreeMap<NaiveDate, BTreeMap<Hour, Option<String>>>>;

/// Room name -> date -> hour -> tutor last names. A slot emptied by removal keeps its empty set.
pub type PlanByRoom = BTreeMap<String, BTreeMap<NaiveDate, BTreeMap<Hour, BTreeSet<String>>>>;

/// The solved plan as two views, kept consistent by `add_task` and `remove_task`.
///
/// Tutorial rooms host at most one tutor per slot; pool rooms may host several.
/// Equality compares the assignments and ignores slots left behind by removals.
#[derive(Debug, Clone, Default)]
pub struct PersonalPlan {
    by_tutor: PlanByTutor,
    by_room: PlanByRoom,
}

impl PartialEq for PersonalPlan {
    fn eq(&self, other: &Self) -> bool {
        self.assignments().eq(other.assignments())
    }
}

impl PersonalPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_tutor(&self) -> &PlanByTutor {
        &self.by_tutor
    }

    pub fn by_room(&self) -> &PlanByRoom {
        &self.by_room
    }

    pub fn room_of(&self, tutor: &str, date: NaiveDate, hour: Hour) -> Option<&str> {
        self.by_tutor
            .get(tutor)?
            .get(&date)?
            .get(&hour)?
            .as_deref()
    }

    pub fn tutors_in(&self, room: &str, date: NaiveDate, hour: Hour) -> Option<&BTreeSet<String>> {
        self.by_room.get(room)?.get(&date)?.get(&hour)
    }

    /// Every `(tutor, date, hour, room)` currently assigned, in sorted order.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, NaiveDate, Hour, &str)> {
        self.by_tutor.iter().flat_map(|(tutor, dates)| {
            dates.iter().flat_map(move |(date, hours)| {
                hours.iter().filter_map(move |(hour, room)| {
                    room.as_deref()
                        .map(|room| (tutor.as_str(), *date, *hour, room))
                })
            })
        })
    }

    pub fn add_task(
        &mut self,
        tutor: &Tutor,
        date: NaiveDate,
        hour: Hour,
        room: &Room,
    ) -> Result<(), EditError> {
        if self.room_of(&tutor.last_name, date, hour).is_some() {
            return Err(EditError::TutorBusy {
                tutor: tutor.to_string(),
                date,
                hour,
            });
        }
        if !tutor.is_available(date, hour) {
            return Err(EditError::TutorUnavailable {
                tutor: tutor.to_string(),
                date,
                hour,
            });
        }
        if !room.is_booked(date, hour) {
            return Err(EditError::RoomNotBooked {
                room: room.name.clone(),
                date,
                hour,
            });
        }
        if room.kind == RoomKind::Tutorial
            && self
                .tutors_in(&room.name, date, hour)
                .is_some_and(|tutors| !tutors.is_empty())
        {
            return Err(EditError::RoomOccupied {
                room: room.name.clone(),
                date,
                hour,
            });
        }

        self.by_tutor
            .entry(tutor.last_name.clone())
            .or_default()
            .entry(date)
            .or_default()
            .insert(hour, Some(room.name.clone()));
        self.by_room
            .entry(room.name.clone())
            .or_default()
            .entry(date)
            .or_default()
            .entry(hour)
            .or_default()
            .insert(tutor.last_name.clone());
        Ok(())
    }

    /// Removes a task and returns the name of the room it was in. When `room`
    /// is given, the task must be in that room.
    pub fn remove_task(
        &mut self,
        tutor: &Tutor,
        date: NaiveDate,
        hour: Hour,
        room: Option<&Room>,
    ) -> Result<String, EditError> {
        let Some(current) = self.room_of(&tutor.last_name, date, hour).map(str::to_string) else {
            return Err(EditError::NoTask {
                tutor: tutor.to_string(),
                date,
                hour,
            });
        };
        if let Some(expected) = room.filter(|room| room.name != current) {
            return Err(EditError::WrongRoom {
                tutor: tutor.to_string(),
                date,
                hour,
                room: expected.name.clone(),
            });
        }

        if let Some(slot) = self
            .by_tutor
            .get_mut(&tutor.last_name)
            .and_then(|dates| dates.get_mut(&date))
            .and_then(|hours| hours.get_mut(&hour))
        {
            *slot = None;
        }
        if let Some(tutors) = self
            .by_room
            .get_mut(&current)
            .and_then(|dates| dates.get_mut(&date))
            .and_then(|hours| hours.get_mut(&hour))
        {
            tutors.remove(&tutor.last_name);
        }
        Ok(current)
    }

    /// Flat export: every tutor of the snapshot with a full grid, empty where unassigned.
    pub fn to_export(&self, snapshot: &DomainSnapshot) -> Result<TutorRoomPlans, DataError> {
        let calendar = snapshot.calendar();
        let mut export: TutorRoomPlans = snapshot
            .tutors()
            .iter()
            .map(|tutor| (tutor.last_name.clone(), empty_grid(calendar, String::new())))
            .collect();
        for (tutor, date, hour, room) in self.assignments() {
            let grid = export
                .get_mut(tutor)
                .ok_or_else(|| DataError::UnknownTutor(tutor.to_string()))?;
            let day = snapshot.date_index(date)?;
            let kind = snapshot.room_by_name(room)?.kind;
            set_cell(grid, kind.task(), day, hour, room.to_string());
        }
        Ok(export)
    }

    /// Rebuilds a plan from the flat export by adding every non-empty slot.
    pub fn from_export(
        snapshot: &DomainSnapshot,
        export: &TutorRoomPlans,
    ) -> Result<Self, ImportError> {
        let calendar = snapshot.calendar();
        let mut plan = PersonalPlan::new();
        for (name, grid) in export {
            let tutor = snapshot.tutor_by_name(name)?;
            for by_day in grid.values() {
                for (day, by_hour) in by_day {
                    for (hour, room) in by_hour {
                        if room.is_empty() {
                            continue;
                        }
                        let date = calendar
                            .date(*day)
                            .ok_or(DataError::UnknownDay(*day))?;
                        let room = snapshot.room_by_name(room)?;
                        plan.add_task(tutor, date, *hour, room)?;
                    }
                }
            }
        }
        Ok(plan)
    }
}

/// The three artifact views of a solved or edited plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub coarse: CoarsePlan,
    pub tutors: TutorPlans,
    /// Only known once rooms have been assigned.
    pub rooms: Option<TutorRoomPlans>,
}

impl Projection {
    pub fn from_room_plans(calendar: &Calendar, rooms: TutorRoomPlans) -> Self {
        let tutors: TutorPlans = rooms
            .iter()
            .map(|(tutor, grid)| (tutor.clone(), worked_grid(grid)))
            .collect();
        Projection {
            coarse: coarse_plan(calendar, &tutors),
            tutors,
            rooms: Some(rooms),
        }
    }
}

fn worked_grid(grid: &TaskGrid<String>) -> TaskGrid<bool> {
    grid.iter()
        .map(|(task, by_day)| {
            let by_day = by_day
                .iter()
                .map(|(day, by_hour)| {
                    let by_hour = by_hour
                        .iter()
                        .map(|(hour, room)| (*hour, !room.is_empty()))
                        .collect();
                    (*day, by_hour)
                })
                .collect();
            (*task, by_day)
        })
        .collect()
}

/// Number of tutors per task and slot.
pub fn coarse_plan(calendar: &Calendar, tutors: &TutorPlans) -> CoarsePlan {
    let mut coarse = empty_grid(calendar, 0);
    for task in Task::ALL {
        for (day, hour) in calendar.slots() {
            let count = tutors
                .values()
                .filter(|plan| cell(plan, task, day, hour).copied().unwrap_or(false))
                .count() as u32;
            set_cell(&mut coarse, task, day, hour, count);
        }
    }
    coarse
}

/// A slot of a flat plan that uses a missing or unbooked room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanViolation {
    pub date: Option<NaiveDate>,
    pub hour: Hour,
    pub room: String,
    pub tutor: String,
    pub message: String,
}

/// Reports every non-empty slot whose room does not exist or is not booked.
pub fn check_plan(calendar: &Calendar, plan: &TutorRoomPlans, rooms: &[Room]) -> Vec<PlanViolation> {
    let rooms: HashMap<&str, &Room> = rooms.iter().map(|r| (r.name.as_str(), r)).collect();
    let mut violations = Vec::new();
    for (tutor, grid) in plan {
        for by_day in grid.values() {
            for (day, by_hour) in by_day {
                let date = calendar.date(*day);
                for (hour, room_name) in by_hour {
                    if room_name.is_empty() {
                        continue;
                    }
                    let message = match (rooms.get(room_name.as_str()), date) {
                        (None, _) => "room does not exist",
                        (Some(_), None) => "day is not part of the calendar",
                        (Some(room), Some(date)) if !room.is_booked(date, *hour) => {
                            "room is not booked"
                        }
                        _ => continue,
                    };
                    violations.push(PlanViolation {
                        date,
                        hour: *hour,
                        room: room_name.clone(),
                        tutor: tutor.clone(),
                        message: message.to_string(),
                    });
                }
            }
        }
    }
    violations
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::DomainInput;

    /// Tutors A, B and C and five rooms, booked on 2016-10-18 and 2016-10-19.
    pub(crate) fn edit_fixture() -> DomainSnapshot {
        let input: DomainInput = serde_json::from_str(
            r#"{
            "calendar": {
                "days": ["2016-10-17","2016-10-18","2016-10-19","2016-10-20","2016-10-21",
                         "2016-10-24","2016-10-25","2016-10-26","2016-10-27","2016-10-28"],
                "hours": [10,11,12,13,14,15,16,17]
            },
            "tutors": [
                {"lastName":"A","firstName":"A","monthlyWorkHours":40,
                 "maxHoursWithoutBreak":4,"maxTutorialsWithoutBreak":2,
                 "availability":{"2016-10-18":{"10":3,"12":null,"14":0,"16":2},
                                 "2016-10-19":{"10":0,"12":2,"14":null,"16":2}}},
                {"lastName":"B","firstName":"B","monthlyWorkHours":40,
                 "maxHoursWithoutBreak":4,"maxTutorialsWithoutBreak":2,
                 "availability":{"2016-10-18":{"10":2,"12":null,"14":1,"16":0},
                                 "2016-10-19":{"10":1,"12":2,"14":null,"16":3}}},
                {"lastName":"C","firstName":"C","monthlyWorkHours":40,
                 "maxHoursWithoutBreak":4,"maxTutorialsWithoutBreak":2,
                 "availability":{"2016-10-18":{"10":1,"12":null,"14":1,"16":2},
                                 "2016-10-19":{"10":3,"12":2,"14":null,"16":0}}}
            ],
            "rooms": [
                {"name":"MAR 0.001","type":"tutorial","capacity":30,
                 "booked":{"2016-10-18":[10,12,14,16],"2016-10-19":[10,12,16]}},
                {"name":"MAR 0.003","type":"tutorial","capacity":30,
                 "booked":{"2016-10-18":[14,16],"2016-10-19":[10,12]}},
                {"name":"MAR 0.011","type":"tutorial","capacity":30,
                 "booked":{"2016-10-18":[12,14],"2016-10-19":[10,12]}},
                {"name":"TEL 106li","type":"exercise","capacity":60,
                 "booked":{"2016-10-18":[10,12,14,16],"2016-10-19":[10,12,14]}},
                {"name":"TEL 106re","type":"exercise","capacity":60,
                 "booked":{"2016-10-18":[12,14,16],"2016-10-19":[10,12,14,16]}}
            ]
        }"#,
        )
        .unwrap();
        DomainSnapshot::new(input).unwrap()
    }

    fn d0() -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 10, 18).unwrap()
    }

    fn d1() -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 10, 19).unwrap()
    }

    fn tutor<'a>(snapshot: &'a DomainSnapshot, name: &str) -> &'a Tutor {
        snapshot.tutor_by_name(name).unwrap()
    }

    fn room<'a>(snapshot: &'a DomainSnapshot, name: &str) -> &'a Room {
        snapshot.room_by_name(name).unwrap()
    }

    #[test]
    fn test_add_task_keeps_both_views_in_sync() {
        let s = edit_fixture();
        let mut plan = PersonalPlan::new();
        assert!(plan.by_tutor().is_empty());
        assert!(plan.by_room().is_empty());

        plan.add_task(tutor(&s, "A"), d0(), 10, room(&s, "MAR 0.001")).unwrap();
        plan.add_task(tutor(&s, "A"), d0(), 16, room(&s, "TEL 106re")).unwrap();
        plan.add_task(tutor(&s, "A"), d0(), 17, room(&s, "TEL 106li")).unwrap();
        plan.add_task(tutor(&s, "A"), d1(), 12, room(&s, "MAR 0.011")).unwrap();
        plan.add_task(tutor(&s, "B"), d0(), 14, room(&s, "MAR 0.003")).unwrap();
        plan.add_task(tutor(&s, "B"), d1(), 16, room(&s, "MAR 0.001")).unwrap();

        assert_eq!(plan.room_of("A", d0(), 17), Some("TEL 106li"));
        assert_eq!(plan.room_of("B", d1(), 16), Some("MAR 0.001"));
        assert_eq!(plan.by_tutor()["A"].len(), 2);
        assert_eq!(plan.by_tutor()["A"][&d0()].len(), 3);
        assert_eq!(plan.by_room().len(), 5);
        let expected: BTreeSet<String> = ["A".to_string()].into();
        assert_eq!(plan.tutors_in("MAR 0.001", d0(), 10), Some(&expected));
        assert_eq!(plan.tutors_in("MAR 0.001", d1(), 10), None);
    }

    #[test]
    fn test_pool_room_hosts_several_tutors() {
        let s = edit_fixture();
        let mut plan = PersonalPlan::new();
        for name in ["A", "B", "C"] {
            plan.add_task(tutor(&s, name), d0(), 10, room(&s, "TEL 106li")).unwrap();
        }
        assert_eq!(plan.tutors_in("TEL 106li", d0(), 10).map(BTreeSet::len), Some(3));
    }

    #[test]
    fn test_tutorial_room_is_exclusive() {
        let s = edit_fixture();
        let mut plan = PersonalPlan::new();
        plan.add_task(tutor(&s, "A"), d0(), 10, room(&s, "MAR 0.001")).unwrap();
        let err = plan
            .add_task(tutor(&s, "B"), d0(), 10, room(&s, "MAR 0.001"))
            .unwrap_err();
        assert_eq!(err.to_string(), "MAR 0.001 has already a task at 2016-10-18 10");
        assert_eq!(plan.room_of("B", d0(), 10), None);
    }

    #[test]
    fn test_add_task_conflicts() {
        let s = edit_fixture();
        let mut plan = PersonalPlan::new();
        plan.add_task(tutor(&s, "A"), d0(), 10, room(&s, "MAR 0.001")).unwrap();

        let busy = plan
            .add_task(tutor(&s, "A"), d0(), 10, room(&s, "TEL 106li"))
            .unwrap_err();
        assert_eq!(busy.to_string(), "A A has already a task at 2016-10-18 10");

        // rating 0 and unset ratings both block the slot
        let zero = plan
            .add_task(tutor(&s, "A"), d0(), 14, room(&s, "MAR 0.001"))
            .unwrap_err();
        assert_eq!(zero.to_string(), "A A is unavailable at 2016-10-18 14");
        let unset = plan
            .add_task(tutor(&s, "A"), d0(), 12, room(&s, "MAR 0.001"))
            .unwrap_err();
        assert!(matches!(unset, EditError::TutorUnavailable { .. }));

        let unbooked = plan
            .add_task(tutor(&s, "A"), d0(), 11, room(&s, "TEL 106re"))
            .unwrap_err();
        assert_eq!(unbooked.to_string(), "TEL 106re is not booked at 2016-10-18 11");
    }

    #[test]
    fn test_remove_task_keeps_slot_keys() {
        let s = edit_fixture();
        let mut plan = PersonalPlan::new();
        plan.add_task(tutor(&s, "A"), d0(), 10, room(&s, "MAR 0.001")).unwrap();
        let removed = plan.remove_task(tutor(&s, "A"), d0(), 10, None).unwrap();
        assert_eq!(removed, "MAR 0.001");
        assert_eq!(plan.by_tutor()["A"][&d0()].get(&10), Some(&None));
        assert_eq!(plan.tutors_in("MAR 0.001", d0(), 10), Some(&BTreeSet::new()));

        // the emptied tutorial room can be used again
        plan.add_task(tutor(&s, "B"), d0(), 10, room(&s, "MAR 0.001")).unwrap();
    }

    #[test]
    fn test_remove_task_errors_leave_plan_unchanged() {
        let s = edit_fixture();
        let mut plan = PersonalPlan::new();
        let err = plan.remove_task(tutor(&s, "A"), d0(), 10, None).unwrap_err();
        assert_eq!(err.to_string(), "A A has no task at 2016-10-18 10");

        plan.add_task(tutor(&s, "A"), d0(), 10, room(&s, "MAR 0.001")).unwrap();
        let before = plan.clone();
        let err = plan
            .remove_task(tutor(&s, "A"), d0(), 10, Some(room(&s, "TEL 106li")))
            .unwrap_err();
        assert_eq!(err.to_string(), "task of A A at 2016-10-18 10 is not in TEL 106li");
        assert_eq!(plan.by_tutor(), before.by_tutor());
        assert_eq!(plan.by_room(), before.by_room());
    }

    #[test]
    fn test_export_round_trip() {
        let s = edit_fixture();
        let mut plan = PersonalPlan::new();
        plan.add_task(tutor(&s, "A"), d0(), 10, room(&s, "MAR 0.001")).unwrap();
        plan.add_task(tutor(&s, "A"), d1(), 12, room(&s, "TEL 106re")).unwrap();
        plan.add_task(tutor(&s, "B"), d0(), 10, room(&s, "TEL 106li")).unwrap();
        plan.add_task(tutor(&s, "C"), d0(), 10, room(&s, "TEL 106li")).unwrap();

        let export = plan.to_export(&s).unwrap();
        assert_eq!(export.len(), 3);
        assert_eq!(
            cell(&export["A"], Task::Tutorial, 2, 10).map(String::as_str),
            Some("MAR 0.001")
        );
        assert_eq!(
            cell(&export["B"], Task::ExerciseTel, 2, 10).map(String::as_str),
            Some("TEL 106li")
        );
        assert_eq!(cell(&export["C"], Task::Grading, 9, 17).map(String::as_str), Some(""));

        let rebuilt = PersonalPlan::from_export(&s, &export).unwrap();
        assert_eq!(rebuilt.by_tutor(), plan.by_tutor());
        assert_eq!(rebuilt.by_room(), plan.by_room());
        assert_eq!(rebuilt, plan);
    }

    #[test]
    fn test_check_plan_reports_missing_and_unbooked_rooms() {
        let s = edit_fixture();
        let mut export = PersonalPlan::new().to_export(&s).unwrap();
        let grid = export.get_mut("A").unwrap();
        set_cell(grid, Task::Tutorial, 2, 10, "MAR 0.001".to_string());
        set_cell(grid, Task::Tutorial, 2, 12, "MAR 0.003".to_string());
        set_cell(grid, Task::ExerciseMar, 3, 10, "MAR 9.999".to_string());

        let violations = check_plan(s.calendar(), &export, s.rooms());
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().any(|v| v.room == "MAR 0.003"
            && v.message == "room is not booked"
            && v.date == Some(d0())));
        assert!(violations
            .iter()
            .any(|v| v.room == "MAR 9.999" && v.message == "room does not exist"));
    }

    #[test]
    fn test_projection_from_room_plans_counts_tutors() {
        let s = edit_fixture();
        let mut plan = PersonalPlan::new();
        plan.add_task(tutor(&s, "B"), d0(), 10, room(&s, "TEL 106li")).unwrap();
        plan.add_task(tutor(&s, "C"), d0(), 10, room(&s, "TEL 106li")).unwrap();
        plan.add_task(tutor(&s, "A"), d0(), 10, room(&s, "MAR 0.001")).unwrap();

        let projection = Projection::from_room_plans(s.calendar(), plan.to_export(&s).unwrap());
        assert_eq!(cell(&projection.coarse, Task::ExerciseTel, 2, 10), Some(&2));
        assert_eq!(cell(&projection.coarse, Task::Tutorial, 2, 10), Some(&1));
        assert_eq!(cell(&projection.coarse, Task::Tutorial, 2, 11), Some(&0));
        assert_eq!(cell(&projection.tutors["A"], Task::Tutorial, 2, 10), Some(&true));
        assert_eq!(cell(&projection.tutors["B"], Task::Tutorial, 2, 10), Some(&false));
    }
}
