use crate::config::{Config, HourRange};
use crate::data::{DayIndex, Hour, Room, RoomKind, Task, TargetPlan, Tutor, TutorRoomPlans, cell};
use crate::error::DataError;
use crate::snapshot::{DomainSnapshot, RoomId, TutorId};
use crate::solver::{LinearProgram, Sense, VarKind};
use good_lp::{Expression, Variable};
use itertools::Itertools;
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::ops::Range;

/// Assignment variables `x[tutor][day][hour][task]`, stored densely.
#[derive(Debug, Clone)]
pub struct ScheduleVars {
    vars: Vec<Variable>,
    days: usize,
    first_hour: Hour,
    hours: usize,
}

impl ScheduleVars {
    fn new(lp: &mut LinearProgram, snapshot: &DomainSnapshot) -> Self {
        let calendar = snapshot.calendar();
        let mut vars = Vec::new();
        for tutor in snapshot.tutors() {
            for day in calendar.day_indices() {
                for hour in calendar.hours() {
                    for task in Task::ALL {
                        let name = format!("x[{},{day},{hour},{task}]", tutor.last_name);
                        vars.push(lp.add_variable(VarKind::Binary, name));
                    }
                }
            }
        }
        ScheduleVars {
            vars,
            days: calendar.day_indices().count(),
            first_hour: calendar.first_hour(),
            hours: calendar.hours().len(),
        }
    }

    fn index(&self, tutor: TutorId, day: DayIndex, hour: Hour) -> usize {
        let day_pos = (day - 1) as usize;
        let hour_pos = (hour - self.first_hour) as usize;
        (tutor * self.days + day_pos) * self.hours + hour_pos
    }

    pub fn get(&self, tutor: TutorId, day: DayIndex, hour: Hour, task: Task) -> Variable {
        self.vars[self.index(tutor, day, hour) * Task::ALL.len() + task.position()]
    }

    pub fn hours(&self) -> Range<Hour> {
        self.first_hour..self.first_hour + self.hours as Hour
    }

    pub fn busy(&self, tutor: TutorId, day: DayIndex, hour: Hour) -> Expression {
        Task::ALL
            .into_iter()
            .map(|task| self.get(tutor, day, hour, task))
            .sum()
    }

    pub fn workload(&self, tutor: TutorId, days: impl IntoIterator<Item = DayIndex>) -> Expression {
        days.into_iter()
            .flat_map(move |day| {
                self.hours().flat_map(move |hour| {
                    Task::ALL
                        .into_iter()
                        .map(move |task| self.get(tutor, day, hour, task))
                })
            })
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct RoomVars {
    vars: Vec<Variable>,
    rooms: Vec<RoomId>,
    position: HashMap<RoomId, usize>,
    days: usize,
    first_hour: Hour,
    hours: usize,
}

impl RoomVars {
    fn new(lp: &mut LinearProgram, snapshot: &DomainSnapshot, rooms: Vec<RoomId>) -> Self {
        let calendar = snapshot.calendar();
        let mut vars = Vec::new();
        for tutor in snapshot.tutors() {
            for day in calendar.day_indices() {
                for hour in calendar.hours() {
                    for room in &rooms {
                        let name = format!(
                            "y[{},{day},{hour},{}]",
                            tutor.last_name,
                            snapshot.room(*room).name
                        );
                        vars.push(lp.add_variable(VarKind::Binary, name));
                    }
                }
            }
        }
        let position = rooms.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
        RoomVars {
            vars,
            rooms,
            position,
            days: calendar.day_indices().count(),
            first_hour: calendar.first_hour(),
            hours: calendar.hours().len(),
        }
    }

    pub fn rooms(&self) -> &[RoomId] {
        &self.rooms
    }

    pub fn get(&self, tutor: TutorId, day: DayIndex, hour: Hour, room: RoomId) -> Option<Variable> {
        let pos = *self.position.get(&room)?;
        let slot = (tutor * self.days + (day - 1) as usize) * self.hours
            + (hour - self.first_hour) as usize;
        Some(self.vars[slot * self.rooms.len() + pos])
    }

    pub fn load(&self, tutors: usize, day: DayIndex, hour: Hour, room: RoomId) -> Expression {
        (0..tutors)
            .filter_map(|tutor| self.get(tutor, day, hour, room))
            .sum()
    }
}

pub enum ModelState {
    Base {
        lp: LinearProgram,
        schedule: ScheduleVars,
    },
    WithRooms {
        lp: LinearProgram,
        schedule: ScheduleVars,
        rooms: RoomVars,
    },
}

impl ModelState {
    pub fn lp(&self) -> &LinearProgram {
        match self {
            ModelState::Base { lp, .. } | ModelState::WithRooms { lp, .. } => lp,
        }
    }

    pub fn schedule(&self) -> &ScheduleVars {
        match self {
            ModelState::Base { schedule, .. } | ModelState::WithRooms { schedule, .. } => schedule,
        }
    }

    pub fn rooms(&self) -> Option<&RoomVars> {
        match self {
            ModelState::Base { .. } => None,
            ModelState::WithRooms { rooms, .. } => Some(rooms),
        }
    }

    pub fn has_rooms(&self) -> bool {
        matches!(self, ModelState::WithRooms { .. })
    }

    pub fn parts_mut(&mut self) -> (&mut LinearProgram, &ScheduleVars, Option<&RoomVars>) {
        match self {
            ModelState::Base { lp, schedule } => (lp, &*schedule, None),
            ModelState::WithRooms {
                lp,
                schedule,
                rooms,
            } => (lp, &*schedule, Some(&*rooms)),
        }
    }
}

/// Hours a tutor is expected to work over both weeks: the configured total
/// maximum, otherwise half the monthly hours.
pub fn expected_hours(config: &Config, tutor: &Tutor) -> f64 {
    config
        .specific_working_hours
        .get(&tutor.last_name)
        .and_then(|hours| hours.total)
        .map_or(f64::from(tutor.monthly_work_hours) / 2.0, |total| total.max)
}

pub struct ModelBuilder<'a> {
    snapshot: &'a DomainSnapshot,
    config: &'a Config,
    target: &'a TargetPlan,
}

impl<'a> ModelBuilder<'a> {
    /// Checks that the target plan covers the calendar and that every tutor
    /// named by the configuration and the data can be planned.
    pub fn new(
        snapshot: &'a DomainSnapshot,
        config: &'a Config,
        target: &'a TargetPlan,
    ) -> Result<Self, DataError> {
        let calendar = snapshot.calendar();
        for task in Task::ALL {
            for (day, hour) in calendar.slots() {
                if cell(target, task, day, hour).is_none() {
                    return Err(DataError::MalformedTargetPlan { task, day, hour });
                }
            }
        }
        for tutor in snapshot.tutors() {
            if tutor.availability.is_empty() {
                return Err(DataError::MissingAvailability(tutor.last_name.clone()));
            }
        }
        for name in config
            .specific_working_hours
            .keys()
            .chain(config.forbidden_tasks.keys())
        {
            snapshot.tutor_by_name(name)?;
        }
        Ok(ModelBuilder {
            snapshot,
            config,
            target,
        })
    }

    pub fn snapshot(&self) -> &'a DomainSnapshot {
        self.snapshot
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn target_value(&self, task: Task, day: DayIndex, hour: Hour) -> f64 {
        cell(self.target, task, day, hour).copied().map_or(0.0, f64::from)
    }

    pub fn expected_hours(&self, tutor: TutorId) -> f64 {
        expected_hours(self.config, self.snapshot.tutor(tutor))
    }

    pub fn build_base(&self) -> ModelState {
        let mut lp = LinearProgram::new();
        let schedule = ScheduleVars::new(&mut lp, self.snapshot);
        info!(
            "Building base model with {} tutors over {} slots ({} assignment variables)",
            self.snapshot.tutors().len(),
            self.snapshot.calendar().slots().count(),
            lp.num_variables()
        );

        self.add_unique_task(&mut lp, &schedule);
        self.add_availability_gate(&mut lp, &schedule);
        self.add_demand_cap(&mut lp, &schedule);
        self.add_tutorial_room_supply(&mut lp, &schedule);
        self.add_workload_bounds(&mut lp, &schedule);
        self.add_pauses(&mut lp, &schedule);

        for group in lp.groups() {
            debug!("{group}: {} rows", lp.rows_in_group(group));
        }
        ModelState::Base { lp, schedule }
    }

    fn add_unique_task(&self, lp: &mut LinearProgram, x: &ScheduleVars) {
        for tutor in 0..self.snapshot.tutors().len() {
            for (day, hour) in self.snapshot.calendar().slots() {
                lp.add_row("unique_task", x.busy(tutor, day, hour), Sense::AtMost, 1.0);
            }
        }
    }

    /// Forces every unusable variable to zero with a single equality row.
    fn add_availability_gate(&self, lp: &mut LinearProgram, x: &ScheduleVars) {
        let calendar = self.snapshot.calendar();
        let mut gated = Vec::new();
        for (tutor_id, tutor) in self.snapshot.tutors().iter().enumerate() {
            for (day, hour) in calendar.slots() {
                let Some(date) = calendar.date(day) else {
                    continue;
                };
                let available = tutor.is_available(date, hour);
                for task in Task::ALL {
                    if !available || self.config.is_forbidden(&tutor.last_name, task, date) {
                        gated.push(x.get(tutor_id, day, hour, task));
                    }
                }
            }
        }
        trace!("Gating {} assignment variables", gated.len());
        if !gated.is_empty() {
            let sum: Expression = gated.into_iter().sum();
            lp.add_row("availability", sum, Sense::Equal, 0.0);
        }
    }

    fn add_demand_cap(&self, lp: &mut LinearProgram, x: &ScheduleVars) {
        let tutors = self.snapshot.tutors().len();
        for task in Task::ALL {
            for (day, hour) in self.snapshot.calendar().slots() {
                let demand = self.target_value(task, day, hour);
                let room_booked = self
                    .snapshot
                    .booked_rooms(day, hour)
                    .iter()
                    .any(|room| self.snapshot.room(*room).kind == task.room_kind());
                if demand > 0.0 && !room_booked {
                    warn!("Target asks for {demand} x {task} on day {day} at {hour} but no room is booked");
                }
                let assigned: Expression = (0..tutors).map(|t| x.get(t, day, hour, task)).sum();
                lp.add_row(
                    "demand_cap",
                    assigned,
                    Sense::AtMost,
                    self.target_value(task, day, hour),
                );
            }
        }
    }

    fn add_tutorial_room_supply(&self, lp: &mut LinearProgram, x: &ScheduleVars) {
        let tutors = self.snapshot.tutors().len();
        for (day, hour) in self.snapshot.calendar().slots() {
            let tutorials: Expression =
                (0..tutors).map(|t| x.get(t, day, hour, Task::Tutorial)).sum();
            let rooms = self.snapshot.tutorial_rooms_booked(day, hour);
            lp.add_row("tutorial_room_supply", tutorials, Sense::AtMost, rooms as f64);
        }
    }

    fn add_workload_bounds(&self, lp: &mut LinearProgram, x: &ScheduleVars) {
        let calendar = self.snapshot.calendar();
        let optimization = &self.config.optimization;
        for (tutor_id, tutor) in self.snapshot.tutors().iter().enumerate() {
            let overrides = self.config.specific_working_hours.get(&tutor.last_name);
            let total_hours = f64::from(tutor.monthly_work_hours) / 2.0;
            let weekly_hours = total_hours / 2.0;

            let total = overrides.and_then(|o| o.total).unwrap_or(HourRange {
                min: total_hours * optimization.max_slack,
                max: total_hours,
            });
            let weekly = HourRange {
                min: weekly_hours * optimization.max_slack,
                max: weekly_hours * optimization.max_overload,
            };
            let first_week = overrides.and_then(|o| o.first_week).unwrap_or(weekly);
            let second_week = overrides.and_then(|o| o.second_week).unwrap_or(weekly);

            let bounds = [
                ("workload_total", calendar.day_indices(), total),
                ("workload_first_week", calendar.first_week(), first_week),
                ("workload_second_week", calendar.second_week(), second_week),
            ];
            for (group, days, range) in bounds {
                let worked = x.workload(tutor_id, days);
                lp.add_row(group, worked.clone(), Sense::AtLeast, range.min);
                lp.add_row(group, worked, Sense::AtMost, range.max);
            }
        }
    }

    /// No window of `limit + 1` consecutive hours may be fully worked.
    /// A limit of zero, or one covering the whole day, imposes no pause.
    fn add_pauses(&self, lp: &mut LinearProgram, x: &ScheduleVars) {
        let calendar = self.snapshot.calendar();
        let hours = calendar.hours();
        for (tutor_id, tutor) in self.snapshot.tutors().iter().enumerate() {
            let limits = [
                ("pauses", tutor.max_hours_without_break as usize, None),
                (
                    "tutorial_pauses",
                    tutor.max_tutorials_without_break as usize,
                    Some(Task::Tutorial),
                ),
            ];
            for (group, limit, only) in limits {
                if limit == 0 || limit >= hours.len() {
                    continue;
                }
                for day in calendar.day_indices() {
                    for window in hours.windows(limit + 1) {
                        let worked: Expression = window
                            .iter()
                            .flat_map(|hour| {
                                Task::ALL
                                    .into_iter()
                                    .filter(move |task| only.is_none_or(|o| o == *task))
                                    .map(move |task| x.get(tutor_id, day, *hour, task))
                            })
                            .sum();
                        lp.add_row(group, worked, Sense::AtMost, limit as f64);
                    }
                }
            }
        }
    }

    pub fn model_rooms(&self) -> Vec<RoomId> {
        let excluded = &self.config.rooms.excluded_rooms;
        (0..self.snapshot.rooms().len())
            .filter(|id| !excluded.contains(&self.snapshot.room(*id).name))
            .collect()
    }

    pub fn room_priority(&self, room: &Room) -> f64 {
        let layout = &self.config.rooms;
        let capacity = f64::from(room.capacity);
        if room.kind != RoomKind::Tutorial {
            0.0
        } else if layout.external_rooms.contains(&room.name) {
            capacity * 1000.0
        } else if layout
            .best_room_prefixes
            .iter()
            .any(|prefix| room.name.starts_with(prefix.as_str()))
        {
            capacity * 1_000_000.0
        } else {
            capacity
        }
    }

    /// Adds the room variables and their constraints. A model that already has
    /// rooms is returned unchanged.
    pub fn extend_with_rooms(&self, state: ModelState) -> Result<ModelState, DataError> {
        let (mut lp, schedule) = match state {
            ModelState::Base { lp, schedule } => (lp, schedule),
            extended @ ModelState::WithRooms { .. } => return Ok(extended),
        };

        let model_rooms = self.model_rooms();
        let calendar = self.snapshot.calendar();
        for task in Task::ALL {
            let demanded = calendar
                .slots()
                .any(|(day, hour)| self.target_value(task, day, hour) > 0.0);
            let has_room = model_rooms
                .iter()
                .any(|id| self.snapshot.room(*id).kind == task.room_kind());
            if demanded && !has_room {
                return Err(DataError::NoRoomForTask(task));
            }
        }

        let rooms = RoomVars::new(&mut lp, self.snapshot, model_rooms);
        info!(
            "Extending model with {} rooms ({} variables in total)",
            rooms.rooms().len(),
            lp.num_variables()
        );

        self.add_unique_room(&mut lp, &rooms);
        self.add_task_room_link(&mut lp, &schedule, &rooms);
        self.add_exclusive_tutorial_rooms(&mut lp, &rooms);
        self.add_unbooked_rooms(&mut lp, &rooms);
        self.add_pool_balance(&mut lp, &rooms);

        Ok(ModelState::WithRooms {
            lp,
            schedule,
            rooms,
        })
    }

    fn add_unique_room(&self, lp: &mut LinearProgram, y: &RoomVars) {
        for tutor in 0..self.snapshot.tutors().len() {
            for (day, hour) in self.snapshot.calendar().slots() {
                let used: Expression = y
                    .rooms()
                    .iter()
                    .filter_map(|room| y.get(tutor, day, hour, *room))
                    .sum();
                lp.add_row("unique_room", used, Sense::AtMost, 1.0);
            }
        }
    }

    fn add_task_room_link(&self, lp: &mut LinearProgram, x: &ScheduleVars, y: &RoomVars) {
        let by_task: HashMap<Task, Vec<RoomId>> = y
            .rooms()
            .iter()
            .map(|id| (self.snapshot.room(*id).kind.task(), *id))
            .into_group_map();
        for tutor in 0..self.snapshot.tutors().len() {
            for (day, hour) in self.snapshot.calendar().slots() {
                for task in Task::ALL {
                    let used: Expression = by_task
                        .get(&task)
                        .into_iter()
                        .flatten()
                        .filter_map(|room| y.get(tutor, day, hour, *room))
                        .sum();
                    let link = used - x.get(tutor, day, hour, task);
                    lp.add_row("task_room_link", link, Sense::Equal, 0.0);
                }
            }
        }
    }

    fn add_exclusive_tutorial_rooms(&self, lp: &mut LinearProgram, y: &RoomVars) {
        let tutors = self.snapshot.tutors().len();
        for room in y.rooms() {
            if self.snapshot.room(*room).kind != RoomKind::Tutorial {
                continue;
            }
            for (day, hour) in self.snapshot.calendar().slots() {
                lp.add_row(
                    "exclusive_tutorial_rooms",
                    y.load(tutors, day, hour, *room),
                    Sense::AtMost,
                    1.0,
                );
            }
        }
    }

    fn add_unbooked_rooms(&self, lp: &mut LinearProgram, y: &RoomVars) {
        let tutors = self.snapshot.tutors().len();
        for room in y.rooms() {
            for (day, hour) in self.snapshot.calendar().slots() {
                if !self.snapshot.is_booked(*room, day, hour) {
                    lp.add_row(
                        "unbooked_rooms",
                        y.load(tutors, day, hour, *room),
                        Sense::Equal,
                        0.0,
                    );
                }
            }
        }
    }

    /// Booked pool rooms of one balance group carry the same load, up to the tolerance.
    fn add_pool_balance(&self, lp: &mut LinearProgram, y: &RoomVars) {
        let layout = &self.config.rooms;
        let tolerance = layout.pool_balance_tolerance;
        let tutors = self.snapshot.tutors().len();
        for (day, hour) in self.snapshot.calendar().slots() {
            for group in &layout.balanced_pool_groups {
                let members: Vec<RoomId> = y
                    .rooms()
                    .iter()
                    .copied()
                    .filter(|id| {
                        let room = self.snapshot.room(*id);
                        room.kind.is_pool()
                            && self.snapshot.is_booked(*id, day, hour)
                            && group.iter().any(|prefix| room.name.starts_with(prefix.as_str()))
                    })
                    .collect();
                for (a, b) in members.iter().tuple_combinations() {
                    let slack = lp.add_variable(
                        VarKind::Continuous {
                            min: -tolerance,
                            max: tolerance,
                        },
                        format!("pool_balance[{day},{hour},{a},{b}]"),
                    );
                    let difference =
                        y.load(tutors, day, hour, *a) - y.load(tutors, day, hour, *b) + slack;
                    lp.add_row("pool_balance", difference, Sense::Equal, 0.0);
                }
            }
        }
    }

    pub fn pin_schedule_history(
        &self,
        state: &mut ModelState,
        past: &TutorRoomPlans,
        cutover: DayIndex,
    ) -> Result<(), DataError> {
        for name in past.keys() {
            self.snapshot.tutor_by_name(name)?;
        }
        let (lp, x, _) = state.parts_mut();
        let calendar = self.snapshot.calendar();
        let mut unused = Vec::new();
        let mut pinned = 0;
        for (tutor_id, tutor) in self.snapshot.tutors().iter().enumerate() {
            let plan = past.get(&tutor.last_name);
            for day in calendar.past_days(cutover) {
                for hour in calendar.hours() {
                    for task in Task::ALL {
                        let variable = x.get(tutor_id, day, *hour, task);
                        let worked = plan
                            .and_then(|p| cell(p, task, day, *hour))
                            .is_some_and(|room| !room.is_empty());
                        if worked {
                            lp.add_row(
                                "history",
                                Expression::from(0.0) + variable,
                                Sense::Equal,
                                1.0,
                            );
                            pinned += 1;
                        } else {
                            unused.push(variable);
                        }
                    }
                }
            }
        }
        info!("Pinned {pinned} past assignments before day {cutover}");
        if !unused.is_empty() {
            let sum: Expression = unused.into_iter().sum();
            lp.add_row("history", sum, Sense::Equal, 0.0);
        }
        Ok(())
    }

    pub fn pin_room_history(
        &self,
        state: &mut ModelState,
        past: &TutorRoomPlans,
        cutover: DayIndex,
    ) -> Result<(), DataError> {
        let (lp, _, rooms) = state.parts_mut();
        let Some(y) = rooms else {
            return Ok(());
        };
        let calendar = self.snapshot.calendar();
        for (name, plan) in past {
            let tutor_id = self
                .snapshot
                .tutor_id(name)
                .ok_or_else(|| DataError::UnknownTutor(name.clone()))?;
            for day in calendar.past_days(cutover) {
                for hour in calendar.hours() {
                    let Some((_, room_name)) = crate::data::task_at(plan, day, *hour) else {
                        continue;
                    };
                    let room = self
                        .snapshot
                        .room_id(room_name)
                        .ok_or_else(|| DataError::UnknownRoom(room_name.to_string()))?;
                    let variable = y
                        .get(tutor_id, day, *hour, room)
                        .ok_or_else(|| DataError::UnknownRoom(room_name.to_string()))?;
                    lp.add_row(
                        "room_history",
                        Expression::from(0.0) + variable,
                        Sense::Equal,
                        1.0,
                    );
                }
            }
        }
        Ok(())
    }
}
