use crate::config::{RelaxationFactors, TimeLimits};
use crate::data::{DayIndex, Hour, Task, TutorPlans, TutorRoomPlans, task_at};
use crate::error::PlanError;
use crate::evaluation;
use crate::model::{ModelBuilder, ModelState};
use crate::snapshot::TutorId;
use crate::solver::{Direction, Objective, Sense, SolvedValues, VarKind};
use good_lp::Expression;
use log::{debug, info};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    MinimizeDeviation,
    MaximizeTaskContinuity,
    MinimizeWorkSpread,
    MaximizeMinHappiness,
    MaximizeCubicHappiness,
    MinimizeHopping,
    MaximizeRoomDesirability,
    MaximizeRoomStability,
    MaximizeRoomContinuity,
}

pub const INITIAL_STAGES: [StageKind; 7] = [
    StageKind::MinimizeDeviation,
    StageKind::MinimizeWorkSpread,
    StageKind::MaximizeMinHappiness,
    StageKind::MaximizeCubicHappiness,
    StageKind::MinimizeHopping,
    StageKind::MaximizeRoomDesirability,
    StageKind::MaximizeRoomStability,
];

pub const ROLLING_STAGES: [StageKind; 9] = [
    StageKind::MinimizeDeviation,
    StageKind::MaximizeTaskContinuity,
    StageKind::MinimizeWorkSpread,
    StageKind::MaximizeMinHappiness,
    StageKind::MaximizeCubicHappiness,
    StageKind::MinimizeHopping,
    StageKind::MaximizeRoomDesirability,
    StageKind::MaximizeRoomStability,
    StageKind::MaximizeRoomContinuity,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Carry {
    PinHeadcount,
    Relative(f64),
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::MinimizeDeviation => "minimize_deviation",
            StageKind::MaximizeTaskContinuity => "maximize_task_continuity",
            StageKind::MinimizeWorkSpread => "minimize_work_spread",
            StageKind::MaximizeMinHappiness => "maximize_min_happiness",
            StageKind::MaximizeCubicHappiness => "maximize_cubic_happiness",
            StageKind::MinimizeHopping => "minimize_hopping",
            StageKind::MaximizeRoomDesirability => "maximize_room_desirability",
            StageKind::MaximizeRoomStability => "maximize_room_stability",
            StageKind::MaximizeRoomContinuity => "maximize_room_continuity",
        }
    }

    pub fn requires_rooms(self) -> bool {
        matches!(
            self,
            StageKind::MaximizeRoomDesirability
                | StageKind::MaximizeRoomStability
                | StageKind::MaximizeRoomContinuity
        )
    }

    pub fn carry(self, factors: &RelaxationFactors) -> Carry {
        match self {
            StageKind::MinimizeDeviation => Carry::PinHeadcount,
            StageKind::MaximizeTaskContinuity => Carry::Relative(factors.task_continuity),
            StageKind::MinimizeWorkSpread => Carry::Relative(factors.maximal_work_spread),
            StageKind::MaximizeMinHappiness => Carry::Relative(factors.min_happiness),
            StageKind::MaximizeCubicHappiness => Carry::Relative(factors.cube_happiness),
            StageKind::MinimizeHopping => Carry::Relative(factors.minimal_hopping),
            StageKind::MaximizeRoomDesirability => Carry::Relative(factors.best_rooms),
            StageKind::MaximizeRoomStability => Carry::Relative(factors.tutor_room_stability),
            StageKind::MaximizeRoomContinuity => Carry::Relative(factors.room_continuity),
        }
    }

    /// Room stability is the expensive stage and gets the long limit.
    pub fn time_limit(self, limits: &TimeLimits) -> f64 {
        match self {
            StageKind::MaximizeRoomStability => limits.long,
            _ => limits.short,
        }
    }
}

#[derive(Debug, Clone)]
pub struct History {
    pub past: TutorRoomPlans,
    pub cutover: DayIndex,
}

pub struct StageContext<'a> {
    pub builder: &'a ModelBuilder<'a>,
    pub previous: Option<&'a TutorPlans>,
    pub history: Option<&'a History>,
}

impl StageContext<'_> {
    fn history(&self, kind: StageKind) -> Result<&History, PlanError> {
        self.history.ok_or(PlanError::MissingHistory(kind.name()))
    }
}

pub fn apply(
    kind: StageKind,
    state: &mut ModelState,
    ctx: &StageContext<'_>,
) -> Result<Objective, PlanError> {
    let objective = match kind {
        StageKind::MinimizeDeviation => minimize_deviation(state, ctx),
        StageKind::MaximizeTaskContinuity => {
            maximize_task_continuity(state, ctx, ctx.history(kind)?)
        }
        StageKind::MinimizeWorkSpread => minimize_work_spread(state, ctx),
        StageKind::MaximizeMinHappiness => maximize_min_happiness(state, ctx),
        StageKind::MaximizeCubicHappiness => maximize_cubic_happiness(state, ctx),
        StageKind::MinimizeHopping => minimize_hopping(state, ctx),
        StageKind::MaximizeRoomDesirability => maximize_room_desirability(state, ctx),
        StageKind::MaximizeRoomStability => maximize_room_stability(state, ctx),
        StageKind::MaximizeRoomContinuity => {
            maximize_room_continuity(state, ctx, ctx.history(kind)?)
        }
    };
    debug!(
        "Stage {} now has {} variables and {} rows",
        kind.name(),
        state.lp().num_variables(),
        state.lp().num_rows()
    );
    Ok(objective)
}

pub fn carry(
    kind: StageKind,
    state: &mut ModelState,
    ctx: &StageContext<'_>,
    objective: &Objective,
    solved: &SolvedValues,
) {
    let config = ctx.builder.config();
    let group = format!("carry_{}", kind.name());
    match kind.carry(&config.optimization.relaxation) {
        Carry::PinHeadcount => {
            let snapshot = ctx.builder.snapshot();
            let tutors = snapshot.tutors().len();
            let max_deviation = config.optimization.max_deviation;
            let (lp, x, _) = state.parts_mut();
            for task in Task::ALL {
                for (day, hour) in snapshot.calendar().slots() {
                    let vars: Vec<_> = (0..tutors).map(|t| x.get(t, day, hour, task)).collect();
                    let reached: f64 = vars.iter().map(|v| solved.value(*v)).sum::<f64>().round();
                    if reached > 0.0 {
                        let assigned: Expression = vars.into_iter().sum();
                        lp.add_row(&group, assigned, Sense::AtLeast, reached - max_deviation);
                    }
                }
            }
            info!("Carrying stage {}: headcounts pinned", kind.name());
        }
        Carry::Relative(factor) => {
            let bound = solved.objective() * factor;
            let sense = match objective.direction {
                Direction::Minimise => Sense::AtMost,
                Direction::Maximise => Sense::AtLeast,
            };
            info!(
                "Carrying stage {}: objective {:?} {bound}",
                kind.name(),
                sense
            );
            state
                .parts_mut()
                .0
                .add_row(&group, objective.expression.clone(), sense, bound);
        }
    }
}

/// Shortfall against the target plan per slot; the demand cap keeps it non-negative.
fn minimize_deviation(state: &mut ModelState, ctx: &StageContext<'_>) -> Objective {
    let builder = ctx.builder;
    let snapshot = builder.snapshot();
    let tutors = snapshot.tutors().len();
    let (lp, x, _) = state.parts_mut();
    let mut deviations = Vec::new();
    for task in Task::ALL {
        for (day, hour) in snapshot.calendar().slots() {
            let deviation = lp.add_variable(
                VarKind::NON_NEGATIVE,
                format!("deviation[{task},{day},{hour}]"),
            );
            let assigned: Expression = (0..tutors).map(|t| x.get(t, day, hour, task)).sum();
            lp.add_row(
                "deviation",
                assigned + deviation,
                Sense::Equal,
                builder.target_value(task, day, hour),
            );
            deviations.push(deviation);
        }
    }
    Objective::minimise(deviations.into_iter().sum())
}

fn continuity_cells<'h>(
    ctx: &StageContext<'_>,
    history: &'h History,
) -> Vec<(TutorId, DayIndex, Hour, Task, &'h str)> {
    let snapshot = ctx.builder.snapshot();
    let calendar = snapshot.calendar();
    let mut cells = Vec::new();
    for (name, plan) in &history.past {
        let Some(tutor) = snapshot.tutor_id(name) else {
            continue;
        };
        for day in calendar.coming_days(history.cutover) {
            for hour in calendar.hours() {
                if let Some((task, room)) = task_at(plan, day, *hour) {
                    cells.push((tutor, day, *hour, task, room));
                }
            }
        }
    }
    cells
}

fn maximize_task_continuity(
    state: &mut ModelState,
    ctx: &StageContext<'_>,
    history: &History,
) -> Objective {
    let x = state.schedule();
    let kept: Expression = continuity_cells(ctx, history)
        .into_iter()
        .map(|(tutor, day, hour, task, _)| x.get(tutor, day, hour, task))
        .sum();
    Objective::maximise(kept)
}

fn minimize_work_spread(state: &mut ModelState, ctx: &StageContext<'_>) -> Objective {
    let builder = ctx.builder;
    let snapshot = builder.snapshot();
    let days = snapshot.calendar().day_indices();
    let (lp, x, _) = state.parts_mut();
    let max_rel = lp.add_variable(VarKind::NON_NEGATIVE, "max_rel_workload");
    let min_rel = lp.add_variable(VarKind::UNIT, "min_rel_workload");
    // stays bounded when no tutor has expected hours
    lp.add_row("work_spread", max_rel - min_rel, Sense::AtLeast, 0.0);
    for tutor in 0..snapshot.tutors().len() {
        let expected = builder.expected_hours(tutor);
        if expected <= 0.0 {
            continue;
        }
        let relative = x.workload(tutor, days.clone()) * (1.0 / expected);
        lp.add_row("work_spread", relative.clone() - max_rel, Sense::AtMost, 0.0);
        lp.add_row("work_spread", relative - min_rel, Sense::AtLeast, 0.0);
    }
    Objective::minimise(max_rel - min_rel)
}

fn happiness_expression(state: &ModelState, ctx: &StageContext<'_>, tutor: usize) -> Expression {
    let snapshot = ctx.builder.snapshot();
    let x = state.schedule();
    snapshot
        .calendar()
        .slots()
        .flat_map(|(day, hour)| {
            let weight = snapshot.rating_weight(tutor, day, hour);
            Task::ALL
                .into_iter()
                .map(move |task| weight * x.get(tutor, day, hour, task))
        })
        .sum()
}

fn maximize_min_happiness(state: &mut ModelState, ctx: &StageContext<'_>) -> Objective {
    let builder = ctx.builder;
    let snapshot = builder.snapshot();
    let max_workload = ctx
        .previous
        .map(|plans| evaluation::max_workload(snapshot, plans, |t| builder.expected_hours(t)))
        .unwrap_or(0.0);
    info!("Maximal relative workload of previous stage: {max_workload:.3}");

    let view: &ModelState = state;
    let rated: Vec<(f64, Expression)> = (0..snapshot.tutors().len())
        .map(|tutor| (builder.expected_hours(tutor), happiness_expression(view, ctx, tutor)))
        .filter(|(expected, _)| *expected > 0.0)
        .collect();

    let (lp, _, _) = state.parts_mut();
    let h = lp.add_variable(VarKind::Continuous { min: 0.0, max: 3.0 }, "min_happiness");
    for (expected, rated) in rated {
        lp.add_row(
            "min_happiness",
            rated - (expected * max_workload) * h,
            Sense::AtLeast,
            0.0,
        );
    }
    Objective::maximise(Expression::from(0.0) + h)
}

fn maximize_cubic_happiness(state: &mut ModelState, ctx: &StageContext<'_>) -> Objective {
    let snapshot = ctx.builder.snapshot();
    let x = state.schedule();
    let expression = (0..snapshot.tutors().len())
        .flat_map(move |tutor| {
            snapshot.calendar().slots().flat_map(move |(day, hour)| {
                let weight = snapshot.rating_weight(tutor, day, hour).powi(3);
                Task::ALL
                    .into_iter()
                    .map(move |task| weight * x.get(tutor, day, hour, task))
            })
        })
        .sum();
    Objective::maximise(expression)
}

/// A slack in `[0, 1]` per tutor and adjacent hour pair absorbs configured task changes.
fn minimize_hopping(state: &mut ModelState, ctx: &StageContext<'_>) -> Objective {
    let snapshot = ctx.builder.snapshot();
    let pairs = &ctx.builder.config().rooms.hopping_pairs;
    let calendar = snapshot.calendar();
    let (lp, x, _) = state.parts_mut();
    let mut slacks = Vec::new();
    for (tutor_id, tutor) in snapshot.tutors().iter().enumerate() {
        for day in calendar.day_indices() {
            for (hour, next) in calendar.adjacent_hours() {
                let slack = lp.add_variable(
                    VarKind::UNIT,
                    format!("hopping[{},{day},{hour}]", tutor.last_name),
                );
                for (before, after) in pairs {
                    let change = x.get(tutor_id, day, hour, *before)
                        + x.get(tutor_id, day, next, *after)
                        - slack;
                    lp.add_row("hopping", change, Sense::AtMost, 1.0);
                }
                slacks.push(slack);
            }
        }
    }
    Objective::minimise(slacks.into_iter().sum())
}

fn maximize_room_desirability(state: &mut ModelState, ctx: &StageContext<'_>) -> Objective {
    let builder = ctx.builder;
    let snapshot = builder.snapshot();
    let Some(y) = state.rooms() else {
        return Objective::maximise(Expression::from(0.0));
    };
    let mut expression = Expression::from(0.0);
    for room in y.rooms() {
        let priority = builder.room_priority(snapshot.room(*room));
        if priority == 0.0 {
            continue;
        }
        let used: Expression = (0..snapshot.tutors().len())
            .flat_map(move |tutor| {
                snapshot
                    .calendar()
                    .slots()
                    .filter_map(move |(day, hour)| y.get(tutor, day, hour, *room))
            })
            .sum();
        expression += used * priority;
    }
    Objective::maximise(expression)
}

/// `z = 1` only when a tutor uses the same room in two adjacent hours.
fn maximize_room_stability(state: &mut ModelState, ctx: &StageContext<'_>) -> Objective {
    let snapshot = ctx.builder.snapshot();
    let calendar = snapshot.calendar();
    let (lp, _, rooms) = state.parts_mut();
    let Some(y) = rooms else {
        return Objective::maximise(Expression::from(0.0));
    };
    let mut stays = Vec::new();
    for (tutor_id, tutor) in snapshot.tutors().iter().enumerate() {
        for day in calendar.day_indices() {
            for (hour, next) in calendar.adjacent_hours() {
                for room in y.rooms() {
                    let (Some(now), Some(later)) = (
                        y.get(tutor_id, day, hour, *room),
                        y.get(tutor_id, day, next, *room),
                    ) else {
                        continue;
                    };
                    let z = lp.add_variable(
                        VarKind::UNIT,
                        format!("stay[{},{day},{hour},{room}]", tutor.last_name),
                    );
                    lp.add_row("room_stability", now + later - z, Sense::AtMost, 1.0);
                    lp.add_row("room_stability", z - now, Sense::AtMost, 0.0);
                    lp.add_row("room_stability", z - later, Sense::AtMost, 0.0);
                    stays.push(z);
                }
            }
        }
    }
    Objective::maximise(stays.into_iter().sum())
}

fn maximize_room_continuity(
    state: &mut ModelState,
    ctx: &StageContext<'_>,
    history: &History,
) -> Objective {
    let snapshot = ctx.builder.snapshot();
    let Some(y) = state.rooms() else {
        return Objective::maximise(Expression::from(0.0));
    };
    let kept: Expression = continuity_cells(ctx, history)
        .into_iter()
        .filter_map(|(tutor, day, hour, _, room)| {
            snapshot
                .room_id(room)
                .and_then(|room| y.get(tutor, day, hour, room))
        })
        .sum();
    Objective::maximise(kept)
}
