use crate::data::{Task, TutorPlans, TutorRoomPlans, empty_grid, set_cell};
use crate::error::{DataError, PlanError, StoreError};
use crate::model::{ModelBuilder, ModelState};
use crate::plan::{Projection, coarse_plan};
use crate::snapshot::DomainSnapshot;
use crate::solver::{Direction, SolvedValues, SolverSettings};
use crate::stages::{self, History, INITIAL_STAGES, ROLLING_STAGES, StageContext, StageKind};
use good_lp::ResolutionError;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub index: usize,
    pub stage: StageKind,
    pub direction: Direction,
    pub objective: f64,
    pub elapsed_secs: f64,
    pub variables: usize,
    pub rows: usize,
}

pub trait StageSink {
    fn stage_solved(
        &mut self,
        report: &StageReport,
        projection: &Projection,
        values: &[(String, f64)],
    ) -> Result<(), StoreError>;
}

pub struct NoArtifacts;

impl StageSink for NoArtifacts {
    fn stage_solved(
        &mut self,
        _report: &StageReport,
        _projection: &Projection,
        _values: &[(String, f64)],
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub stages: Vec<StageReport>,
    pub projection: Projection,
}

pub struct Planner<'a> {
    builder: ModelBuilder<'a>,
    stop_after: Option<usize>,
}

impl<'a> Planner<'a> {
    pub fn new(builder: ModelBuilder<'a>) -> Self {
        Planner {
            builder,
            stop_after: None,
        }
    }

    /// Solves only the first `stages` stages (at least one).
    pub fn stop_after(mut self, stages: usize) -> Self {
        self.stop_after = Some(stages.max(1));
        self
    }

    pub fn plan_initial(&self, sink: &mut dyn StageSink) -> Result<PlanOutcome, PlanError> {
        info!("Starting initial planning");
        let state = self.builder.build_base();
        self.run(state, &INITIAL_STAGES, None, sink)
    }

    pub fn plan_rolling(
        &self,
        history: &History,
        sink: &mut dyn StageSink,
    ) -> Result<PlanOutcome, PlanError> {
        let days = self.builder.snapshot().calendar().day_indices();
        if history.cutover < 2 || history.cutover > *days.end() {
            return Err(DataError::InvalidCutover(history.cutover).into());
        }
        info!("Starting rolling planning from day {}", history.cutover);
        let mut state = self.builder.build_base();
        self.builder
            .pin_schedule_history(&mut state, &history.past, history.cutover)?;
        self.run(state, &ROLLING_STAGES, Some(history), sink)
    }

    fn settings(&self, kind: StageKind) -> SolverSettings {
        let optimization = &self.builder.config().optimization;
        SolverSettings {
            mip_gap: optimization.mip_gap,
            time_limit: kind.time_limit(&optimization.time_limits),
            threads: optimization.threads,
            random_seed: optimization.random_seed,
        }
    }

    fn run(
        &self,
        mut state: ModelState,
        pipeline: &[StageKind],
        history: Option<&History>,
        sink: &mut dyn StageSink,
    ) -> Result<PlanOutcome, PlanError> {
        let snapshot = self.builder.snapshot();
        let limit = self.stop_after.unwrap_or(pipeline.len());
        let mut previous: Option<TutorPlans> = None;
        let mut reports = Vec::new();
        let mut projection = None;

        for (position, kind) in pipeline.iter().copied().take(limit).enumerate() {
            let index = position + 1;
            if kind.requires_rooms() && !state.has_rooms() {
                state = self.builder.extend_with_rooms(state)?;
                if let Some(history) = history {
                    self.builder
                        .pin_room_history(&mut state, &history.past, history.cutover)?;
                }
            }

            let ctx = StageContext {
                builder: &self.builder,
                previous: previous.as_ref(),
                history,
            };
            let objective = stages::apply(kind, &mut state, &ctx)?;
            info!(
                "Stage {index} ({}): {:?} over {} variables and {} rows",
                kind.name(),
                objective.direction,
                state.lp().num_variables(),
                state.lp().num_rows()
            );

            let settings = self.settings(kind);
            let solved = match state.lp().solve(&objective, &settings) {
                Ok(solved) => solved,
                Err(ResolutionError::Infeasible) => {
                    error!("Stage {index} ({}) is infeasible", kind.name());
                    let conflicting_groups = if self.builder.config().optimization.diagnose_infeasibility {
                        state.lp().conflicting_groups(&settings)
                    } else {
                        None
                    };
                    match &conflicting_groups {
                        Some(groups) => error!("Conflicting constraint groups: {}", groups.join(", ")),
                        None => warn!("No conflicting constraint groups found"),
                    }
                    return Err(PlanError::Infeasible {
                        stage: index,
                        name: kind.name(),
                        conflicting_groups,
                    });
                }
                Err(e) => {
                    return Err(PlanError::Solver {
                        stage: index,
                        name: kind.name(),
                        message: e.to_string(),
                    });
                }
            };

            let report = StageReport {
                index,
                stage: kind,
                direction: objective.direction,
                objective: solved.objective(),
                elapsed_secs: solved.elapsed().as_secs_f64(),
                variables: state.lp().num_variables(),
                rows: state.lp().num_rows(),
            };
            info!(
                "Stage {index} ({}) solved in {:.2?} with objective {:.4}",
                kind.name(),
                solved.elapsed(),
                report.objective
            );

            let current = project(snapshot, &state, &solved);
            sink.stage_solved(&report, &current, &state.lp().named_values(&solved))?;
            stages::carry(kind, &mut state, &ctx, &objective, &solved);

            previous = Some(current.tutors.clone());
            projection = Some(current);
            reports.push(report);
        }

        let projection = projection.ok_or(PlanError::EmptyPipeline)?;
        info!("Planning finished after {} stages", reports.len());
        Ok(PlanOutcome {
            stages: reports,
            projection,
        })
    }
}

pub fn project(snapshot: &DomainSnapshot, state: &ModelState, solved: &SolvedValues) -> Projection {
    let calendar = snapshot.calendar();
    let x = state.schedule();

    let mut tutors = TutorPlans::new();
    for (id, tutor) in snapshot.tutors().iter().enumerate() {
        let mut grid = empty_grid(calendar, false);
        for task in Task::ALL {
            for (day, hour) in calendar.slots() {
                if solved.is_set(x.get(id, day, hour, task)) {
                    set_cell(&mut grid, task, day, hour, true);
                }
            }
        }
        tutors.insert(tutor.last_name.clone(), grid);
    }

    let rooms = state.rooms().map(|y| {
        let mut plans: TutorRoomPlans = BTreeMap::new();
        for (id, tutor) in snapshot.tutors().iter().enumerate() {
            let mut grid = empty_grid(calendar, String::new());
            for (day, hour) in calendar.slots() {
                for room_id in y.rooms() {
                    let assigned = y
                        .get(id, day, hour, *room_id)
                        .is_some_and(|variable| solved.is_set(variable));
                    if assigned {
                        let room = snapshot.room(*room_id);
                        set_cell(&mut grid, room.kind.task(), day, hour, room.name.clone());
                    }
                }
            }
            plans.insert(tutor.last_name.clone(), grid);
        }
        plans
    });

    Projection {
        coarse: coarse_plan(calendar, &tutors),
        tutors,
        rooms,
    }
}
