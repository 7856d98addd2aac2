use crate::config::Config;
use crate::data::{DayIndex, DomainInput, TargetPlan};
use crate::error::{PlannerError, StoreError};
use crate::model::ModelBuilder;
use crate::planner::{Planner, StageReport};
use crate::snapshot::DomainSnapshot;
use crate::stages::History;
use crate::store::{PlanStore, RunFolder, read_json};
use crate::working::WorkingCopy;
use chrono::{Local, NaiveDate};
use log::info;
use serde::Serialize;

/// Summary of a completed planning run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub folder: String,
    pub parent: Option<String>,
    pub stages: Vec<StageReport>,
}

/// Everything a planning service works on: configuration, domain data and the plan folders.
#[derive(Debug)]
pub struct Workspace {
    config: Config,
    snapshot: DomainSnapshot,
    target: TargetPlan,
    store: PlanStore,
}

impl Workspace {
    /// Reads the domain data and target plan named by the configuration.
    pub fn open(config: Config) -> Result<Self, PlannerError> {
        let input: DomainInput = read_json(&config.paths.domain)?;
        let snapshot = DomainSnapshot::new(input)?;
        let target: TargetPlan = read_json(&config.paths.target_plan)?;
        info!(
            "Loaded {} tutors and {} rooms from {:?}",
            snapshot.tutors().len(),
            snapshot.rooms().len(),
            config.paths.domain
        );
        Ok(Workspace::new(config, snapshot, target))
    }

    pub fn new(config: Config, snapshot: DomainSnapshot, target: TargetPlan) -> Self {
        let store = PlanStore::new(config.paths.plans.clone());
        Workspace {
            config,
            snapshot,
            target,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn snapshot(&self) -> &DomainSnapshot {
        &self.snapshot
    }

    pub fn store(&self) -> &PlanStore {
        &self.store
    }

    pub fn working(&self) -> WorkingCopy<'_> {
        WorkingCopy::new(&self.store, &self.snapshot, &self.config)
    }

    pub fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    /// Plans both weeks from scratch and makes the result the active plan.
    pub fn plan_initial(&self) -> Result<RunSummary, PlannerError> {
        let builder = ModelBuilder::new(&self.snapshot, &self.config, &self.target)?;
        let name = self.store.new_plan_folder(Self::today(), "initial")?;
        let mut run = RunFolder::new(&self.store, name, &self.snapshot, &self.config);
        let outcome = Planner::new(builder).plan_initial(&mut run)?;
        run.finish(&outcome)?;
        self.activate(run.name())?;
        Ok(RunSummary {
            folder: run.name().to_string(),
            parent: None,
            stages: outcome.stages,
        })
    }

    /// Replans from `next_day` on, keeping the earlier days of the active plan,
    /// and makes the result the active plan.
    pub fn plan_rolling(&self, next_day: DayIndex) -> Result<RunSummary, PlannerError> {
        let builder = ModelBuilder::new(&self.snapshot, &self.config, &self.target)?;
        let active = self
            .store
            .plan_paths()?
            .active
            .ok_or(StoreError::NoActivePlan)?;
        let history = History {
            past: self.store.read_room_plans(&active)?,
            cutover: next_day,
        };
        info!("Rolling planning from {active} at day {next_day}");

        let name = self.store.new_plan_folder(Self::today(), "rolling")?;
        let mut run = RunFolder::new(&self.store, name, &self.snapshot, &self.config);
        let outcome = Planner::new(builder).plan_rolling(&history, &mut run)?;
        run.finish(&outcome)?;
        if let Some(rooms) = &outcome.projection.rooms {
            self.store
                .write_changes(&run.dir(), &self.snapshot, &history.past, rooms)?;
        }
        self.store.set_parent(run.name(), &active)?;
        self.activate(run.name())?;
        Ok(RunSummary {
            folder: run.name().to_string(),
            parent: Some(active),
            stages: outcome.stages,
        })
    }

    fn activate(&self, name: &str) -> Result<(), StoreError> {
        let mut paths = self.store.plan_paths()?;
        info!("Active plan: {:?} -> {name}", paths.active);
        paths.active = Some(name.to_string());
        self.store.save_plan_paths(&paths)
    }
}
