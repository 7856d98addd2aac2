use crate::config::Config;
use crate::data::TutorRoomPlans;
use crate::error::StoreError;
use crate::evaluation::{self, change_report, plan_diff};
use crate::model::expected_hours;
use crate::plan::Projection;
use crate::planner::{PlanOutcome, StageReport, StageSink};
use crate::snapshot::DomainSnapshot;
use chrono::NaiveDate;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const PLAN_PATHS_FILE: &str = "plan_paths.json";
pub const PARENT_FILE: &str = "parent_plan";
pub const CHANGE_LOG_FILE: &str = "changes.log";
pub const COARSE_PLAN_FILE: &str = "plan.json";
pub const TUTOR_PLANS_FILE: &str = "personal_plans.json";
pub const ROOM_PLANS_FILE: &str = "personal_plans_rooms.json";
pub const SOLUTION_FILE: &str = "solution.json";
pub const SERIES_FILE: &str = "series.json";
pub const CAPACITY_FILE: &str = "capacity.json";
pub const STAGES_FILE: &str = "stages.json";

pub const PLAN_FILES: [&str; 3] = [COARSE_PLAN_FILE, TUTOR_PLANS_FILE, ROOM_PLANS_FILE];

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let text = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_str(&text).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|e| StoreError::io(path, e))
}

fn write_text(path: &Path, text: &str) -> Result<(), StoreError> {
    fs::write(path, text).map_err(|e| StoreError::io(path, e))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlanPaths {
    pub active: Option<String>,
    pub working: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PlanStore {
    root: PathBuf,
}

impl PlanStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PlanStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn folder(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.folder(name).is_dir()
    }

    /// Creates `<date>-<n>-<label>`, where `n` is one more than the largest
    /// counter of any existing folder.
    pub fn new_plan_folder(&self, date: NaiveDate, label: &str) -> Result<String, StoreError> {
        let mut counter = 0;
        if self.root.is_dir() {
            let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
                let name = entry.file_name();
                let n = name
                    .to_string_lossy()
                    .split('-')
                    .nth(3)
                    .and_then(|part| part.parse::<u32>().ok());
                if let Some(n) = n {
                    counter = counter.max(n);
                }
            }
        }
        let name = format!("{}-{}-{label}", date.format("%Y-%m-%d"), counter + 1);
        let path = self.folder(&name);
        fs::create_dir_all(&path).map_err(|e| StoreError::io(&path, e))?;
        info!("Created plan folder {path:?}");
        Ok(name)
    }

    /// Missing pointer file means no active and no working plan.
    pub fn plan_paths(&self) -> Result<PlanPaths, StoreError> {
        let path = self.root.join(PLAN_PATHS_FILE);
        if !path.exists() {
            return Ok(PlanPaths::default());
        }
        read_json(&path)
    }

    /// Replaces the pointer file through a rename, so readers never see a partial file.
    pub fn save_plan_paths(&self, paths: &PlanPaths) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let path = self.root.join(PLAN_PATHS_FILE);
        let temp = self.root.join(format!("{PLAN_PATHS_FILE}.tmp"));
        write_json(&temp, paths)?;
        fs::rename(&temp, &path).map_err(|e| StoreError::io(&path, e))?;
        debug!("Saved plan paths {paths:?}");
        Ok(())
    }

    pub fn parent_of(&self, name: &str) -> Result<Option<String>, StoreError> {
        let path = self.folder(name).join(PARENT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        let parent = text.trim_end_matches('\n').to_string();
        Ok((!parent.is_empty()).then_some(parent))
    }

    pub fn set_parent(&self, name: &str, parent: &str) -> Result<(), StoreError> {
        write_text(&self.folder(name).join(PARENT_FILE), &format!("{parent}\n"))
    }

    pub fn read_room_plans(&self, name: &str) -> Result<TutorRoomPlans, StoreError> {
        read_json(&self.folder(name).join(ROOM_PLANS_FILE))
    }

    pub fn copy_plan(&self, from: &str, to: &str) -> Result<(), StoreError> {
        for file in PLAN_FILES {
            let source = self.folder(from).join(file);
            let target = self.folder(to).join(file);
            fs::copy(&source, &target).map_err(|e| StoreError::io(&source, e))?;
        }
        Ok(())
    }

    pub fn write_plan(
        &self,
        dir: &Path,
        snapshot: &DomainSnapshot,
        config: &Config,
        projection: &Projection,
    ) -> Result<(), StoreError> {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        write_json(&dir.join(COARSE_PLAN_FILE), &projection.coarse)?;
        write_json(&dir.join(TUTOR_PLANS_FILE), &projection.tutors)?;
        if let Some(rooms) = &projection.rooms {
            write_json(&dir.join(ROOM_PLANS_FILE), rooms)?;
            let capacity = evaluation::tutorial_capacity(
                snapshot,
                rooms,
                config.rooms.conservative_tutorial_size,
            );
            write_json(&dir.join(CAPACITY_FILE), &capacity)?;
        }

        let summaries = evaluation::summarize(snapshot, &projection.tutors, |id| {
            expected_hours(config, snapshot.tutor(id))
        });
        for summary in &summaries {
            let Some(plan) = projection.tutors.get(&summary.tutor) else {
                continue;
            };
            let rooms = projection
                .rooms
                .as_ref()
                .and_then(|rooms| rooms.get(&summary.tutor));
            let report = evaluation::tutor_report(snapshot.calendar(), summary, plan, rooms);
            write_text(&dir.join(format!("plan_{}.txt", summary.tutor)), &report)?;
        }
        write_json(&dir.join(SERIES_FILE), &evaluation::plot_series(&summaries))?;
        debug!("Wrote plan artifacts to {dir:?}");
        Ok(())
    }

    pub fn write_changes(
        &self,
        dir: &Path,
        snapshot: &DomainSnapshot,
        old: &TutorRoomPlans,
        new: &TutorRoomPlans,
    ) -> Result<(), StoreError> {
        let calendar = snapshot.calendar();
        let changes = plan_diff(calendar, old, new);
        info!("{} slots changed against the previous plan", changes.len());
        for tutor in snapshot.tutors() {
            let report = change_report(calendar, &tutor.last_name, &changes);
            write_text(&dir.join(format!("changes_{}.txt", tutor.last_name)), &report)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct StageSolution<'a> {
    report: &'a StageReport,
    values: BTreeMap<&'a str, f64>,
}

/// Persists one planning run: `Level_<n>/` per stage and the final plan at the top.
pub struct RunFolder<'a> {
    store: &'a PlanStore,
    name: String,
    snapshot: &'a DomainSnapshot,
    config: &'a Config,
}

impl<'a> RunFolder<'a> {
    pub fn new(
        store: &'a PlanStore,
        name: String,
        snapshot: &'a DomainSnapshot,
        config: &'a Config,
    ) -> Self {
        RunFolder {
            store,
            name,
            snapshot,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> PathBuf {
        self.store.folder(&self.name)
    }

    pub fn finish(&self, outcome: &PlanOutcome) -> Result<(), StoreError> {
        let dir = self.dir();
        self.store
            .write_plan(&dir, self.snapshot, self.config, &outcome.projection)?;
        write_json(&dir.join(STAGES_FILE), &outcome.stages)
    }
}

impl StageSink for RunFolder<'_> {
    fn stage_solved(
        &mut self,
        report: &StageReport,
        projection: &Projection,
        values: &[(String, f64)],
    ) -> Result<(), StoreError> {
        let dir = self.dir().join(format!("Level_{}", report.index));
        self.store
            .write_plan(&dir, self.snapshot, self.config, projection)?;
        let solution = StageSolution {
            report,
            values: values.iter().map(|(name, value)| (name.as_str(), *value)).collect(),
        };
        write_json(&dir.join(SOLUTION_FILE), &solution)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::plan::PersonalPlan;
    use crate::plan::tests::edit_fixture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    /// A fresh, empty directory below the system temp dir.
    pub(crate) fn scratch_dir(label: &str) -> PathBuf {
        let n = NEXT_DIR.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "tutor_planner-{label}-{}-{n}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 10, 1).unwrap()
    }

    #[test]
    fn test_new_plan_folder_counts_up() {
        let store = PlanStore::new(scratch_dir("folders"));
        assert_eq!(store.new_plan_folder(date(), "initial").unwrap(), "2016-10-01-1-initial");
        assert_eq!(store.new_plan_folder(date(), "rolling").unwrap(), "2016-10-01-2-rolling");
        fs::create_dir_all(store.folder("2016-09-30-7-initial")).unwrap();
        fs::create_dir_all(store.folder("notes")).unwrap();
        assert_eq!(
            store.new_plan_folder(date(), "manual-updates").unwrap(),
            "2016-10-01-8-manual-updates"
        );
    }

    #[test]
    fn test_plan_paths_round_trip() {
        let store = PlanStore::new(scratch_dir("paths"));
        assert_eq!(store.plan_paths().unwrap(), PlanPaths::default());
        let paths = PlanPaths {
            active: Some("2016-10-01-1-initial".into()),
            working: None,
        };
        store.save_plan_paths(&paths).unwrap();
        assert_eq!(store.plan_paths().unwrap(), paths);
        assert!(!store.root().join("plan_paths.json.tmp").exists());
    }

    #[test]
    fn test_parent_pointer() {
        let store = PlanStore::new(scratch_dir("parent"));
        let name = store.new_plan_folder(date(), "rolling").unwrap();
        assert_eq!(store.parent_of(&name).unwrap(), None);
        store.set_parent(&name, "2016-10-01-0-initial").unwrap();
        assert_eq!(
            store.parent_of(&name).unwrap().as_deref(),
            Some("2016-10-01-0-initial")
        );
    }

    #[test]
    fn test_write_plan_artifacts() {
        let snapshot = edit_fixture();
        let config = Config::default();
        let store = PlanStore::new(scratch_dir("artifacts"));
        let name = store.new_plan_folder(date(), "initial").unwrap();

        let mut plan = PersonalPlan::new();
        let tutor = snapshot.tutor_by_name("A").unwrap();
        let room = snapshot.room_by_name("MAR 0.001").unwrap();
        plan.add_task(tutor, NaiveDate::from_ymd_opt(2016, 10, 18).unwrap(), 10, room)
            .unwrap();
        let rooms = plan.to_export(&snapshot).unwrap();
        let projection = Projection::from_room_plans(snapshot.calendar(), rooms.clone());
        store
            .write_plan(&store.folder(&name), &snapshot, &config, &projection)
            .unwrap();

        assert_eq!(store.read_room_plans(&name).unwrap(), rooms);
        let report = fs::read_to_string(store.folder(&name).join("plan_A.txt")).unwrap();
        assert!(report.starts_with("Tutor: A\tTotal hours: 1\t"));
        assert!(report.contains("10 to 11 --> Tutorial --> MAR 0.001"));
        assert!(store.folder(&name).join(SERIES_FILE).exists());
        assert!(store.folder(&name).join(CAPACITY_FILE).exists());

        let empty = PersonalPlan::new().to_export(&snapshot).unwrap();
        store
            .write_changes(&store.folder(&name), &snapshot, &empty, &rooms)
            .unwrap();
        let changes = fs::read_to_string(store.folder(&name).join("changes_B.txt")).unwrap();
        assert!(changes.contains("no changes"));
        let changes = fs::read_to_string(store.folder(&name).join("changes_A.txt")).unwrap();
        assert!(changes.contains("10 to 11: nothing --> Tutorial in MAR 0.001"));
    }
}
