use crate::data::Task;
use crate::error::ConfigError;
use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TUTOR_PLANNER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "planner.json";

/// Planner configuration. Every field has a default, so an empty JSON object is valid.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub paths: PathsConfig,
    pub optimization: OptimizationConfig,
    /// Per-tutor replacements for the formulaic workload bounds.
    pub specific_working_hours: BTreeMap<String, WorkingHoursOverride>,
    /// Dates on which a tutor must not perform a task.
    pub forbidden_tasks: BTreeMap<String, BTreeMap<Task, Vec<NaiveDate>>>,
    pub rooms: RoomLayoutConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Reads the configuration file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            info!("Configuration {path:?} not found, using defaults");
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded configuration from {path:?}");
        Ok(config)
    }

    pub fn is_forbidden(&self, tutor: &str, task: Task, date: NaiveDate) -> bool {
        self.forbidden_tasks
            .get(tutor)
            .and_then(|tasks| tasks.get(&task))
            .is_some_and(|dates| dates.contains(&date))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PathsConfig {
    /// Folder holding all plan runs and `plan_paths.json`.
    pub plans: PathBuf,
    /// Domain snapshot input (calendar, tutors, rooms).
    pub domain: PathBuf,
    pub target_plan: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            plans: PathBuf::from("plans"),
            domain: PathBuf::from("domain.json"),
            target_plan: PathBuf::from("target_plan.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizationConfig {
    /// Lower workload bound as a fraction of the expected hours.
    pub max_slack: f64,
    /// Upper weekly workload bound as a multiple of the expected weekly hours.
    pub max_overload: f64,
    pub mip_gap: f64,
    pub threads: i32,
    pub random_seed: i32,
    pub time_limits: TimeLimits,
    pub diagnose_infeasibility: bool,
    /// Headcount a slot may fall short of its target once deviation is minimised.
    pub max_deviation: f64,
    pub relaxation: RelaxationFactors,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        OptimizationConfig {
            max_slack: 0.6,
            max_overload: 1.2,
            mip_gap: 0.01,
            threads: 1,
            random_seed: 1234,
            time_limits: TimeLimits::default(),
            diagnose_infeasibility: true,
            max_deviation: 0.0,
            relaxation: RelaxationFactors::default(),
        }
    }
}

/// Solver time limits in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeLimits {
    pub short: f64,
    pub long: f64,
}

impl Default for TimeLimits {
    fn default() -> Self {
        TimeLimits {
            short: 20.0,
            long: 300.0,
        }
    }
}

/// Factors applied to a stage's achieved objective before it is carried as a bound.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelaxationFactors {
    pub maximal_work_spread: f64,
    pub min_happiness: f64,
    pub cube_happiness: f64,
    pub minimal_hopping: f64,
    pub best_rooms: f64,
    pub tutor_room_stability: f64,
    pub task_continuity: f64,
    pub room_continuity: f64,
}

impl Default for RelaxationFactors {
    fn default() -> Self {
        RelaxationFactors {
            maximal_work_spread: 1.5,
            min_happiness: 0.9,
            cube_happiness: 0.95,
            minimal_hopping: 1.05,
            best_rooms: 0.999,
            tutor_room_stability: 0.9,
            task_continuity: 0.95,
            room_continuity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct HourRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkingHoursOverride {
    pub total: Option<HourRange>,
    pub first_week: Option<HourRange>,
    pub second_week: Option<HourRange>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomLayoutConfig {
    /// Rooms left out of the room model entirely.
    pub excluded_rooms: Vec<String>,
    /// Groups of room-name prefixes; booked pool rooms of one group carry equal load.
    pub balanced_pool_groups: Vec<Vec<String>>,
    pub pool_balance_tolerance: f64,
    /// Rooms in an external building, preferred over ordinary rooms.
    pub external_rooms: Vec<String>,
    /// Name prefixes of the most desirable buildings.
    pub best_room_prefixes: Vec<String>,
    /// Task changes `(at h, at h + 1)` counted as hopping.
    pub hopping_pairs: Vec<(Task, Task)>,
    pub conservative_tutorial_size: u32,
}

impl Default for RoomLayoutConfig {
    fn default() -> Self {
        use Task::*;
        RoomLayoutConfig {
            excluded_rooms: vec!["TEL 103".into()],
            balanced_pool_groups: vec![
                vec!["TEL 106".into(), "TEL 206".into()],
                vec!["MAR 6.001".into(), "MAR 6.057".into()],
            ],
            pool_balance_tolerance: 1.0,
            external_rooms: vec![
                "MAR 4.033".into(),
                "MAR 6.004".into(),
                "MAR 6.011".into(),
            ],
            best_room_prefixes: vec!["MAR ".into(), "FH ".into()],
            hopping_pairs: vec![
                (ExerciseMar, ExerciseTel),
                (ExerciseMar, Grading),
                (ExerciseTel, ExerciseMar),
                (Grading, ExerciseMar),
                (Grading, Tutorial),
                (ExerciseTel, Tutorial),
                (ExerciseMar, Tutorial),
                (Tutorial, ExerciseTel),
                (Tutorial, ExerciseMar),
                (Tutorial, Grading),
            ],
            conservative_tutorial_size: 35,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.optimization.max_slack, 0.6);
        assert_eq!(config.optimization.relaxation.maximal_work_spread, 1.5);
        assert_eq!(config.optimization.time_limits.long, 300.0);
        assert_eq!(config.rooms.hopping_pairs.len(), 10);
        assert_eq!(config.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"optimization":{"relaxation":{"minHappiness":0.8}},
                "specificWorkingHours":{"B":{"total":{"min":10,"max":12}}},
                "forbiddenTasks":{"B":{"Tutorial":["2016-10-18"]}}}"#,
        )
        .unwrap();
        assert_eq!(config.optimization.relaxation.min_happiness, 0.8);
        assert_eq!(config.optimization.relaxation.cube_happiness, 0.95);
        let total = config.specific_working_hours["B"].total.unwrap();
        assert_eq!(total.max, 12.0);
        let date = NaiveDate::from_ymd_opt(2016, 10, 18).unwrap();
        assert!(config.is_forbidden("B", Task::Tutorial, date));
        assert!(!config.is_forbidden("B", Task::Grading, date));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/planner.json")).unwrap();
        assert_eq!(config.optimization.threads, 1);
    }
}
