use crate::calendar::Calendar;
use crate::config::Config;
use crate::data::Hour;
use crate::error::{LogError, StoreError, TaskParseError, WorkingError};
use crate::plan::{PersonalPlan, PlanViolation, Projection, check_plan};
use crate::snapshot::DomainSnapshot;
use crate::store::{CHANGE_LOG_FILE, PlanPaths, PlanStore};
use chrono::NaiveDate;
use log::{error, info, warn};
use serde::Serialize;
use std::fmt;
use std::fs;

/// One task as typed by an operator: `TUTOR DATE HOUR [ROOM]`, with `_` for spaces in names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub tutor: String,
    pub date: NaiveDate,
    pub hour: Hour,
    pub room: Option<String>,
}

impl TaskRef {
    pub fn parse(
        snapshot: &DomainSnapshot,
        text: &str,
        room_required: bool,
    ) -> Result<Self, TaskParseError> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        let arity_ok = if room_required {
            parts.len() == 4
        } else {
            (3..=4).contains(&parts.len())
        };
        if !arity_ok {
            return Err(TaskParseError::Arity);
        }

        let tutor_name = parts[0].replace('_', " ");
        let tutor = snapshot
            .find_tutor(&tutor_name)
            .ok_or(TaskParseError::UnknownTutor(tutor_name))?;
        let date = parse_date(snapshot.calendar(), parts[1])?;
        let hour = parts[2]
            .parse::<Hour>()
            .ok()
            .filter(|hour| snapshot.calendar().contains_hour(*hour))
            .ok_or_else(|| TaskParseError::Hour(parts[2].to_string()))?;
        let room = match parts.get(3) {
            Some(name) => {
                let name = name.replace('_', " ");
                let room = snapshot
                    .find_room(&name)
                    .ok_or(TaskParseError::UnknownRoom(name))?;
                Some(room.name.clone())
            }
            None => None,
        };
        Ok(TaskRef {
            tutor: tutor.last_name.clone(),
            date,
            hour,
            room,
        })
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.tutor.replace(' ', "_"),
            self.date.format("%Y-%m-%d"),
            self.hour
        )?;
        if let Some(room) = &self.room {
            write!(f, " {}", room.replace(' ', "_"))?;
        }
        Ok(())
    }
}

fn parse_date(calendar: &Calendar, text: &str) -> Result<NaiveDate, TaskParseError> {
    let parts: Vec<u32> = text
        .split('-')
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| TaskParseError::DateFormat(text.to_string()))?;
    let date = match parts.as_slice() {
        [month, day] => calendar.find_date(*month, *day),
        [year, month, day] => {
            let year = i32::try_from(*year)
                .map_err(|_| TaskParseError::DateFormat(text.to_string()))?;
            let date = NaiveDate::from_ymd_opt(year, *month, *day)
                .ok_or_else(|| TaskParseError::DateFormat(text.to_string()))?;
            calendar.day_index(date).map(|_| date)
        }
        _ => return Err(TaskParseError::DateFormat(text.to_string())),
    };
    date.ok_or_else(|| TaskParseError::DateOutsideCalendar(text.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum ChangeEntry {
    Add { task: TaskRef },
    Remove { task: TaskRef },
    Switch { old: TaskRef, new: TaskRef },
}

impl ChangeEntry {
    pub fn parse(snapshot: &DomainSnapshot, line: &str) -> Result<Self, LogError> {
        let task = |text: &str| {
            TaskRef::parse(snapshot, text, true).map_err(|source| LogError::Task {
                line: line.to_string(),
                source,
            })
        };
        let fields: Vec<&str> = line.trim_end().split(';').collect();
        match fields.as_slice() {
            ["add", added] => Ok(ChangeEntry::Add { task: task(*added)? }),
            ["remove", removed] => Ok(ChangeEntry::Remove {
                task: task(*removed)?,
            }),
            ["switch", old, new] => Ok(ChangeEntry::Switch {
                old: task(*old)?,
                new: task(*new)?,
            }),
            _ => Err(LogError::Malformed {
                line: line.to_string(),
            }),
        }
    }
}

impl fmt::Display for ChangeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeEntry::Add { task } => write!(f, "add;{task}"),
            ChangeEntry::Remove { task } => write!(f, "remove;{task}"),
            ChangeEntry::Switch { old, new } => write!(f, "switch;{old};{new}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingStatus {
    pub active: Option<String>,
    pub working: Option<String>,
    pub parent: Option<String>,
    pub changes: usize,
    pub last_change: Option<String>,
}

/// Manual edits against the working copy of the active plan.
pub struct WorkingCopy<'a> {
    store: &'a PlanStore,
    snapshot: &'a DomainSnapshot,
    config: &'a Config,
}

impl<'a> WorkingCopy<'a> {
    pub fn new(store: &'a PlanStore, snapshot: &'a DomainSnapshot, config: &'a Config) -> Self {
        WorkingCopy {
            store,
            snapshot,
            config,
        }
    }

    pub fn status(&self) -> Result<WorkingStatus, WorkingError> {
        let paths = self.store.plan_paths()?;
        let parent = match &paths.active {
            Some(active) => self.store.parent_of(active)?,
            None => None,
        };
        let log = match &paths.working {
            Some(working) if self.store.exists(working) => self.read_log(working)?,
            _ => Vec::new(),
        };
        Ok(WorkingStatus {
            active: paths.active,
            working: paths.working,
            parent,
            changes: log.len(),
            last_change: log.last().cloned(),
        })
    }

    pub fn init(&self, description: Option<&str>, today: NaiveDate) -> Result<String, WorkingError> {
        let mut paths = self.store.plan_paths()?;
        let active = paths
            .active
            .clone()
            .filter(|active| self.store.exists(active))
            .ok_or(StoreError::NoActivePlan)?;
        let label = match description.filter(|d| !d.is_empty()) {
            Some(description) => format!("manual-updates-{description}"),
            None => "manual-updates".to_string(),
        };
        let name = self.store.new_plan_folder(today, &label)?;
        self.store.copy_plan(&active, &name)?;
        self.store.set_parent(&name, &active)?;
        let log = self.store.folder(&name).join(CHANGE_LOG_FILE);
        fs::write(&log, "").map_err(|e| StoreError::io(&log, e))?;

        info!("Working copy {name} created from {active}");
        paths.working = Some(name.clone());
        self.store.save_plan_paths(&paths)?;
        Ok(name)
    }

    pub fn activate(&self) -> Result<PlanPaths, WorkingError> {
        let mut paths = self.store.plan_paths()?;
        let working = self.working_name(&paths)?;
        info!("Activating working copy {working}");
        paths.active = Some(working);
        paths.working = None;
        self.store.save_plan_paths(&paths)?;
        Ok(paths)
    }

    pub fn activate_parent(&self) -> Result<PlanPaths, WorkingError> {
        let mut paths = self.store.plan_paths()?;
        let active = paths.active.clone().ok_or(StoreError::NoActivePlan)?;
        let parent = self
            .store
            .parent_of(&active)?
            .filter(|parent| self.store.exists(parent))
            .ok_or(StoreError::NoParentPlan)?;
        info!("Reverting active plan {active} to its parent {parent}");
        paths.active = Some(parent);
        self.store.save_plan_paths(&paths)?;
        Ok(paths)
    }

    pub fn add(&self, text: &str) -> Result<ChangeEntry, WorkingError> {
        let task = TaskRef::parse(self.snapshot, text, true)?;
        let (name, before) = self.load()?;
        let mut plan = before.clone();
        self.add_to(&mut plan, &task)?;
        self.commit(&name, &before, &plan, ChangeEntry::Add { task })
    }

    pub fn remove(&self, text: &str) -> Result<ChangeEntry, WorkingError> {
        let mut task = TaskRef::parse(self.snapshot, text, false)?;
        let (name, before) = self.load()?;
        let mut plan = before.clone();
        task.room = Some(self.remove_from(&mut plan, &task)?);
        self.commit(&name, &before, &plan, ChangeEntry::Remove { task })
    }

    pub fn switch(&self, old: &str, new: &str) -> Result<ChangeEntry, WorkingError> {
        let mut old = TaskRef::parse(self.snapshot, old, false)?;
        let new = TaskRef::parse(self.snapshot, new, true)?;
        let (name, before) = self.load()?;
        let mut plan = before.clone();
        old.room = Some(self.remove_from(&mut plan, &old)?);
        self.add_to(&mut plan, &new)?;
        self.commit(&name, &before, &plan, ChangeEntry::Switch { old, new })
    }

    /// Reverts the last logged change and drops it from the log.
    pub fn undo(&self) -> Result<ChangeEntry, WorkingError> {
        let (name, before) = self.load()?;
        let mut plan = before.clone();
        let previous = self.read_log(&name)?;
        let mut log = previous.clone();
        let line = log.pop().ok_or(WorkingError::EmptyLog)?;
        let entry = ChangeEntry::parse(self.snapshot, &line)?;
        match &entry {
            ChangeEntry::Add { task } => {
                self.remove_from(&mut plan, task)?;
            }
            ChangeEntry::Remove { task } => self.add_to(&mut plan, task)?,
            ChangeEntry::Switch { old, new } => {
                self.remove_from(&mut plan, new)?;
                self.add_to(&mut plan, old)?;
            }
        }
        self.persist(&name, &before, &plan, &previous, &log)?;
        info!("Undid {line}");
        Ok(entry)
    }

    pub fn check(&self) -> Result<Vec<PlanViolation>, WorkingError> {
        let paths = self.store.plan_paths()?;
        let name = self.working_name(&paths)?;
        let rooms = self.store.read_room_plans(&name)?;
        let violations = check_plan(self.snapshot.calendar(), &rooms, self.snapshot.rooms());
        if !violations.is_empty() {
            warn!("Working copy {name} has {} violations", violations.len());
        }
        Ok(violations)
    }

    fn working_name(&self, paths: &PlanPaths) -> Result<String, StoreError> {
        paths
            .working
            .clone()
            .filter(|working| self.store.exists(working))
            .ok_or(StoreError::NoWorkingPlan)
    }

    fn load(&self) -> Result<(String, PersonalPlan), WorkingError> {
        let paths = self.store.plan_paths()?;
        let name = self.working_name(&paths)?;
        let rooms = self.store.read_room_plans(&name)?;
        let plan = PersonalPlan::from_export(self.snapshot, &rooms)?;
        Ok((name, plan))
    }

    fn add_to(&self, plan: &mut PersonalPlan, task: &TaskRef) -> Result<(), WorkingError> {
        let tutor = self.snapshot.tutor_by_name(&task.tutor)?;
        let room_name = task.room.as_deref().ok_or(TaskParseError::Arity)?;
        let room = self.snapshot.room_by_name(room_name)?;
        plan.add_task(tutor, task.date, task.hour, room)?;
        Ok(())
    }

    fn remove_from(&self, plan: &mut PersonalPlan, task: &TaskRef) -> Result<String, WorkingError> {
        let tutor = self.snapshot.tutor_by_name(&task.tutor)?;
        let room = task
            .room
            .as_deref()
            .map(|room| self.snapshot.room_by_name(room))
            .transpose()?;
        Ok(plan.remove_task(tutor, task.date, task.hour, room)?)
    }

    fn commit(
        &self,
        name: &str,
        before: &PersonalPlan,
        plan: &PersonalPlan,
        entry: ChangeEntry,
    ) -> Result<ChangeEntry, WorkingError> {
        let previous = self.read_log(name)?;
        let mut log = previous.clone();
        log.push(entry.to_string());
        self.persist(name, before, plan, &previous, &log)?;
        info!("Logged {entry}");
        Ok(entry)
    }

    /// The log is written before the plan, and both go back to `before` if the plan write fails.
    fn persist(
        &self,
        name: &str,
        before: &PersonalPlan,
        plan: &PersonalPlan,
        previous: &[String],
        log: &[String],
    ) -> Result<(), WorkingError> {
        self.write_log(name, log)?;
        if let Err(err) = self.save(name, plan) {
            error!("Writing working copy {name} failed, restoring it: {err}");
            self.write_log(name, previous)?;
            self.save(name, before)?;
            return Err(err);
        }
        self.write_change_reports(name, log)
    }

    fn save(&self, name: &str, plan: &PersonalPlan) -> Result<(), WorkingError> {
        let rooms = plan.to_export(self.snapshot)?;
        let projection = Projection::from_room_plans(self.snapshot.calendar(), rooms);
        self.store
            .write_plan(&self.store.folder(name), self.snapshot, self.config, &projection)?;
        Ok(())
    }

    fn read_log(&self, name: &str) -> Result<Vec<String>, StoreError> {
        let path = self.store.folder(name).join(CHANGE_LOG_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    fn write_log(&self, name: &str, lines: &[String]) -> Result<(), StoreError> {
        let dir = self.store.folder(name);
        let path = dir.join(CHANGE_LOG_FILE);
        let temp = dir.join(format!("{CHANGE_LOG_FILE}.tmp"));
        let text: String = lines.iter().map(|line| format!("{line}\n")).collect();
        fs::write(&temp, text).map_err(|e| StoreError::io(&temp, e))?;
        fs::rename(&temp, &path).map_err(|e| StoreError::io(&path, e))
    }

    fn write_change_reports(&self, name: &str, log: &[String]) -> Result<(), WorkingError> {
        let mut changes: Vec<(&str, TaskRef)> = Vec::new();
        for line in log {
            match ChangeEntry::parse(self.snapshot, line)? {
                ChangeEntry::Add { task } => changes.push(("added", task)),
                ChangeEntry::Remove { task } => changes.push(("removed", task)),
                ChangeEntry::Switch { old, new } => {
                    changes.push(("removed", old));
                    changes.push(("added", new));
                }
            }
        }
        changes.sort_by_key(|(_, task)| (task.date, task.hour));

        let dir = self.store.folder(name);
        for tutor in self.snapshot.tutors() {
            let report = self.change_log_report(&tutor.last_name, &changes);
            let path = dir.join(format!("changes_{}.txt", tutor.last_name));
            fs::write(&path, report).map_err(|e| StoreError::io(&path, e))?;
        }
        Ok(())
    }

    fn change_log_report(&self, tutor: &str, changes: &[(&str, TaskRef)]) -> String {
        let mut report = format!("Changes for {tutor}\n");
        let mine: Vec<_> = changes.iter().filter(|(_, task)| task.tutor == tutor).collect();
        if mine.is_empty() {
            report.push_str("\nno changes\n");
            return report;
        }
        let mut last_date = None;
        for (action, task) in mine {
            if last_date != Some(task.date) {
                let day = self.snapshot.calendar().day_index(task.date).unwrap_or_default();
                report.push_str(&format!("\nDay {day} ({})\n", task.date));
                last_date = Some(task.date);
            }
            let room = task.room.as_deref().unwrap_or_default();
            let kind = self
                .snapshot
                .find_room(room)
                .map_or("unknown", |room| room.kind.task().name());
            report.push_str(&format!(
                "{} to {} --> {kind} --> {room}   {action}\n",
                task.hour,
                task.hour + 1
            ));
        }
        report
    }
}
