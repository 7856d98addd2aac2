use good_lp::variable;
use good_lp::{
    Constraint, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable,
    constraint, default_solver,
};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VarKind {
    Binary,
    Continuous { min: f64, max: f64 },
}

impl VarKind {
    pub const NON_NEGATIVE: VarKind = VarKind::Continuous {
        min: 0.0,
        max: f64::INFINITY,
    };
    pub const UNIT: VarKind = VarKind::Continuous { min: 0.0, max: 1.0 };

    fn add_to(self, problem: &mut ProblemVariables) -> Variable {
        match self {
            VarKind::Binary => problem.add(variable().binary()),
            VarKind::Continuous { min, max } => problem.add(variable().min(min).max(max)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    AtMost,
    AtLeast,
    Equal,
}

#[derive(Debug, Clone)]
pub struct Row {
    pub group: String,
    pub lhs: Expression,
    pub sense: Sense,
    pub rhs: f64,
}

impl Row {
    fn to_constraint(&self) -> Constraint {
        let lhs = self.lhs.clone();
        let rhs = self.rhs;
        match self.sense {
            Sense::AtMost => constraint!(lhs <= rhs),
            Sense::AtLeast => constraint!(lhs >= rhs),
            Sense::Equal => constraint!(lhs == rhs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Minimise,
    Maximise,
}

#[derive(Debug, Clone)]
pub struct Objective {
    pub expression: Expression,
    pub direction: Direction,
}

impl Objective {
    pub fn minimise(expression: Expression) -> Self {
        Objective {
            expression,
            direction: Direction::Minimise,
        }
    }

    pub fn maximise(expression: Expression) -> Self {
        Objective {
            expression,
            direction: Direction::Maximise,
        }
    }

    /// Constant objective; any feasible point is optimal.
    pub fn feasibility() -> Self {
        Objective::minimise(Expression::from(0.0))
    }
}

#[derive(Debug, Clone)]
pub struct SolverSettings {
    pub mip_gap: f64,
    pub time_limit: f64,
    pub threads: i32,
    pub random_seed: i32,
}

#[derive(Debug, Clone)]
pub struct SolvedValues {
    values: HashMap<Variable, f64>,
    objective: f64,
    elapsed: Duration,
}

impl SolvedValues {
    pub fn value(&self, variable: Variable) -> f64 {
        self.values.get(&variable).copied().unwrap_or(0.0)
    }

    pub fn is_set(&self, variable: Variable) -> bool {
        self.value(variable) > 0.9
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// A mixed-integer program that outlives individual solves.
///
/// good_lp consumes its model on every solve, so the program keeps its own
/// variable domains and rows. Each solve re-registers the variables in their
/// original order, which reproduces the same `Variable` handles, and so the
/// stored expressions stay valid from one stage to the next.
pub struct LinearProgram {
    allocator: ProblemVariables,
    variables: Vec<Variable>,
    kinds: Vec<VarKind>,
    names: Vec<String>,
    rows: Vec<Row>,
}

impl Default for LinearProgram {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearProgram {
    pub fn new() -> Self {
        LinearProgram {
            allocator: ProblemVariables::new(),
            variables: Vec::new(),
            kinds: Vec::new(),
            names: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn add_variable(&mut self, kind: VarKind, name: impl Into<String>) -> Variable {
        let variable = kind.add_to(&mut self.allocator);
        self.variables.push(variable);
        self.kinds.push(kind);
        self.names.push(name.into());
        variable
    }

    pub fn add_row(&mut self, group: &str, lhs: Expression, sense: Sense, rhs: f64) {
        self.rows.push(Row {
            group: group.to_string(),
            lhs,
            sense,
            rhs,
        });
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn groups(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .map(|row| row.group.as_str())
            .filter(|group| seen.insert(*group))
            .collect()
    }

    pub fn rows_in_group(&self, group: &str) -> usize {
        self.rows.iter().filter(|row| row.group == group).count()
    }

    pub fn named_values(&self, solved: &SolvedValues) -> Vec<(String, f64)> {
        self.variables
            .iter()
            .zip(&self.names)
            .map(|(variable, name)| (name.clone(), solved.value(*variable)))
            .filter(|(_, value)| value.abs() > 1e-6)
            .collect()
    }

    pub fn solve(
        &self,
        objective: &Objective,
        settings: &SolverSettings,
    ) -> Result<SolvedValues, ResolutionError> {
        self.solve_rows(objective, settings, self.rows.iter())
    }

    fn solve_rows<'r>(
        &self,
        objective: &Objective,
        settings: &SolverSettings,
        rows: impl Iterator<Item = &'r Row>,
    ) -> Result<SolvedValues, ResolutionError> {
        let start_time = Instant::now();
        let mut problem = ProblemVariables::new();
        for kind in &self.kinds {
            kind.add_to(&mut problem);
        }
        let unsolved = match objective.direction {
            Direction::Minimise => problem.minimise(objective.expression.clone()),
            Direction::Maximise => problem.maximise(objective.expression.clone()),
        };
        let mut model = unsolved
            .using(default_solver)
            .set_option("threads", settings.threads)
            .set_option("random_seed", settings.random_seed)
            .set_option("mip_rel_gap", settings.mip_gap)
            .set_option("time_limit", settings.time_limit)
            .set_option("log_to_console", "false");
        for row in rows {
            model.add_constraint(row.to_constraint());
        }

        let solution = model.solve()?;
        let values = self
            .variables
            .iter()
            .map(|variable| (*variable, solution.value(*variable)))
            .collect();
        let objective = objective.expression.eval_with(&solution);
        let elapsed = start_time.elapsed();
        trace!("Solved in {elapsed:.2?} with objective {objective}");
        Ok(SolvedValues {
            values,
            objective,
            elapsed,
        })
    }

    /// Finds constraint groups that together are infeasible, using a deletion
    /// filter: a group is dropped for good when the rest stays infeasible without it.
    ///
    /// Returns `None` when the program is feasible or a solve fails for another reason.
    pub fn conflicting_groups(&self, settings: &SolverSettings) -> Option<Vec<String>> {
        let objective = Objective::feasibility();
        match self.solve(&objective, settings) {
            Err(ResolutionError::Infeasible) => {}
            Ok(_) => {
                debug!("Program is feasible without its objective, nothing to diagnose");
                return None;
            }
            Err(e) => {
                warn!("Infeasibility diagnosis failed: {e}");
                return None;
            }
        }

        let groups = self.groups();
        info!("Diagnosing infeasibility over {} constraint groups", groups.len());
        let mut dropped: HashSet<&str> = HashSet::new();
        let mut conflicting = Vec::new();
        for group in groups {
            dropped.insert(group);
            let remaining = self
                .rows
                .iter()
                .filter(|row| !dropped.contains(row.group.as_str()));
            match self.solve_rows(&objective, settings, remaining) {
                Err(ResolutionError::Infeasible) => {
                    trace!("Group {group} is not needed for the conflict");
                }
                Ok(_) => {
                    dropped.remove(group);
                    conflicting.push(group.to_string());
                }
                Err(e) => {
                    warn!("Infeasibility diagnosis failed: {e}");
                    return None;
                }
            }
        }
        Some(conflicting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SolverSettings {
        SolverSettings {
            mip_gap: 0.0,
            time_limit: 10.0,
            threads: 1,
            random_seed: 1234,
        }
    }

    #[test]
    fn test_program_survives_repeated_solves() {
        let mut lp = LinearProgram::new();
        let x = lp.add_variable(VarKind::Binary, "x");
        let y = lp.add_variable(VarKind::Binary, "y");
        lp.add_row("pick_one", x + y, Sense::AtMost, 1.0);

        let first = lp.solve(&Objective::maximise(2.0 * x + y), &settings()).unwrap();
        assert!(first.is_set(x));
        assert!(!first.is_set(y));
        assert!((first.objective() - 2.0).abs() < 1e-6);

        // carry the optimum and move on to a second objective
        lp.add_row("carry", 2.0 * x + y, Sense::AtLeast, 1.0);
        let second = lp.solve(&Objective::minimise(Expression::from(0.0) + x), &settings()).unwrap();
        assert!(second.is_set(y));
        assert!(!second.is_set(x));
        assert_eq!(lp.groups(), vec!["pick_one", "carry"]);
    }

    #[test]
    fn test_continuous_bounds() {
        let mut lp = LinearProgram::new();
        let s = lp.add_variable(VarKind::Continuous { min: -1.0, max: 1.0 }, "s");
        let solved = lp.solve(&Objective::minimise(Expression::from(0.0) + s), &settings()).unwrap();
        assert!((solved.value(s) + 1.0).abs() < 1e-6);
        assert_eq!(lp.named_values(&solved), vec![("s".to_string(), solved.value(s))]);
    }

    #[test]
    fn test_conflicting_groups_isolates_conflict() {
        let mut lp = LinearProgram::new();
        let x = lp.add_variable(VarKind::Binary, "x");
        let y = lp.add_variable(VarKind::Binary, "y");
        lp.add_row("harmless", Expression::from(0.0) + y, Sense::AtMost, 1.0);
        lp.add_row("need_x", Expression::from(0.0) + x, Sense::Equal, 1.0);
        lp.add_row("forbid_x", Expression::from(0.0) + x, Sense::Equal, 0.0);

        assert!(matches!(
            lp.solve(&Objective::feasibility(), &settings()),
            Err(ResolutionError::Infeasible)
        ));
        let groups = lp.conflicting_groups(&settings()).unwrap();
        assert_eq!(groups, vec!["need_x".to_string(), "forbid_x".to_string()]);
    }

    #[test]
    fn test_feasible_program_has_no_conflict() {
        let mut lp = LinearProgram::new();
        let x = lp.add_variable(VarKind::Binary, "x");
        lp.add_row("ok", Expression::from(0.0) + x, Sense::AtMost, 1.0);
        assert_eq!(lp.conflicting_groups(&settings()), None);
    }
}
