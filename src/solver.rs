// Std library
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

// External crates
use log::debug;

/// Index of a variable inside a [`CpModel`].
pub type VarId = usize;

/// Bound used for one-sided linear constraints. Small enough that activity
/// sums over any realistic model cannot overflow.
const INF: i64 = i64::MAX / 4;

/// Slack applied when comparing floating-point objective values.
const OBJECTIVE_EPS: f64 = 1e-6;

/// Terminal state reported by [`CpModel::solve_with_callback`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverStatus {
    /// Search exhausted with a best solution in hand, or the first solution
    /// of a pure satisfaction model.
    Optimal,
    /// The deadline arrived while an incumbent was available.
    Feasible,
    /// Search exhausted without finding any solution.
    Infeasible,
    /// The model failed structural validation.
    ModelInvalid,
    /// The deadline arrived before any solution was found.
    Timeout,
    /// The search terminated for a reason the backend could not classify.
    Unknown,
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolverStatus::Optimal => "OPTIMAL",
            SolverStatus::Feasible => "FEASIBLE",
            SolverStatus::Infeasible => "INFEASIBLE",
            SolverStatus::ModelInvalid => "MODEL_INVALID",
            SolverStatus::Timeout => "TIMEOUT",
            SolverStatus::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Tuning knobs forwarded to the search.
#[derive(Clone, Debug)]
pub struct SolverParams {
    /// Size of the worker pool the backend may use. The bundled backend
    /// searches on a single worker and treats this as an upper limit.
    pub num_workers: usize,
    /// Wall-clock budget for the whole solve.
    pub time_limit: Option<Duration>,
    /// Emit per-incumbent search diagnostics on the debug log.
    pub log_search: bool,
}

impl Default for SolverParams {
    fn default() -> SolverParams {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        SolverParams {
            num_workers: (cpus / 2).max(1),
            time_limit: None,
            log_search: false,
        }
    }
}

/// Search counters, reported with every incumbent and with the final result.
#[derive(Clone, Copy, Debug, Default)]
pub struct SearchStats {
    pub nodes: u64,
    pub backtracks: u64,
    pub propagations: u64,
    pub solutions: u64,
}

/// A view of one incumbent, handed to the solution callback while the
/// search keeps running. Callbacks may run on solver-owned workers, so they
/// only get shared references and must synchronize their own state.
pub struct Incumbent<'a> {
    /// Value of every model variable in this solution.
    pub values: &'a [i64],
    /// Weighted objective of this solution. Zero for satisfaction models.
    pub objective_value: f64,
    /// Best objective bound proven so far.
    pub objective_bound: f64,
    pub stats: SearchStats,
    /// Time since `solve_with_callback` was entered.
    pub wall_time: Duration,
    /// Time the search itself has consumed, callbacks excluded.
    pub user_time: Duration,
}

/// Outcome of a solve.
#[derive(Clone, Debug)]
pub struct SolveResult {
    pub status: SolverStatus,
    /// Variable values of the final incumbent, present on `Optimal` and
    /// `Feasible` only.
    pub values: Option<Vec<i64>>,
    pub objective_value: Option<f64>,
    pub objective_bound: Option<f64>,
    pub stats: SearchStats,
}

struct LinearConstraint {
    terms: Vec<(i64, VarId)>,
    lower: i64,
    upper: i64,
}

/// A discrete optimization model over integer variables with linear
/// constraints, plus a deterministic branch-and-bound solver.
///
/// The surface is deliberately narrow so that another back end (a native
/// CP-SAT binding, an ILP solver) could be slotted in behind it: booleans
/// and bounded integers, linear equalities and inequalities, implications
/// and boolean products, one maximization objective, and a synchronous
/// solve that streams incumbents through a callback.
///
/// # Example
/// ```
/// use drawgen::solver::{CpModel, SolverParams, SolverStatus};
///
/// let mut model = CpModel::new();
/// let x = model.add_bool("x");
/// let y = model.add_bool("y");
/// model.add_linear_le(&[(1, x), (1, y)], 1);
/// model.set_maximize(vec![(1.0, x), (1.0, y)]);
/// let result = model.solve_with_callback(&SolverParams::default(), None);
/// assert_eq!(result.status, SolverStatus::Optimal);
/// assert_eq!(result.objective_value, Some(1.0));
/// ```
pub struct CpModel {
    lower: Vec<i64>,
    upper: Vec<i64>,
    names: Vec<String>,
    constraints: Vec<LinearConstraint>,
    watchers: Vec<Vec<usize>>,
    objective: Vec<(f64, VarId)>,
}

impl Default for CpModel {
    fn default() -> CpModel {
        CpModel::new()
    }
}

impl CpModel {
    pub fn new() -> CpModel {
        CpModel {
            lower: Vec::new(),
            upper: Vec::new(),
            names: Vec::new(),
            constraints: Vec::new(),
            watchers: Vec::new(),
            objective: Vec::new(),
        }
    }

    /// Adds a 0/1 variable and returns its id.
    pub fn add_bool(&mut self, name: impl Into<String>) -> VarId {
        self.add_int_in_range(0, 1, name)
    }

    /// Adds an integer variable with inclusive bounds and returns its id.
    pub fn add_int_in_range(&mut self, lower: i64, upper: i64, name: impl Into<String>) -> VarId {
        let id = self.lower.len();
        self.lower.push(lower);
        self.upper.push(upper);
        self.names.push(name.into());
        self.watchers.push(Vec::new());
        id
    }

    /// Requires `sum(coef * var) == rhs`.
    pub fn add_linear_eq(&mut self, terms: &[(i64, VarId)], rhs: i64) {
        self.push_constraint(terms, rhs, rhs);
    }

    /// Requires `sum(coef * var) <= rhs`.
    pub fn add_linear_le(&mut self, terms: &[(i64, VarId)], rhs: i64) {
        self.push_constraint(terms, -INF, rhs);
    }

    /// Requires `sum(coef * var) >= rhs`.
    pub fn add_linear_ge(&mut self, terms: &[(i64, VarId)], rhs: i64) {
        self.push_constraint(terms, rhs, INF);
    }

    /// Requires `antecedent == 1` to force `consequent == 1`. Both must be
    /// 0/1 variables.
    pub fn add_implication(&mut self, antecedent: VarId, consequent: VarId) {
        self.push_constraint(&[(1, consequent), (-1, antecedent)], 0, INF);
    }

    /// Requires `target` to equal the conjunction of the 0/1 `operands`.
    pub fn add_product(&mut self, target: VarId, operands: &[VarId]) {
        for &operand in operands {
            self.push_constraint(&[(1, target), (-1, operand)], -INF, 0);
        }
        let mut terms = vec![(1i64, target)];
        terms.extend(operands.iter().map(|&operand| (-1i64, operand)));
        self.push_constraint(&terms, 1 - operands.len() as i64, INF);
    }

    /// Sets the objective to the weighted sum of the given variables. The
    /// solver maximizes it.
    pub fn set_maximize(&mut self, terms: Vec<(f64, VarId)>) {
        self.objective = terms;
    }

    pub fn has_objective(&self) -> bool {
        !self.objective.is_empty()
    }

    pub fn num_vars(&self) -> usize {
        self.lower.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    fn push_constraint(&mut self, terms: &[(i64, VarId)], lower: i64, upper: i64) {
        let index = self.constraints.len();
        for &(_, var) in terms {
            self.watchers[var].push(index);
        }
        self.constraints.push(LinearConstraint {
            terms: terms.to_vec(),
            lower,
            upper,
        });
    }

    /// Checks the model for structural errors: empty domains, references to
    /// unknown variables, non-finite objective weights.
    pub fn validate(&self) -> Result<(), String> {
        for (var, (&lower, &upper)) in self.lower.iter().zip(&self.upper).enumerate() {
            if lower > upper {
                return Err(format!(
                    "variable {:?} has empty domain [{lower}, {upper}]",
                    self.names[var]
                ));
            }
        }
        for (index, constraint) in self.constraints.iter().enumerate() {
            for &(_, var) in &constraint.terms {
                if var >= self.lower.len() {
                    return Err(format!("constraint {index} references unknown variable {var}"));
                }
            }
        }
        for &(weight, var) in &self.objective {
            if var >= self.lower.len() {
                return Err(format!("objective references unknown variable {var}"));
            }
            if !weight.is_finite() {
                return Err(format!("objective weight {weight} is not finite"));
            }
        }
        Ok(())
    }

    /// Solves the model synchronously.
    ///
    /// The search is a depth-first branch-and-bound with bounds propagation
    /// over the linear constraints. Improving incumbents are streamed to
    /// `callback` as they are found; the final incumbent comes back in the
    /// result. Without an objective the search stops at the first solution.
    pub fn solve_with_callback(
        &self,
        params: &SolverParams,
        callback: Option<&(dyn Fn(&Incumbent<'_>) + Sync)>,
    ) -> SolveResult {
        if let Err(reason) = self.validate() {
            debug!("Model invalid: {reason}");
            return SolveResult {
                status: SolverStatus::ModelInvalid,
                values: None,
                objective_value: None,
                objective_bound: None,
                stats: SearchStats::default(),
            };
        }

        let started = Instant::now();
        let mut search = Search {
            model: self,
            lower: self.lower.clone(),
            upper: self.upper.clone(),
            trail: Vec::new(),
            queue: VecDeque::new(),
            queued: vec![false; self.constraints.len()],
            stats: SearchStats::default(),
            best_values: None,
            best_objective: f64::NEG_INFINITY,
            root_bound: 0.0,
            deadline: params.time_limit.map(|limit| started + limit),
            started,
            callback_time: Duration::ZERO,
            log_search: params.log_search,
        };

        for index in 0..self.constraints.len() {
            search.enqueue(index);
        }
        if !search.propagate() {
            return SolveResult {
                status: SolverStatus::Infeasible,
                values: None,
                objective_value: None,
                objective_bound: None,
                stats: search.stats,
            };
        }
        search.root_bound = search.objective_upper_bound();

        let outcome = search.dfs(callback);
        let has_objective = self.has_objective();
        let (status, objective_bound) = match outcome {
            Ok(()) => match search.best_values {
                Some(_) => (SolverStatus::Optimal, Some(search.best_objective)),
                None => (SolverStatus::Infeasible, None),
            },
            Err(Stop::SolutionFound) => (SolverStatus::Optimal, None),
            Err(Stop::Deadline) => match search.best_values {
                Some(_) => (SolverStatus::Feasible, Some(search.root_bound)),
                None => (SolverStatus::Timeout, Some(search.root_bound)),
            },
        };
        if params.log_search {
            debug!(
                "Search finished: {status} | {} nodes | {} backtracks | {} propagations | {} solutions",
                search.stats.nodes,
                search.stats.backtracks,
                search.stats.propagations,
                search.stats.solutions
            );
        }
        SolveResult {
            status,
            values: search.best_values,
            objective_value: if has_objective && status != SolverStatus::Infeasible {
                Some(search.best_objective)
            } else {
                None
            },
            objective_bound: if has_objective { objective_bound } else { None },
            stats: search.stats,
        }
    }
}

enum Stop {
    Deadline,
    SolutionFound,
}

struct Search<'a> {
    model: &'a CpModel,
    lower: Vec<i64>,
    upper: Vec<i64>,
    trail: Vec<(VarId, i64, i64)>,
    queue: VecDeque<usize>,
    queued: Vec<bool>,
    stats: SearchStats,
    best_values: Option<Vec<i64>>,
    best_objective: f64,
    root_bound: f64,
    deadline: Option<Instant>,
    started: Instant,
    callback_time: Duration,
    log_search: bool,
}

// b must be positive in both helpers.
fn div_floor(a: i64, b: i64) -> i64 {
    a.div_euclid(b)
}

fn div_ceil(a: i64, b: i64) -> i64 {
    -(-a).div_euclid(b)
}

impl Search<'_> {
    fn enqueue(&mut self, constraint: usize) {
        if !self.queued[constraint] {
            self.queued[constraint] = true;
            self.queue.push_back(constraint);
        }
    }

    fn enqueue_watchers(&mut self, var: VarId) {
        for index in 0..self.model.watchers[var].len() {
            let constraint = self.model.watchers[var][index];
            self.enqueue(constraint);
        }
    }

    fn set_lower(&mut self, var: VarId, value: i64) -> bool {
        if value > self.upper[var] {
            return false;
        }
        if value > self.lower[var] {
            self.trail.push((var, self.lower[var], self.upper[var]));
            self.lower[var] = value;
            self.stats.propagations += 1;
            self.enqueue_watchers(var);
        }
        true
    }

    fn set_upper(&mut self, var: VarId, value: i64) -> bool {
        if value < self.lower[var] {
            return false;
        }
        if value < self.upper[var] {
            self.trail.push((var, self.lower[var], self.upper[var]));
            self.upper[var] = value;
            self.stats.propagations += 1;
            self.enqueue_watchers(var);
        }
        true
    }

    /// Runs bounds propagation to a fixpoint. Returns false on conflict,
    /// with the queue drained either way.
    fn propagate(&mut self) -> bool {
        while let Some(index) = self.queue.pop_front() {
            self.queued[index] = false;
            if !self.propagate_constraint(index) {
                while let Some(rest) = self.queue.pop_front() {
                    self.queued[rest] = false;
                }
                return false;
            }
        }
        true
    }

    fn propagate_constraint(&mut self, index: usize) -> bool {
        let constraint = &self.model.constraints[index];
        let mut min_act = 0i64;
        let mut max_act = 0i64;
        for &(coef, var) in &constraint.terms {
            if coef >= 0 {
                min_act += coef * self.lower[var];
                max_act += coef * self.upper[var];
            } else {
                min_act += coef * self.upper[var];
                max_act += coef * self.lower[var];
            }
        }
        if min_act > constraint.upper || max_act < constraint.lower {
            return false;
        }
        let lower_bound = constraint.lower;
        let upper_bound = constraint.upper;
        let terms = &constraint.terms;
        // Residual activities use the bounds from before any tightening in
        // this pass; that only weakens the derived bounds, never breaks
        // them, and the constraint re-enters the queue on every change.
        for &(coef, var) in terms {
            if coef == 0 {
                continue;
            }
            let (contrib_min, contrib_max) = if coef > 0 {
                (coef * self.lower[var], coef * self.upper[var])
            } else {
                (coef * self.upper[var], coef * self.lower[var])
            };
            let residual_min = min_act - contrib_min;
            let residual_max = max_act - contrib_max;
            let (new_lower, new_upper) = if coef > 0 {
                (
                    div_ceil(lower_bound - residual_max, coef),
                    div_floor(upper_bound - residual_min, coef),
                )
            } else {
                (
                    div_ceil(-(upper_bound - residual_min), -coef),
                    div_floor(-(lower_bound - residual_max), -coef),
                )
            };
            if !self.set_lower(var, new_lower) || !self.set_upper(var, new_upper) {
                return false;
            }
        }
        true
    }

    fn undo_to(&mut self, mark: usize) {
        while self.trail.len() > mark {
            let (var, lower, upper) = self.trail.pop().unwrap();
            self.lower[var] = lower;
            self.upper[var] = upper;
        }
    }

    fn objective_upper_bound(&self) -> f64 {
        self.model
            .objective
            .iter()
            .map(|&(weight, var)| {
                if weight >= 0.0 {
                    weight * self.upper[var] as f64
                } else {
                    weight * self.lower[var] as f64
                }
            })
            .sum()
    }

    fn objective_value(&self) -> f64 {
        self.model
            .objective
            .iter()
            .map(|&(weight, var)| weight * self.lower[var] as f64)
            .sum()
    }

    fn pick_branch_var(&self) -> Option<VarId> {
        self.lower
            .iter()
            .zip(&self.upper)
            .position(|(lower, upper)| lower < upper)
    }

    fn record_solution(&mut self, callback: Option<&(dyn Fn(&Incumbent<'_>) + Sync)>) {
        let objective = self.objective_value();
        let improving = self.best_values.is_none() || objective > self.best_objective + OBJECTIVE_EPS;
        if !improving {
            return;
        }
        self.best_objective = objective;
        self.best_values = Some(self.lower.clone());
        self.stats.solutions += 1;
        if self.log_search {
            debug!(
                "Incumbent {}: objective {objective} after {} nodes",
                self.stats.solutions, self.stats.nodes
            );
        }
        if let Some(callback) = callback {
            let wall_time = self.started.elapsed();
            let incumbent = Incumbent {
                values: self.best_values.as_deref().unwrap_or(&[]),
                objective_value: objective,
                objective_bound: self.root_bound,
                stats: self.stats,
                wall_time,
                user_time: wall_time.saturating_sub(self.callback_time),
            };
            let before = Instant::now();
            callback(&incumbent);
            self.callback_time += before.elapsed();
        }
    }

    /// Depth-first search over the propagated state. The upper half of the
    /// branch variable's domain is explored first, which drives assignment
    /// variables toward 1 and finds dense schedules early.
    fn dfs(&mut self, callback: Option<&(dyn Fn(&Incumbent<'_>) + Sync)>) -> Result<(), Stop> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Stop::Deadline);
            }
        }
        self.stats.nodes += 1;
        let has_objective = self.model.has_objective();
        if has_objective
            && self.best_values.is_some()
            && self.objective_upper_bound() <= self.best_objective + OBJECTIVE_EPS
        {
            return Ok(());
        }
        let var = match self.pick_branch_var() {
            Some(var) => var,
            None => {
                self.record_solution(callback);
                if !has_objective {
                    return Err(Stop::SolutionFound);
                }
                return Ok(());
            }
        };
        let lower = self.lower[var];
        let upper = self.upper[var];
        let mid = lower + (upper - lower) / 2;
        for (branch_lower, branch_upper) in [(mid + 1, upper), (lower, mid)] {
            let mark = self.trail.len();
            let feasible = self.set_lower(var, branch_lower)
                && self.set_upper(var, branch_upper)
                && self.propagate();
            if feasible {
                let outcome = self.dfs(callback);
                if outcome.is_err() {
                    self.undo_to(mark);
                    return outcome;
                }
            } else {
                self.stats.backtracks += 1;
            }
            self.undo_to(mark);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn params() -> SolverParams {
        SolverParams {
            num_workers: 1,
            time_limit: None,
            log_search: false,
        }
    }

    #[test]
    fn maximizes_a_packed_sum() {
        let mut model = CpModel::new();
        let vars: Vec<VarId> = (0..4).map(|i| model.add_bool(format!("x{i}"))).collect();
        let terms: Vec<(i64, VarId)> = vars.iter().map(|&v| (1, v)).collect();
        model.add_linear_le(&terms, 2);
        model.set_maximize(vars.iter().map(|&v| (1.0, v)).collect());
        let result = model.solve_with_callback(&params(), None);
        assert_eq!(result.status, SolverStatus::Optimal);
        assert_eq!(result.objective_value, Some(2.0));
        let values = result.values.unwrap();
        assert_eq!(values.iter().sum::<i64>(), 2);
    }

    #[test]
    fn satisfaction_model_stops_at_first_solution() {
        let mut model = CpModel::new();
        let x = model.add_int_in_range(0, 5, "x");
        let y = model.add_int_in_range(0, 5, "y");
        model.add_linear_eq(&[(1, x), (1, y)], 7);
        let result = model.solve_with_callback(&params(), None);
        assert_eq!(result.status, SolverStatus::Optimal);
        let values = result.values.unwrap();
        assert_eq!(values[x] + values[y], 7);
        assert_eq!(result.objective_value, None);
    }

    #[test]
    fn contradictory_bounds_are_infeasible() {
        let mut model = CpModel::new();
        let x = model.add_bool("x");
        model.add_linear_ge(&[(1, x)], 1);
        model.add_linear_le(&[(1, x)], 0);
        let result = model.solve_with_callback(&params(), None);
        assert_eq!(result.status, SolverStatus::Infeasible);
        assert!(result.values.is_none());
    }

    #[test]
    fn product_is_the_conjunction_of_its_operands() {
        let mut model = CpModel::new();
        let a = model.add_bool("a");
        let b = model.add_bool("b");
        let both = model.add_bool("a and b");
        model.add_product(both, &[a, b]);
        model.add_linear_eq(&[(1, a)], 1);
        model.add_linear_eq(&[(1, b)], 1);
        let result = model.solve_with_callback(&params(), None);
        assert_eq!(result.status, SolverStatus::Optimal);
        assert_eq!(result.values.unwrap()[both], 1);

        let mut model = CpModel::new();
        let a = model.add_bool("a");
        let b = model.add_bool("b");
        let both = model.add_bool("a and b");
        model.add_product(both, &[a, b]);
        model.add_linear_eq(&[(1, a)], 0);
        model.add_linear_eq(&[(1, both)], 1);
        let result = model.solve_with_callback(&params(), None);
        assert_eq!(result.status, SolverStatus::Infeasible);
    }

    #[test]
    fn implication_forces_the_consequent() {
        let mut model = CpModel::new();
        let a = model.add_bool("a");
        let b = model.add_bool("b");
        model.add_implication(a, b);
        model.add_linear_eq(&[(1, a)], 1);
        let result = model.solve_with_callback(&params(), None);
        assert_eq!(result.status, SolverStatus::Optimal);
        assert_eq!(result.values.unwrap()[b], 1);
    }

    #[test]
    fn callback_sees_the_final_incumbent() {
        let calls = AtomicUsize::new(0);
        let mut model = CpModel::new();
        let x = model.add_int_in_range(0, 5, "x");
        model.set_maximize(vec![(1.0, x)]);
        let result = model.solve_with_callback(
            &params(),
            Some(&|incumbent: &Incumbent<'_>| {
                calls.fetch_add(1, Ordering::SeqCst);
                assert!(incumbent.objective_value <= incumbent.objective_bound);
            }),
        );
        assert_eq!(result.status, SolverStatus::Optimal);
        assert_eq!(result.objective_value, Some(5.0));
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn empty_domain_is_rejected_by_validation() {
        let mut model = CpModel::new();
        model.add_int_in_range(3, 2, "broken");
        assert!(model.validate().is_err());
        let result = model.solve_with_callback(&params(), None);
        assert_eq!(result.status, SolverStatus::ModelInvalid);
    }

    #[test]
    fn expired_deadline_reports_timeout() {
        let mut model = CpModel::new();
        let vars: Vec<VarId> = (0..12).map(|i| model.add_bool(format!("x{i}"))).collect();
        for pair in vars.windows(2) {
            model.add_linear_le(&[(1, pair[0]), (1, pair[1])], 1);
        }
        model.set_maximize(vars.iter().map(|&v| (1.0, v)).collect());
        let strict = SolverParams {
            time_limit: Some(Duration::ZERO),
            ..params()
        };
        let result = model.solve_with_callback(&strict, None);
        assert_eq!(result.status, SolverStatus::Timeout);
        assert!(result.values.is_none());
    }
}
