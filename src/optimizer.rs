// Std library
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

// External crates
use chrono::{NaiveDate, NaiveDateTime};
use itertools::Itertools;
use log::{error, info};

// Local modules
use crate::domain::{Game, Team, TimeMarker};
use crate::error::ScheduleError;
use crate::snapshot::{JsonDirSink, SnapshotSink, SolutionSnapshot};
use crate::solver::{CpModel, Incumbent, SolverParams, SolverStatus, VarId};

/// Default weight of the maximize-games objective.
pub const MAXIMIZE_GAMES_WEIGHT: f64 = 1.0;
/// Default weight of the ice-maker placement objective.
pub const ICE_MAKERS_WEIGHT: f64 = 4.0;
/// Default weight of the double-header penalty. Stored negated.
pub const MINIMIZE_DOUBLE_HEADERS_WEIGHT: f64 = 1.0;
/// Default outer weight of the draw fullness objective.
pub const EMPTY_FULL_DRAWS_WEIGHT: f64 = 1.0;
/// Default reward for a draw with no games.
pub const EMPTY_DRAW_WEIGHT: f64 = 2.0;
/// Default penalty for a draw with exactly one game.
pub const LONELY_DRAW_WEIGHT: f64 = -3.0;
/// Default reward for a draw with every sheet in use.
pub const FULL_DRAW_WEIGHT: f64 = 1.0;

/// Named constraint families. Adding a family twice is a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Constraint {
    TeamsPerGame,
    NoDoubleScheduling,
    ExactlyEqualGames,
    AlmostEqualGames,
    RoundRobin,
    ExactNumGames,
    MinimumRequiredGames,
    NoDoubleHeaders,
    Unavailability,
}

/// Named weighted objectives, combined into one maximized sum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Objective {
    MaximizeNumGames,
    IceMakers,
    MinimizeDoubleHeaders,
    EmptyFullDraws,
}

struct ObjectiveTerm {
    weight: f64,
    vars: Vec<(f64, VarId)>,
}

/// Compiles game slots and a team roster into a discrete optimization model
/// and materializes the solved assignment.
///
/// The builder owns a [`CpModel`] over boolean assignment variables:
/// `X[g][t]` (team `t` plays in game `g`), `U[g]` (game `g` is in use), one
/// games-in-use counter per distinct start instant, and one meeting counter
/// per unordered team pair. Constraint and objective methods add named
/// families on top; each family is registered once, and mutually exclusive
/// families fail with `InconsistentState`.
///
/// # Example
/// ```no_run
/// use drawgen::optimizer::ScheduleOptimizer;
/// use drawgen::solver::SolverParams;
/// # fn demo(games: Vec<drawgen::domain::Game>, teams: Vec<drawgen::domain::Team>)
/// #     -> Result<(), drawgen::error::ScheduleError> {
/// let mut optimizer = ScheduleOptimizer::new(&games, &teams);
/// optimizer.no_double_scheduling_constraint();
/// optimizer.teams_per_game_constraint();
/// optimizer.equal_games_constraint(true)?;
/// optimizer.round_robin_constraint();
/// optimizer.maximize_games_objective(1.0)?;
/// let assignments = optimizer.solve(&SolverParams::default())?;
/// # Ok(())
/// # }
/// ```
pub struct ScheduleOptimizer {
    games: Vec<Game>,
    teams: Vec<Team>,
    num_teams_per_game: usize,
    constraints: HashSet<Constraint>,
    objectives: BTreeMap<Objective, ObjectiveTerm>,
    model: CpModel,
    /// `X[g][t]`, game-major.
    schedule_vars: Vec<Vec<VarId>>,
    /// `U[g]`.
    in_use_vars: Vec<VarId>,
    /// Games-in-use counter and game count per distinct start instant.
    draw_count_vars: BTreeMap<NaiveDateTime, (VarId, usize)>,
    /// Meeting counter per unordered team index pair.
    games_vs_vars: BTreeMap<(usize, usize), VarId>,
    /// Per-game assigned-team totals, allocated on first use.
    game_total_vars: Option<Vec<VarId>>,
    /// The shared games-per-team variables of the equal-games families.
    num_games_vars: Vec<VarId>,
    /// Whether the meeting counters are already tied to the used-game
    /// count.
    pair_count_linked: bool,
}

impl ScheduleOptimizer {
    /// Creates a builder over sorted copies of the given games and teams
    /// and allocates the base variables.
    pub fn new(games: &[Game], teams: &[Team]) -> ScheduleOptimizer {
        let mut games = games.to_vec();
        games.sort();
        let mut teams = teams.to_vec();
        teams.sort();

        let mut model = CpModel::new();
        let schedule_vars: Vec<Vec<VarId>> = games
            .iter()
            .map(|game| {
                teams
                    .iter()
                    .map(|team| model.add_bool(format!("T: {team} | G: {game}")))
                    .collect()
            })
            .collect();
        let in_use_vars: Vec<VarId> = games
            .iter()
            .map(|game| model.add_bool(format!("Use {game}?")))
            .collect();

        let mut starts: BTreeMap<NaiveDateTime, Vec<usize>> = BTreeMap::new();
        for (index, game) in games.iter().enumerate() {
            starts.entry(game.start()).or_default().push(index);
        }
        let mut draw_count_vars = BTreeMap::new();
        for (start, members) in starts {
            let capacity = members.len();
            let counter = model.add_int_in_range(0, capacity as i64, format!("Games at {start}"));
            let mut terms = vec![(1i64, counter)];
            terms.extend(members.iter().map(|&game| (-1i64, in_use_vars[game])));
            model.add_linear_eq(&terms, 0);
            draw_count_vars.insert(start, (counter, capacity));
        }

        let mut games_vs_vars = BTreeMap::new();
        for pair in (0..teams.len()).combinations(2) {
            let (a, b) = (pair[0], pair[1]);
            let var = model.add_int_in_range(
                0,
                teams.len() as i64,
                format!("{} vs {}", teams[a], teams[b]),
            );
            games_vs_vars.insert((a, b), var);
        }

        ScheduleOptimizer {
            games,
            teams,
            num_teams_per_game: 2,
            constraints: HashSet::new(),
            objectives: BTreeMap::new(),
            model,
            schedule_vars,
            in_use_vars,
            draw_count_vars,
            games_vs_vars,
            game_total_vars: None,
            num_games_vars: Vec::new(),
            pair_count_linked: false,
        }
    }

    /// With exactly two teams per used game, every used game realizes
    /// exactly one pairing, so the meeting counters sum to the used-game
    /// count. Added once both families are registered; it is implied by
    /// them but lets the solver refute unbalanced pairings much earlier.
    fn link_pair_counts(&mut self) {
        if self.pair_count_linked
            || !self.constraints.contains(&Constraint::TeamsPerGame)
            || !self.constraints.contains(&Constraint::RoundRobin)
        {
            return;
        }
        let mut terms: Vec<(i64, VarId)> = self
            .games_vs_vars
            .values()
            .map(|&meetings| (1i64, meetings))
            .collect();
        terms.extend(self.in_use_vars.iter().map(|&in_use| (-1i64, in_use)));
        self.model.add_linear_eq(&terms, 0);
        self.pair_count_linked = true;
    }

    pub fn games(&self) -> &[Game] {
        &self.games
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn teams_per_game(&self) -> usize {
        self.num_teams_per_game
    }

    pub fn num_model_vars(&self) -> usize {
        self.model.num_vars()
    }

    pub fn num_model_constraints(&self) -> usize {
        self.model.num_constraints()
    }

    pub fn has_constraint(&self, constraint: Constraint) -> bool {
        self.constraints.contains(&constraint)
    }

    pub fn has_objective(&self, objective: Objective) -> bool {
        self.objectives.contains_key(&objective)
    }

    /// Per-game assigned-team totals, shared by the teams-per-game
    /// constraint and the maximize-games objective.
    fn game_totals(&mut self) -> Vec<VarId> {
        if self.game_total_vars.is_none() {
            let totals: Vec<VarId> = self
                .games
                .iter()
                .enumerate()
                .map(|(index, game)| {
                    let total = self.model.add_int_in_range(
                        0,
                        self.teams.len() as i64,
                        format!("Teams in {game}"),
                    );
                    let mut terms = vec![(1i64, total)];
                    terms.extend(self.schedule_vars[index].iter().map(|&var| (-1i64, var)));
                    self.model.add_linear_eq(&terms, 0);
                    total
                })
                .collect();
            self.game_total_vars = Some(totals);
        }
        self.game_total_vars.clone().unwrap_or_default()
    }

    /// Every game hosts exactly `teams_per_game` teams while its slot is in
    /// use and none otherwise.
    pub fn teams_per_game_constraint(&mut self) {
        if self.constraints.contains(&Constraint::TeamsPerGame) {
            return;
        }
        let totals = self.game_totals();
        let per_game = self.num_teams_per_game as i64;
        for (index, &total) in totals.iter().enumerate() {
            self.model
                .add_linear_eq(&[(1, total), (-per_game, self.in_use_vars[index])], 0);
        }
        self.constraints.insert(Constraint::TeamsPerGame);
        self.link_pair_counts();
    }

    /// No team appears in two games whose spans collide.
    ///
    /// The overlap graph is built once; for each game the group consisting
    /// of the game and everything overlapping it gets a per-team sum of at
    /// most one.
    pub fn no_double_scheduling_constraint(&mut self) {
        if self.constraints.contains(&Constraint::NoDoubleScheduling) {
            return;
        }
        let mut overlap_groups: Vec<Vec<usize>> = (0..self.games.len()).map(|g| vec![g]).collect();
        for (a, b) in (0..self.games.len()).tuple_combinations() {
            if self.games[a].overlaps(&self.games[b]) {
                overlap_groups[a].push(b);
                overlap_groups[b].push(a);
            }
        }
        for group in &overlap_groups {
            for team in 0..self.teams.len() {
                let terms: Vec<(i64, VarId)> = group
                    .iter()
                    .map(|&game| (1i64, self.schedule_vars[game][team]))
                    .collect();
                self.model.add_linear_le(&terms, 1);
            }
        }
        self.constraints.insert(Constraint::NoDoubleScheduling);
    }

    fn games_per_team_terms(&self, team: usize) -> Vec<(i64, VarId)> {
        self.schedule_vars
            .iter()
            .map(|row| (1i64, row[team]))
            .collect()
    }

    /// Every team plays the same number of games.
    ///
    /// With `exact` a single shared counter is used; otherwise each team
    /// gets its own counter and every pair of counters may differ by at
    /// most one. The two forms are mutually exclusive.
    pub fn equal_games_constraint(&mut self, exact: bool) -> Result<(), ScheduleError> {
        if exact {
            if self.constraints.contains(&Constraint::ExactlyEqualGames) {
                return Ok(());
            }
            if self.constraints.contains(&Constraint::AlmostEqualGames) {
                return Err(ScheduleError::InconsistentState(
                    "cannot have both constraints for almost and exactly equal games".to_string(),
                ));
            }
            let shared =
                self.model
                    .add_int_in_range(0, self.games.len() as i64, "Games Per Team");
            for team in 0..self.teams.len() {
                let mut terms = self.games_per_team_terms(team);
                terms.push((-1, shared));
                self.model.add_linear_eq(&terms, 0);
            }
            self.num_games_vars = vec![shared];
            self.constraints.insert(Constraint::ExactlyEqualGames);
        } else {
            if self.constraints.contains(&Constraint::AlmostEqualGames) {
                return Ok(());
            }
            if self.constraints.contains(&Constraint::ExactlyEqualGames) {
                return Err(ScheduleError::InconsistentState(
                    "cannot have both constraints for almost and exactly equal games".to_string(),
                ));
            }
            let counters: Vec<VarId> = self
                .teams
                .iter()
                .map(|team| {
                    self.model
                        .add_int_in_range(0, self.games.len() as i64, format!("Games for {team}"))
                })
                .collect();
            for (team, &counter) in counters.iter().enumerate() {
                let mut terms = self.games_per_team_terms(team);
                terms.push((-1, counter));
                self.model.add_linear_eq(&terms, 0);
            }
            for (&a, &b) in counters.iter().tuple_combinations() {
                self.model.add_linear_le(&[(1, a), (-1, b)], 1);
                self.model.add_linear_ge(&[(1, a), (-1, b)], -1);
            }
            self.num_games_vars = counters;
            self.constraints.insert(Constraint::AlmostEqualGames);
        }
        Ok(())
    }

    /// Every unordered pair of teams meets within one game of every other
    /// pair.
    pub fn round_robin_constraint(&mut self) {
        if self.constraints.contains(&Constraint::RoundRobin) {
            return;
        }
        for (&(a, b), &meetings) in &self.games_vs_vars.clone() {
            let mut terms = Vec::with_capacity(self.games.len() + 1);
            for (index, game) in self.games.iter().enumerate() {
                let together = self.model.add_bool(format!(
                    "{} & {} in {game}",
                    self.teams[a], self.teams[b]
                ));
                self.model.add_product(
                    together,
                    &[self.schedule_vars[index][a], self.schedule_vars[index][b]],
                );
                terms.push((1i64, together));
            }
            terms.push((-1, meetings));
            self.model.add_linear_eq(&terms, 0);
        }
        let meeting_vars: Vec<VarId> = self.games_vs_vars.values().copied().collect();
        for (&a, &b) in meeting_vars.iter().tuple_combinations() {
            self.model.add_linear_le(&[(1, a), (-1, b)], 1);
            self.model.add_linear_ge(&[(1, a), (-1, b)], -1);
        }
        self.constraints.insert(Constraint::RoundRobin);
        self.link_pair_counts();
    }

    /// Pins the shared games-per-team counter to exactly `num_games`.
    ///
    /// Registers the exact equal-games family when it is not active yet and
    /// refuses to coexist with the maximize-games objective.
    pub fn require_num_games(&mut self, num_games: i64) -> Result<(), ScheduleError> {
        if self.constraints.contains(&Constraint::ExactNumGames) {
            return Ok(());
        }
        if self.objectives.contains_key(&Objective::MaximizeNumGames) {
            return Err(ScheduleError::InconsistentState(
                "cannot require a specific number of games while maximizing the number of games"
                    .to_string(),
            ));
        }
        self.equal_games_constraint(true)?;
        for &counter in &self.num_games_vars {
            self.model.add_linear_eq(&[(1, counter)], num_games);
        }
        self.constraints.insert(Constraint::ExactNumGames);
        Ok(())
    }

    /// Requires at least `num_games` per team, and at most `max_games` when
    /// given. Shares the exact equal-games counter and conflicts with the
    /// maximize-games objective.
    pub fn require_minimum_games(
        &mut self,
        num_games: i64,
        max_games: Option<i64>,
    ) -> Result<(), ScheduleError> {
        if self.constraints.contains(&Constraint::MinimumRequiredGames) {
            return Ok(());
        }
        if self.objectives.contains_key(&Objective::MaximizeNumGames) {
            return Err(ScheduleError::InconsistentState(
                "cannot require a minimum number of games while maximizing the number of games"
                    .to_string(),
            ));
        }
        self.equal_games_constraint(true)?;
        for &counter in &self.num_games_vars {
            self.model.add_linear_ge(&[(1, counter)], num_games);
            if let Some(max_games) = max_games {
                self.model.add_linear_le(&[(1, counter)], max_games);
            }
        }
        self.constraints.insert(Constraint::MinimumRequiredGames);
        Ok(())
    }

    fn dates_touched(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self
            .games
            .iter()
            .flat_map(|game| game.touched_dates())
            .collect();
        dates.sort();
        dates.dedup();
        dates
    }

    fn games_touching(&self, date: NaiveDate) -> Vec<usize> {
        self.games
            .iter()
            .enumerate()
            .filter(|(_, game)| game.touched_dates().contains(&date))
            .map(|(index, _)| index)
            .collect()
    }

    /// Every team plays exactly one game on every calendar day any game
    /// touches. The hard form of the double-header rule; conflicts with the
    /// soft penalty objective.
    pub fn disallow_double_headers(&mut self) -> Result<(), ScheduleError> {
        if self.constraints.contains(&Constraint::NoDoubleHeaders) {
            return Ok(());
        }
        if self.objectives.contains_key(&Objective::MinimizeDoubleHeaders) {
            return Err(ScheduleError::InconsistentState(
                "cannot forbid double headers while also penalizing them".to_string(),
            ));
        }
        for date in self.dates_touched() {
            let group = self.games_touching(date);
            for team in 0..self.teams.len() {
                let terms: Vec<(i64, VarId)> = group
                    .iter()
                    .map(|&game| (1i64, self.schedule_vars[game][team]))
                    .collect();
                self.model.add_linear_eq(&terms, 1);
            }
        }
        self.constraints.insert(Constraint::NoDoubleHeaders);
        Ok(())
    }

    /// Zeroes the assignment variables of every game a team is unavailable
    /// for. Date markers match every game starting that day; instant
    /// markers match one exact start.
    pub fn unavailability_constraint(
        &mut self,
        unavailable: &BTreeMap<Team, Vec<TimeMarker>>,
    ) -> Result<(), ScheduleError> {
        if self.constraints.contains(&Constraint::Unavailability) {
            return Ok(());
        }
        for (team, markers) in unavailable {
            let index = self
                .teams
                .iter()
                .position(|candidate| candidate == team)
                .ok_or_else(|| {
                    ScheduleError::InvalidInput(format!(
                        "unavailability listed for unknown team {team}"
                    ))
                })?;
            for marker in markers {
                for (game_index, game) in self.games.iter().enumerate() {
                    if marker.matches(game) {
                        self.model
                            .add_linear_eq(&[(1, self.schedule_vars[game_index][index])], 0);
                    }
                }
            }
        }
        self.constraints.insert(Constraint::Unavailability);
        Ok(())
    }

    /// Maximizes the total number of team assignments. Conflicts with the
    /// fixed game-count constraints.
    pub fn maximize_games_objective(&mut self, weight: f64) -> Result<(), ScheduleError> {
        if self.objectives.contains_key(&Objective::MaximizeNumGames) {
            return Ok(());
        }
        if self.constraints.contains(&Constraint::ExactNumGames)
            || self.constraints.contains(&Constraint::MinimumRequiredGames)
        {
            return Err(ScheduleError::InconsistentState(
                "cannot maximize the number of games when the number of games is a constraint"
                    .to_string(),
            ));
        }
        let totals = self.game_totals();
        self.objectives.insert(
            Objective::MaximizeNumGames,
            ObjectiveTerm {
                weight,
                vars: totals.into_iter().map(|var| (1.0, var)).collect(),
            },
        );
        Ok(())
    }

    /// Rewards scheduling the ice-maker teams into draws that are not the
    /// first of their day, and requires at least one such placement.
    pub fn ice_makers_objective(
        &mut self,
        ice_makers: &[Team],
        weight: f64,
    ) -> Result<(), ScheduleError> {
        if self.objectives.contains_key(&Objective::IceMakers) {
            return Ok(());
        }
        let mut maker_indices = Vec::with_capacity(ice_makers.len());
        for team in ice_makers {
            let index = self
                .teams
                .iter()
                .position(|candidate| candidate == team)
                .ok_or_else(|| {
                    ScheduleError::InvalidInput(format!("unknown ice maker team {team}"))
                })?;
            maker_indices.push(index);
        }

        let mut first_start_of_day: BTreeMap<NaiveDate, NaiveDateTime> = BTreeMap::new();
        for game in &self.games {
            let start = game.start();
            first_start_of_day
                .entry(start.date())
                .and_modify(|first| *first = (*first).min(start))
                .or_insert(start);
        }
        let late_games: Vec<usize> = self
            .games
            .iter()
            .enumerate()
            .filter(|(_, game)| first_start_of_day[&game.start().date()] != game.start())
            .map(|(index, _)| index)
            .collect();

        let mut terms = Vec::new();
        for &game in &late_games {
            for &team in &maker_indices {
                terms.push((-1i64, self.schedule_vars[game][team]));
            }
        }
        let total = self.model.add_int_in_range(
            0,
            (late_games.len() * maker_indices.len()) as i64,
            "Ice maker late draws",
        );
        let mut equality = vec![(1i64, total)];
        equality.extend(terms);
        self.model.add_linear_eq(&equality, 0);
        self.model.add_linear_ge(&[(1, total)], 1);

        self.objectives.insert(
            Objective::IceMakers,
            ObjectiveTerm {
                weight,
                vars: vec![(1.0, total)],
            },
        );
        Ok(())
    }

    /// Penalizes teams that play more than one game on a calendar day. The
    /// weight is negated before it joins the maximized sum. Conflicts with
    /// the hard no-double-headers constraint.
    pub fn minimize_double_headers_objective(&mut self, weight: f64) -> Result<(), ScheduleError> {
        if self.objectives.contains_key(&Objective::MinimizeDoubleHeaders) {
            return Ok(());
        }
        if self.constraints.contains(&Constraint::NoDoubleHeaders) {
            return Err(ScheduleError::InconsistentState(
                "cannot penalize double headers while also forbidding them".to_string(),
            ));
        }
        let mut indicators = Vec::new();
        for date in self.dates_touched() {
            let group = self.games_touching(date);
            if group.len() < 2 {
                continue;
            }
            for (team_index, team) in self.teams.iter().enumerate() {
                let indicator = self
                    .model
                    .add_bool(format!("{team} doubles on {date}"));
                let mut upper = vec![(-(group.len() as i64 - 1), indicator)];
                upper.extend(
                    group
                        .iter()
                        .map(|&game| (1i64, self.schedule_vars[game][team_index])),
                );
                self.model.add_linear_le(&upper, 1);
                let mut lower = vec![(-2i64, indicator)];
                lower.extend(
                    group
                        .iter()
                        .map(|&game| (1i64, self.schedule_vars[game][team_index])),
                );
                self.model.add_linear_ge(&lower, 0);
                indicators.push(indicator);
            }
        }
        let total = self.model.add_int_in_range(
            0,
            indicators.len() as i64,
            "Double headers",
        );
        let mut equality = vec![(1i64, total)];
        equality.extend(indicators.iter().map(|&var| (-1i64, var)));
        self.model.add_linear_eq(&equality, 0);

        self.objectives.insert(
            Objective::MinimizeDoubleHeaders,
            ObjectiveTerm {
                weight: -weight.abs(),
                vars: vec![(1.0, total)],
            },
        );
        Ok(())
    }

    /// Shapes draw fullness: rewards draws that are empty or completely
    /// full and penalizes draws holding a single game.
    pub fn empty_full_draws_objective(
        &mut self,
        weight: f64,
        empty_weight: f64,
        lonely_weight: f64,
        full_weight: f64,
    ) {
        if self.objectives.contains_key(&Objective::EmptyFullDraws) {
            return;
        }
        let draws: Vec<(NaiveDateTime, VarId, usize)> = self
            .draw_count_vars
            .iter()
            .map(|(&start, &(counter, capacity))| (start, counter, capacity))
            .collect();
        let mut at_least_one = Vec::new();
        let mut at_least_two = Vec::new();
        let mut completely_full = Vec::new();
        for &(start, counter, capacity) in &draws {
            let capacity = capacity as i64;
            let any = self.model.add_bool(format!("Draw {start} in use"));
            self.model.add_linear_ge(&[(1, counter), (-1, any)], 0);
            self.model.add_linear_le(&[(1, counter), (-capacity, any)], 0);
            at_least_one.push(any);
            if capacity >= 2 {
                let several = self.model.add_bool(format!("Draw {start} has company"));
                self.model.add_linear_ge(&[(1, counter), (-2, several)], 0);
                self.model
                    .add_linear_le(&[(1, counter), (-(capacity - 1), several)], 1);
                at_least_two.push(several);
                let full = self.model.add_bool(format!("Draw {start} full"));
                self.model.add_linear_ge(&[(1, counter), (-capacity, full)], 0);
                self.model
                    .add_linear_le(&[(1, counter), (-1, full)], capacity - 1);
                completely_full.push(full);
            } else {
                // A one-sheet draw is full exactly when it is in use.
                completely_full.push(any);
            }
        }

        let draw_count = draws.len() as i64;
        let empties = self
            .model
            .add_int_in_range(0, draw_count, "Empty draws");
        let mut terms = vec![(1i64, empties)];
        terms.extend(at_least_one.iter().map(|&var| (1i64, var)));
        self.model.add_linear_eq(&terms, draw_count);

        let lonelies = self
            .model
            .add_int_in_range(0, draw_count, "Lonely draws");
        let mut terms = vec![(1i64, lonelies)];
        terms.extend(at_least_one.iter().map(|&var| (-1i64, var)));
        terms.extend(at_least_two.iter().map(|&var| (1i64, var)));
        self.model.add_linear_eq(&terms, 0);

        let fulls = self.model.add_int_in_range(0, draw_count, "Full draws");
        let mut terms = vec![(1i64, fulls)];
        terms.extend(completely_full.iter().map(|&var| (-1i64, var)));
        self.model.add_linear_eq(&terms, 0);

        self.objectives.insert(
            Objective::EmptyFullDraws,
            ObjectiveTerm {
                weight,
                vars: vec![
                    (empty_weight, empties),
                    (lonely_weight, lonelies),
                    (full_weight, fulls),
                ],
            },
        );
    }

    /// Solves the model and snapshots incumbents to `solution_{n}.json`
    /// files in the current directory.
    pub fn solve(&mut self, params: &SolverParams) -> Result<Vec<Vec<Team>>, ScheduleError> {
        self.solve_with_sink(params, &JsonDirSink::default())
    }

    /// Solves the model, streaming every improving incumbent to `sink`.
    ///
    /// # Arguments
    /// * `params` - Worker count, optional wall-clock deadline, verbosity.
    /// * `sink` - Destination for incumbent snapshots.
    ///
    /// # Returns
    /// One team set per game, parallel to [`ScheduleOptimizer::games`], or
    /// `NoSolution` carrying the solver status and its last known bound.
    pub fn solve_with_sink(
        &mut self,
        params: &SolverParams,
        sink: &dyn SnapshotSink,
    ) -> Result<Vec<Vec<Team>>, ScheduleError> {
        if !self.objectives.is_empty() {
            let mut terms = Vec::new();
            for term in self.objectives.values() {
                for &(coefficient, var) in &term.vars {
                    terms.push((term.weight * coefficient, var));
                }
            }
            self.model.set_maximize(terms);
        }
        if let Err(reason) = self.model.validate() {
            error!("Model failed validation: {reason}");
            return Err(ScheduleError::NoSolution {
                status: SolverStatus::ModelInvalid,
                best_bound: None,
            });
        }
        info!(
            "Solving: {} variables | {} constraints | {} teams | {} games | {} workers",
            self.model.num_vars(),
            self.model.num_constraints(),
            self.teams.len(),
            self.games.len(),
            params.num_workers
        );

        let counter = AtomicUsize::new(0);
        let schedule_vars = &self.schedule_vars;
        let teams = &self.teams;
        let games = &self.games;
        let callback = |incumbent: &Incumbent<'_>| {
            let number = counter.fetch_add(1, Ordering::SeqCst) + 1;
            info!(
                "Solution {number}: objective {} (bound {}) | {} nodes | {:.3}s wall",
                incumbent.objective_value,
                incumbent.objective_bound,
                incumbent.stats.nodes,
                incumbent.wall_time.as_secs_f64()
            );
            let snapshot = SolutionSnapshot {
                solution_number: number,
                objective_value: incumbent.objective_value,
                objective_bound: incumbent.objective_bound,
                wall_time_secs: incumbent.wall_time.as_secs_f64(),
                user_time_secs: incumbent.user_time.as_secs_f64(),
                nodes: incumbent.stats.nodes,
                backtracks: incumbent.stats.backtracks,
                propagations: incumbent.stats.propagations,
                teams: teams.clone(),
                games: games.clone(),
                assignments: materialize_assignment(schedule_vars, teams, incumbent.values),
            };
            if let Err(failure) = sink.write(&snapshot) {
                error!("Failed to persist solution {number}: {failure}");
            }
        };

        let result = self.model.solve_with_callback(params, Some(&callback));
        match result.status {
            SolverStatus::Optimal | SolverStatus::Feasible => {
                let values = result.values.ok_or(ScheduleError::NoSolution {
                    status: SolverStatus::Unknown,
                    best_bound: result.objective_bound,
                })?;
                info!(
                    "Solver finished: {} | objective {:?} | {} nodes",
                    result.status, result.objective_value, result.stats.nodes
                );
                Ok(materialize_assignment(
                    &self.schedule_vars,
                    &self.teams,
                    &values,
                ))
            }
            status => Err(ScheduleError::NoSolution {
                status,
                best_bound: result.objective_bound,
            }),
        }
    }
}

fn materialize_assignment(
    schedule_vars: &[Vec<VarId>],
    teams: &[Team],
    values: &[i64],
) -> Vec<Vec<Team>> {
    schedule_vars
        .iter()
        .map(|row| {
            row.iter()
                .zip(teams)
                .filter(|&(&var, _)| values[var] == 1)
                .map(|(_, team)| team.clone())
                .collect()
        })
        .collect()
}
