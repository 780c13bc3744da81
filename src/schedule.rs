// Std library
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// External crates
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use itertools::Itertools;
use log::info;

// Local modules
use crate::domain::{Game, Team, TimeMarker, Venue, VenueKind, Weekday};
use crate::error::ScheduleError;
use crate::optimizer::{MAXIMIZE_GAMES_WEIGHT, ScheduleOptimizer};
use crate::snapshot::{JsonDirSink, SnapshotSink};
use crate::solver::SolverParams;

/// A square symmetric count matrix with one axis per team slot of a game.
///
/// For pairwise games this is the classic games-against matrix: cell
/// `[i][j]` counts how often team `i` met team `j`. Cells are unsigned
/// 8-bit, which caps the roster at 255 teams.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GamesAgainstMatrix {
    dims: usize,
    size: usize,
    data: Vec<u8>,
}

impl GamesAgainstMatrix {
    fn zeros(dims: usize, size: usize) -> GamesAgainstMatrix {
        GamesAgainstMatrix {
            dims,
            size,
            data: vec![0; size.pow(dims as u32)],
        }
    }

    fn offset(&self, indices: &[usize]) -> usize {
        indices.iter().fold(0, |acc, &index| acc * self.size + index)
    }

    /// The count at the given index tuple, one index per axis.
    pub fn get(&self, indices: &[usize]) -> u8 {
        self.data[self.offset(indices)]
    }

    fn increment(&mut self, indices: &[usize]) -> Result<(), ScheduleError> {
        let offset = self.offset(indices);
        self.data[offset] = self.data[offset].checked_add(1).ok_or_else(|| {
            ScheduleError::CapacityExceeded("games against count exceeds 255".to_string())
        })?;
        Ok(())
    }

    /// Number of axes, equal to the teams-per-game cardinality.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Length of every axis, equal to the number of teams.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Sum of every cell. Dividing by `dims!` gives the number of non-empty
    /// assignments.
    pub fn total(&self) -> u64 {
        self.data.iter().map(|&count| count as u64).sum()
    }

    /// One row of a two-axis matrix.
    pub fn row(&self, index: usize) -> Vec<u8> {
        (0..self.size).map(|other| self.get(&[index, other])).collect()
    }
}

/// A draw schedule: a sequence of game slots and a parallel sequence of
/// team assignments.
///
/// Slots may exist without assignments; assignments are produced by
/// [`Schedule::assign`] or loaded from CSV. All non-empty assignments share
/// one cardinality, and slots are never mutated once assignments exist.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schedule {
    games: Vec<Game>,
    assignments: Vec<Vec<Team>>,
}

impl Schedule {
    /// Creates an empty schedule.
    pub fn new() -> Schedule {
        Schedule::default()
    }

    /// Builds a schedule from parallel game and assignment lists.
    ///
    /// An empty assignment list is expanded to one empty assignment per
    /// game. Fails with `InvalidInput` when the lengths disagree or the
    /// non-empty assignments have uneven cardinalities.
    pub fn from_parts(
        games: Vec<Game>,
        assignments: Vec<Vec<Team>>,
    ) -> Result<Schedule, ScheduleError> {
        let assignments = if assignments.is_empty() {
            vec![Vec::new(); games.len()]
        } else {
            assignments
        };
        if assignments.len() != games.len() {
            return Err(ScheduleError::InvalidInput(
                "improper matchup between number of games and number of team assignments"
                    .to_string(),
            ));
        }
        let cardinalities: BTreeSet<usize> = assignments
            .iter()
            .map(Vec::len)
            .filter(|&len| len != 0)
            .collect();
        if cardinalities.len() > 1 {
            return Err(ScheduleError::InvalidInput(
                "uneven number of teams assigned to games".to_string(),
            ));
        }
        Ok(Schedule { games, assignments })
    }

    /// Generates the full slot grid spanning a date window.
    ///
    /// One game is produced for every combination of matching date, game
    /// time and venue. Dates run from `start_date` to `end_date` inclusive
    /// and keep only the requested weekdays, defaulting to the weekday of
    /// `start_date`; the grid is ordered weeks outermost, then weekdays,
    /// then times, with venues cycling fastest. Inputs are taken as given:
    /// duplicate times, weekdays or venues yield duplicate slots.
    ///
    /// # Arguments
    /// * `start_date` - First day of the window.
    /// * `end_date` - Last day of the window, inclusive.
    /// * `game_times` - Draw start times for every playing day.
    /// * `weekdays` - Playing weekdays; empty means the start date's.
    /// * `game_length` - Optional duration stamped on every slot.
    /// * `venues` - Venues to cross with every date and time; empty means
    ///   slots carry no venue.
    ///
    /// # Returns
    /// The generated schedule, or `InvalidInput` when `start_date` is after
    /// `end_date`.
    pub fn naive_schedule(
        start_date: NaiveDate,
        end_date: NaiveDate,
        game_times: &[NaiveTime],
        weekdays: &[Weekday],
        game_length: Option<TimeDelta>,
        venues: &[Venue],
    ) -> Result<Schedule, ScheduleError> {
        if start_date > end_date {
            return Err(ScheduleError::InvalidInput(
                "start date is after end date".to_string(),
            ));
        }
        let weekdays: Vec<Weekday> = if weekdays.is_empty() {
            vec![Weekday::from_date(start_date)]
        } else {
            weekdays.to_vec()
        };
        let anchors: Vec<NaiveDate> = weekdays
            .iter()
            .map(|&weekday| Weekday::next_on_or_after(start_date, weekday))
            .collect();
        let mut days = Vec::new();
        for week in 0i64.. {
            let mut any_this_week = false;
            for &anchor in &anchors {
                let day = anchor + TimeDelta::weeks(week);
                if day <= end_date {
                    days.push(day);
                    any_this_week = true;
                }
            }
            if !any_this_week {
                break;
            }
        }
        let mut games = Vec::new();
        for &day in &days {
            for &time in game_times {
                if venues.is_empty() {
                    games.push(Game::new(day, time, game_length, None));
                } else {
                    for venue in venues {
                        games.push(Game::new(day, time, game_length, Some(venue.clone())));
                    }
                }
            }
        }
        info!(
            "Generated {} slots over {} playing days",
            games.len(),
            days.len()
        );
        Schedule::from_parts(games, Vec::new())
    }

    pub fn games(&self) -> &[Game] {
        &self.games
    }

    pub fn assignments(&self) -> &[Vec<Team>] {
        &self.assignments
    }

    /// The distinct start instants over all games.
    pub fn start_times(&self) -> BTreeSet<NaiveDateTime> {
        self.games.iter().map(Game::start).collect()
    }

    /// The distinct venues over all games, skipping slots without one.
    pub fn venues(&self) -> BTreeSet<Venue> {
        self.games
            .iter()
            .filter_map(|game| game.venue.clone())
            .collect()
    }

    /// The single venue variant in use.
    ///
    /// Fails with `NotAvailable` when no game carries a venue and with
    /// `InconsistentState` when several variants are mixed.
    pub fn venue_variant(&self) -> Result<VenueKind, ScheduleError> {
        let venues = self.venues();
        let mut kinds: Vec<VenueKind> = venues.iter().map(Venue::kind).collect();
        kinds.dedup();
        match kinds.len() {
            0 => Err(ScheduleError::NotAvailable(
                "no venues are assigned and therefore the variant is unknown".to_string(),
            )),
            1 => Ok(kinds[0]),
            _ => Err(ScheduleError::InconsistentState(
                "venues are not all the same variant".to_string(),
            )),
        }
    }

    /// True when at least one game has teams assigned.
    pub fn teams_assigned(&self) -> bool {
        self.assignments.iter().any(|teams| !teams.is_empty())
    }

    /// The distinct teams over all assignments, in team order.
    pub fn teams(&self) -> BTreeSet<Team> {
        self.assignments.iter().flatten().cloned().collect()
    }

    /// True when every assignment, empty ones included, has the same
    /// cardinality.
    pub fn same_num_teams_per_game(&self) -> bool {
        self.assignments.iter().map(Vec::len).dedup().count() <= 1
    }

    /// The common cardinality of the non-empty assignments.
    ///
    /// Fails with `NotAvailable` when nothing is assigned yet and with
    /// `InconsistentState` when cardinalities differ.
    pub fn teams_per_game(&self) -> Result<usize, ScheduleError> {
        let cardinalities: BTreeSet<usize> = self
            .assignments
            .iter()
            .map(Vec::len)
            .filter(|&len| len != 0)
            .collect();
        match cardinalities.len() {
            0 => Err(ScheduleError::NotAvailable(
                "no teams are assigned to any game".to_string(),
            )),
            1 => Ok(cardinalities.into_iter().next().unwrap_or_default()),
            _ => Err(ScheduleError::InconsistentState(
                "uneven number of teams assigned to each game".to_string(),
            )),
        }
    }

    /// Counts how often every combination of teams met.
    ///
    /// The matrix has `teams_per_game` axes of length `len(teams)`, teams
    /// indexed in sorted order, and is incremented once per permutation of
    /// each assignment, making it symmetric along every pair of axes.
    ///
    /// # Returns
    /// The matrix, `CapacityExceeded` past 255 teams, or the cardinality
    /// errors of [`Schedule::teams_per_game`].
    pub fn games_against_matrix(&self) -> Result<GamesAgainstMatrix, ScheduleError> {
        let teams: Vec<Team> = self.teams().into_iter().collect();
        if teams.len() > u8::MAX as usize {
            return Err(ScheduleError::CapacityExceeded(format!(
                "{} teams exceed the 255 supported by the games against matrix",
                teams.len()
            )));
        }
        let teams_per_game = self.teams_per_game()?;
        let mut matrix = GamesAgainstMatrix::zeros(teams_per_game, teams.len());
        for assignment in &self.assignments {
            if assignment.is_empty() {
                continue;
            }
            let mut indices = Vec::with_capacity(assignment.len());
            for team in assignment {
                let index = teams.binary_search(team).map_err(|_| {
                    ScheduleError::InconsistentState(format!("unknown team {team} in assignment"))
                })?;
                indices.push(index);
            }
            for permutation in indices.iter().copied().permutations(teams_per_game) {
                matrix.increment(&permutation)?;
            }
        }
        Ok(matrix)
    }

    /// How often each team played at each venue. Teams start at zero for
    /// every known venue; games without a venue are skipped.
    pub fn games_per_venue(&self) -> BTreeMap<Team, BTreeMap<Venue, u32>> {
        let venues = self.venues();
        let mut out: BTreeMap<Team, BTreeMap<Venue, u32>> = BTreeMap::new();
        for (game, assignment) in self.games.iter().zip(&self.assignments) {
            let Some(venue) = &game.venue else {
                continue;
            };
            for team in assignment {
                let counts = out
                    .entry(team.clone())
                    .or_insert_with(|| venues.iter().map(|venue| (venue.clone(), 0)).collect());
                if let Some(count) = counts.get_mut(venue) {
                    *count += 1;
                }
            }
        }
        out
    }

    /// Crosses every venue with every game slot.
    ///
    /// Only legal while no game carries a venue and nothing is assigned;
    /// either condition fails with `InconsistentState`. Slot order is
    /// preserved, venues cycling fastest.
    pub fn populate_venues(&mut self, venues: &[Venue]) -> Result<(), ScheduleError> {
        if self.games.iter().any(|game| game.venue.is_some()) {
            return Err(ScheduleError::InconsistentState(
                "venues are already assigned".to_string(),
            ));
        }
        if self.teams_assigned() {
            return Err(ScheduleError::InconsistentState(
                "teams are already assigned to games".to_string(),
            ));
        }
        self.games = self
            .games
            .iter()
            .cartesian_product(venues)
            .map(|(game, venue)| {
                Game::new(
                    game.date,
                    game.start_time,
                    game.length,
                    Some(venue.clone()),
                )
            })
            .collect();
        self.assignments = vec![Vec::new(); self.games.len()];
        Ok(())
    }

    /// Assigns teams to slots with the default constraint policy and the
    /// default snapshot sink writing into the current directory.
    ///
    /// The policy forbids temporal double booking, fills every used slot
    /// with exactly two teams, equalizes games per team exactly, keeps all
    /// pairings within one meeting of each other, pins the per-team game
    /// count when `required_games` is given (otherwise maximizes the number
    /// of games), and forbids double headers.
    pub fn assign(
        &mut self,
        teams: &[Team],
        required_games: Option<i64>,
    ) -> Result<(), ScheduleError> {
        self.assign_with_options(
            teams,
            required_games,
            None,
            &SolverParams::default(),
            &JsonDirSink::default(),
        )
    }

    /// [`Schedule::assign`] with explicit blackouts, solver parameters and
    /// snapshot sink.
    pub fn assign_with_options(
        &mut self,
        teams: &[Team],
        required_games: Option<i64>,
        blackouts: Option<&BTreeMap<Team, Vec<TimeMarker>>>,
        params: &SolverParams,
        sink: &dyn SnapshotSink,
    ) -> Result<(), ScheduleError> {
        let mut order: Vec<usize> = (0..self.games.len()).collect();
        order.sort_by(|&a, &b| self.games[a].cmp(&self.games[b]));
        let sorted_games: Vec<Game> = order.iter().map(|&index| self.games[index].clone()).collect();

        info!("Building constraint model for {} teams", teams.len());
        let mut optimizer = ScheduleOptimizer::new(&sorted_games, teams);
        optimizer.no_double_scheduling_constraint();
        optimizer.teams_per_game_constraint();
        optimizer.equal_games_constraint(true)?;
        optimizer.round_robin_constraint();
        if let Some(required) = required_games {
            optimizer.require_num_games(required)?;
        } else {
            optimizer.maximize_games_objective(MAXIMIZE_GAMES_WEIGHT)?;
        }
        optimizer.disallow_double_headers()?;
        if let Some(blackouts) = blackouts {
            optimizer.unavailability_constraint(blackouts)?;
        }

        let solved = optimizer.solve_with_sink(params, sink)?;
        let mut assignments = vec![Vec::new(); self.games.len()];
        for (slot, &original) in order.iter().enumerate() {
            assignments[original] = solved[slot].clone();
        }
        self.assignments = assignments;
        Ok(())
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (game, assignment) in self.games.iter().zip(&self.assignments) {
            let teams = assignment.iter().map(Team::to_string).join(" vs ");
            writeln!(f, "{game}: {teams}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn time(hour: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap()
    }

    fn team(name: &str) -> Team {
        Team::new(name, Vec::new())
    }

    #[test]
    fn naive_schedule_spans_the_window_on_matching_weekdays() {
        // 2024-01-01 is a Monday; the window holds five Mondays.
        let schedule = Schedule::naive_schedule(
            date(1),
            date(31),
            &[time(19)],
            &[Weekday::Monday],
            Some(TimeDelta::hours(2)),
            &[],
        )
        .unwrap();
        assert_eq!(schedule.games().len(), 5);
        assert!(schedule
            .games()
            .iter()
            .all(|game| Weekday::from_date(game.date) == Weekday::Monday));
    }

    #[test]
    fn naive_schedule_defaults_to_the_start_weekday() {
        let schedule = Schedule::naive_schedule(
            date(3),
            date(17),
            &[time(19)],
            &[],
            None,
            &[],
        )
        .unwrap();
        // Jan 3, 10 and 17 are the Wednesdays in range.
        assert_eq!(schedule.games().len(), 3);
        assert_eq!(schedule.games()[0].date, date(3));
        assert_eq!(schedule.games()[2].date, date(17));
    }

    #[test]
    fn naive_schedule_crosses_times_and_venues_in_order() {
        let sheets = vec![Venue::Sheet(1), Venue::Sheet(2)];
        let schedule = Schedule::naive_schedule(
            date(1),
            date(1),
            &[time(18), time(20)],
            &[],
            Some(TimeDelta::hours(2)),
            &sheets,
        )
        .unwrap();
        let venues: Vec<Option<Venue>> =
            schedule.games().iter().map(|game| game.venue.clone()).collect();
        assert_eq!(
            venues,
            vec![
                Some(Venue::Sheet(1)),
                Some(Venue::Sheet(2)),
                Some(Venue::Sheet(1)),
                Some(Venue::Sheet(2)),
            ]
        );
        assert_eq!(schedule.games()[0].start_time, time(18));
        assert_eq!(schedule.games()[2].start_time, time(20));
    }

    #[test]
    fn naive_schedule_rejects_reversed_windows() {
        let result = Schedule::naive_schedule(date(20), date(10), &[time(19)], &[], None, &[]);
        assert!(matches!(result, Err(ScheduleError::InvalidInput(_))));
    }

    #[test]
    fn naive_schedule_keeps_duplicate_inputs() {
        let schedule = Schedule::naive_schedule(
            date(1),
            date(7),
            &[time(19), time(19)],
            &[],
            None,
            &[],
        )
        .unwrap();
        assert_eq!(schedule.games().len(), 2);
        assert_eq!(schedule.games()[0], schedule.games()[1]);
    }

    #[test]
    fn populate_venues_crosses_each_slot_with_each_venue() {
        let mut schedule = Schedule::naive_schedule(
            date(1),
            date(8),
            &[time(19)],
            &[],
            Some(TimeDelta::hours(2)),
            &[],
        )
        .unwrap();
        schedule
            .populate_venues(&[Venue::Sheet(1), Venue::Sheet(2)])
            .unwrap();
        assert_eq!(schedule.games().len(), 4);
        let mut sorted = schedule.games().to_vec();
        sorted.sort();
        assert_eq!(schedule.games(), &sorted[..]);
    }

    #[test]
    fn populate_venues_refuses_to_run_twice() {
        let mut schedule = Schedule::naive_schedule(
            date(1),
            date(1),
            &[time(19)],
            &[],
            None,
            &[Venue::Sheet(1)],
        )
        .unwrap();
        let result = schedule.populate_venues(&[Venue::Sheet(2)]);
        assert!(matches!(result, Err(ScheduleError::InconsistentState(_))));
    }

    #[test]
    fn populate_venues_refuses_assigned_schedules() {
        let games = vec![Game::new(date(1), time(19), None, None)];
        let assignments = vec![vec![team("A"), team("B")]];
        let mut schedule = Schedule::from_parts(games, assignments).unwrap();
        let result = schedule.populate_venues(&[Venue::Sheet(1)]);
        assert!(matches!(result, Err(ScheduleError::InconsistentState(_))));
    }

    #[test]
    fn from_parts_rejects_uneven_assignments() {
        let games = vec![
            Game::new(date(1), time(19), None, None),
            Game::new(date(8), time(19), None, None),
        ];
        let assignments = vec![vec![team("A"), team("B")], vec![team("C")]];
        assert!(matches!(
            Schedule::from_parts(games, assignments),
            Err(ScheduleError::InvalidInput(_))
        ));
    }

    #[test]
    fn teams_per_game_reports_missing_and_uneven_assignments() {
        let games = vec![
            Game::new(date(1), time(19), None, None),
            Game::new(date(8), time(19), None, None),
        ];
        let schedule = Schedule::from_parts(games.clone(), Vec::new()).unwrap();
        assert!(matches!(
            schedule.teams_per_game(),
            Err(ScheduleError::NotAvailable(_))
        ));

        let mut uneven = Schedule::from_parts(games, Vec::new()).unwrap();
        uneven.assignments[0] = vec![team("A"), team("B")];
        uneven.assignments[1] = vec![team("C")];
        assert!(matches!(
            uneven.teams_per_game(),
            Err(ScheduleError::InconsistentState(_))
        ));
        assert!(!uneven.same_num_teams_per_game());
    }

    #[test]
    fn venue_variant_requires_a_single_variant() {
        let games = vec![Game::new(date(1), time(19), None, None)];
        let schedule = Schedule::from_parts(games, Vec::new()).unwrap();
        assert!(matches!(
            schedule.venue_variant(),
            Err(ScheduleError::NotAvailable(_))
        ));

        let games = vec![
            Game::new(date(1), time(19), None, Some(Venue::Sheet(1))),
            Game::new(date(8), time(19), None, Some(Venue::Opaque("Club".to_string()))),
        ];
        let schedule = Schedule::from_parts(games, Vec::new()).unwrap();
        assert!(matches!(
            schedule.venue_variant(),
            Err(ScheduleError::InconsistentState(_))
        ));

        let games = vec![
            Game::new(date(1), time(19), None, Some(Venue::Sheet(1))),
            Game::new(date(8), time(19), None, Some(Venue::Sheet(2))),
        ];
        let schedule = Schedule::from_parts(games, Vec::new()).unwrap();
        assert_eq!(schedule.venue_variant().unwrap(), VenueKind::Sheet);
    }

    #[test]
    fn games_against_matrix_counts_every_permutation() {
        let games = vec![
            Game::new(date(1), time(19), None, None),
            Game::new(date(8), time(19), None, None),
            Game::new(date(15), time(19), None, None),
        ];
        let assignments = vec![
            vec![team("A"), team("B")],
            vec![team("A"), team("C")],
            Vec::new(),
        ];
        let schedule = Schedule::from_parts(games, assignments).unwrap();
        let matrix = schedule.games_against_matrix().unwrap();
        // Teams sort to A, B, C.
        assert_eq!(matrix.get(&[0, 1]), 1);
        assert_eq!(matrix.get(&[1, 0]), 1);
        assert_eq!(matrix.get(&[0, 2]), 1);
        assert_eq!(matrix.get(&[1, 2]), 0);
        assert_eq!(matrix.get(&[0, 0]), 0);
        // Two non-empty assignments, two permutations each.
        assert_eq!(matrix.total(), 4);
    }

    #[test]
    fn games_per_venue_prefills_every_known_venue() {
        let sheet_one = Venue::Sheet(1);
        let sheet_two = Venue::Sheet(2);
        let games = vec![
            Game::new(date(1), time(19), None, Some(sheet_one.clone())),
            Game::new(date(8), time(19), None, Some(sheet_two.clone())),
        ];
        let assignments = vec![
            vec![team("A"), team("B")],
            vec![team("A"), team("C")],
        ];
        let schedule = Schedule::from_parts(games, assignments).unwrap();
        let per_venue = schedule.games_per_venue();
        assert_eq!(per_venue[&team("A")][&sheet_one], 1);
        assert_eq!(per_venue[&team("A")][&sheet_two], 1);
        assert_eq!(per_venue[&team("B")][&sheet_two], 0);
        assert_eq!(per_venue[&team("C")][&sheet_two], 1);
    }
}
