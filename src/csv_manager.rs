// Std library
use std::collections::BTreeMap;
use std::path::Path;

// External crates
use chrono::{NaiveDate, NaiveTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use itertools::Itertools;
use log::info;

// Local modules
use crate::domain::{Game, Team, TimeMarker, VenueKind, game_length_from_str};
use crate::error::ScheduleError;
use crate::schedule::Schedule;

/// Column layout sniffed from a team CSV header.
struct TeamHeader {
    team_name: usize,
    first_name: Option<usize>,
    last_name: Option<usize>,
    teammates: Vec<usize>,
}

/// Structure responsible for reading and writing the CSV interfaces: team
/// rosters, draw schedules and blackout times.
pub struct CsvManager;

impl CsvManager {
    fn reader(path: &Path, has_headers: bool) -> Result<csv::Reader<std::fs::File>, ScheduleError> {
        ReaderBuilder::new()
            .has_headers(has_headers)
            .flexible(true)
            .trim(Trim::All)
            .comment(Some(b'#'))
            .from_path(path)
            .map_err(|error| {
                ScheduleError::InvalidInput(format!("cannot open {}: {error}", path.display()))
            })
    }

    /// Sniffs the roster columns out of a team CSV header.
    ///
    /// Matching is a case-insensitive substring test on each cell: the team
    /// name column mentions team and name but not mate, the first and last
    /// name columns mention first or last plus name, and every column
    /// mentioning team, name and mate carries one teammate. The first match
    /// wins for the single-column roles.
    fn parse_team_header(header: &StringRecord) -> Result<TeamHeader, ScheduleError> {
        let mut team_name = None;
        let mut first_name = None;
        let mut last_name = None;
        let mut teammates = Vec::new();
        for (column, cell) in header.iter().enumerate() {
            let cell = cell.to_lowercase();
            let has_team = cell.contains("team");
            let has_mate = cell.contains("mate");
            let has_name = cell.contains("name");
            if cell.contains("first") && has_name && first_name.is_none() {
                first_name = Some(column);
            }
            if cell.contains("last") && has_name && last_name.is_none() {
                last_name = Some(column);
            }
            if has_team && has_name && has_mate {
                teammates.push(column);
            }
            if has_team && has_name && !has_mate && team_name.is_none() {
                team_name = Some(column);
            }
        }
        match team_name {
            Some(team_name) => Ok(TeamHeader {
                team_name,
                first_name,
                last_name,
                teammates,
            }),
            None => Err(ScheduleError::InvalidInput(
                "team CSV header has no team name column".to_string(),
            )),
        }
    }

    /// Reads a team roster from a CSV file.
    ///
    /// # Arguments
    /// * `path` - The roster file. The header names the columns, see
    ///   [`CsvManager::parse_team_header`]; each data row yields one team
    ///   whose first member is `"{first} {last}"`.
    ///
    /// # Returns
    /// The teams in row order, or `InvalidInput` for an unusable header or
    /// row.
    pub fn read_team_csv(path: &Path) -> Result<Vec<Team>, ScheduleError> {
        let mut reader = Self::reader(path, true)?;
        let header = reader
            .headers()
            .map_err(|error| ScheduleError::InvalidInput(format!("bad team CSV header: {error}")))?
            .clone();
        let layout = Self::parse_team_header(&header)?;

        let mut teams = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|error| {
                ScheduleError::InvalidInput(format!("bad team CSV row {}: {error}", row + 2))
            })?;
            let cell = |column: usize| record.get(column).unwrap_or("").trim();
            let name = cell(layout.team_name);
            if name.is_empty() {
                return Err(ScheduleError::InvalidInput(format!(
                    "team CSV row {} has no team name",
                    row + 2
                )));
            }
            let mut members = Vec::new();
            let lead = [
                layout.first_name.map(cell).unwrap_or(""),
                layout.last_name.map(cell).unwrap_or(""),
            ]
            .join(" ");
            let lead = lead.trim();
            if !lead.is_empty() {
                members.push(lead.to_string());
            }
            for &column in &layout.teammates {
                let mate = cell(column);
                if !mate.is_empty() {
                    members.push(mate.to_string());
                }
            }
            teams.push(Team::new(name, members));
        }
        info!("Read {} teams from {}", teams.len(), path.display());
        Ok(teams)
    }

    fn parse_start_time(cell: &str) -> Result<NaiveTime, ScheduleError> {
        NaiveTime::parse_from_str(cell, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(cell, "%H:%M"))
            .map_err(|_| {
                ScheduleError::InvalidInput(format!("{cell:?} is not a HH:MM[:SS] time"))
            })
    }

    /// Reads a draw schedule from a CSV file.
    ///
    /// The header must start with `Start Date, Start Time, Game Length`
    /// followed by the venue variant name, which selects the venue parser;
    /// any later `Team N` columns carry assignments. Lines starting with
    /// `#` are comments. Empty length, venue or team cells mean absent.
    ///
    /// # Arguments
    /// * `path` - The schedule file.
    /// * `teams` - When given, team cells resolve against this roster and
    ///   unknown names fail; otherwise bare teams are created from the
    ///   cell text.
    pub fn read_schedule_csv(
        path: &Path,
        teams: Option<&[Team]>,
    ) -> Result<Schedule, ScheduleError> {
        let mut reader = Self::reader(path, true)?;
        let header = reader
            .headers()
            .map_err(|error| {
                ScheduleError::InvalidInput(format!("bad schedule CSV header: {error}"))
            })?
            .clone();
        let expected = ["Start Date", "Start Time", "Game Length"];
        let leading: Vec<&str> = header.iter().take(3).map(str::trim).collect();
        if leading != expected || header.len() < 4 {
            return Err(ScheduleError::InvalidInput(format!(
                "schedule CSV {} has an improper header",
                path.display()
            )));
        }
        let venue_kind = VenueKind::from_name(header.get(3).unwrap_or(""));
        let team_columns: Vec<usize> = header
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.to_lowercase().starts_with("team "))
            .map(|(column, _)| column)
            .collect();
        let roster: BTreeMap<&str, &Team> = teams
            .unwrap_or(&[])
            .iter()
            .map(|team| (team.name(), team))
            .collect();

        let mut games = Vec::new();
        let mut assignments = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|error| {
                ScheduleError::InvalidInput(format!("bad schedule CSV row {}: {error}", row + 2))
            })?;
            if record.len() < 4 {
                return Err(ScheduleError::InvalidInput(format!(
                    "schedule CSV row {} is missing cells",
                    row + 2
                )));
            }
            let cell = |column: usize| record.get(column).unwrap_or("").trim();
            let date: NaiveDate = cell(0).parse().map_err(|_| {
                ScheduleError::InvalidInput(format!("{:?} is not an ISO date", cell(0)))
            })?;
            let start_time = Self::parse_start_time(cell(1))?;
            let length = match cell(2) {
                "" => None,
                text => Some(game_length_from_str(text)?),
            };
            let venue = match cell(3) {
                "" => None,
                text => Some(venue_kind.parse(text)?),
            };
            games.push(Game::new(date, start_time, length, venue));

            let mut assigned = Vec::new();
            for &column in &team_columns {
                let name = cell(column);
                if name.is_empty() {
                    continue;
                }
                if teams.is_some() {
                    let team = roster.get(name).ok_or_else(|| {
                        ScheduleError::InvalidInput(format!(
                            "schedule names unknown team {name:?}"
                        ))
                    })?;
                    assigned.push((*team).clone());
                } else {
                    assigned.push(Team::new(name, Vec::new()));
                }
            }
            assignments.push(assigned);
        }
        info!("Read {} slots from {}", games.len(), path.display());
        Schedule::from_parts(games, assignments)
    }

    /// Writes a schedule in the canonical CSV form read back by
    /// [`CsvManager::read_schedule_csv`].
    ///
    /// Requires venues, since the venue variant names the fourth column.
    /// Assigned schedules get one `Team N` column per team slot, with
    /// unassigned games leaving those cells empty.
    pub fn write_schedule_csv(schedule: &Schedule, path: &Path) -> Result<(), ScheduleError> {
        let venue_kind = schedule.venue_variant()?;
        let teams_per_game = if schedule.teams_assigned() {
            schedule.teams_per_game()?
        } else {
            0
        };
        let mut header = vec![
            "Start Date".to_string(),
            "Start Time".to_string(),
            "Game Length".to_string(),
            venue_kind.name().to_string(),
        ];
        header.extend((0..teams_per_game).map(|slot| format!("Team {slot}")));

        let mut body = header.join(", ");
        body.push('\n');
        for (game, assignment) in schedule.games().iter().zip(schedule.assignments()) {
            let mut cells = vec![game.to_csv()];
            for slot in 0..teams_per_game {
                cells.push(
                    assignment
                        .get(slot)
                        .map(|team| team.name().to_string())
                        .unwrap_or_default(),
                );
            }
            body.push_str(&cells.join(", "));
            body.push('\n');
        }
        std::fs::write(path, body)?;
        info!(
            "Wrote {} slots to {}",
            schedule.games().len(),
            path.display()
        );
        Ok(())
    }

    /// Reads per-team blackout times.
    ///
    /// Each non-comment row is a team name followed by one marker per
    /// cell, either a date (`YYYY-MM-DD`) or an instant
    /// (`YYYY-MM-DD HH:MM[:SS]`). Team names resolve against the roster.
    pub fn read_blackout_csv(
        path: &Path,
        teams: &[Team],
    ) -> Result<BTreeMap<Team, Vec<TimeMarker>>, ScheduleError> {
        let mut reader = Self::reader(path, false)?;
        let roster: BTreeMap<&str, &Team> = teams.iter().map(|team| (team.name(), team)).collect();
        let mut blackouts: BTreeMap<Team, Vec<TimeMarker>> = BTreeMap::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|error| {
                ScheduleError::InvalidInput(format!("bad blackout CSV row {}: {error}", row + 1))
            })?;
            let mut cells = record.iter().map(str::trim).filter(|cell| !cell.is_empty());
            let Some(name) = cells.next() else {
                continue;
            };
            let team = roster.get(name).ok_or_else(|| {
                ScheduleError::InvalidInput(format!("blackouts name unknown team {name:?}"))
            })?;
            let markers: Vec<TimeMarker> = cells.map(str::parse).try_collect()?;
            blackouts.entry((*team).clone()).or_default().extend(markers);
        }
        Ok(blackouts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Venue;
    use chrono::TimeDelta;
    use std::path::PathBuf;

    fn write_fixture(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn team_csv_header_detection_is_substring_based() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "teams.csv",
            "Team Name, First Name, Last Name, Teammate Name 1, Teammate Name 2\n\
             Stones, Alice, Ang, Bob, Carol\n\
             Brooms, , Ng, Dave,\n",
        );
        let teams = CsvManager::read_team_csv(&path).unwrap();
        assert_eq!(teams.len(), 2);
        assert_eq!(teams[0].name(), "Stones");
        assert_eq!(teams[0].members(), ["Alice Ang", "Bob", "Carol"]);
        assert_eq!(teams[1].members(), ["Dave", "Ng"]);
    }

    #[test]
    fn team_csv_without_a_team_name_column_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "teams.csv", "First Name, Last Name\nAlice, Ang\n");
        assert!(matches!(
            CsvManager::read_team_csv(&path),
            Err(ScheduleError::InvalidInput(_))
        ));
    }

    #[test]
    fn teammate_columns_need_all_three_markers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "teams.csv",
            "team name, teammate name, team id\nStones, Bob, 7\n",
        );
        let teams = CsvManager::read_team_csv(&path).unwrap();
        assert_eq!(teams[0].name(), "Stones");
        assert_eq!(teams[0].members(), ["Bob"]);
    }

    #[test]
    fn schedule_csv_resolves_teams_and_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "schedule.csv",
            "Start Date, Start Time, Game Length, Sheet, Team 0, Team 1\n\
             # league night\n\
             2024-01-05, 19:00:00, 2:0:0, 1, Stones, Brooms\n\
             2024-01-05, 19:00:00, 2:0:0, 2, ,\n",
        );
        let roster = vec![
            Team::new("Stones", vec!["Alice".to_string()]),
            Team::new("Brooms", Vec::new()),
        ];
        let schedule = CsvManager::read_schedule_csv(&path, Some(&roster)).unwrap();
        assert_eq!(schedule.games().len(), 2);
        assert_eq!(schedule.games()[0].venue, Some(Venue::Sheet(1)));
        assert_eq!(
            schedule.games()[0].length,
            Some(TimeDelta::hours(2))
        );
        assert_eq!(schedule.assignments()[0].len(), 2);
        assert_eq!(schedule.assignments()[0][0].members(), ["Alice"]);
        assert!(schedule.assignments()[1].is_empty());
    }

    #[test]
    fn schedule_csv_rejects_unknown_teams_and_bad_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "schedule.csv",
            "Start Date, Start Time, Game Length, Sheet, Team 0, Team 1\n\
             2024-01-05, 19:00, 2:0:0, 1, Ghosts,\n",
        );
        let roster = vec![Team::new("Stones", Vec::new())];
        assert!(matches!(
            CsvManager::read_schedule_csv(&path, Some(&roster)),
            Err(ScheduleError::InvalidInput(_))
        ));

        let bad = write_fixture(&dir, "bad.csv", "Date, Time, Length, Sheet\n");
        assert!(matches!(
            CsvManager::read_schedule_csv(&bad, None),
            Err(ScheduleError::InvalidInput(_))
        ));
    }

    #[test]
    fn unknown_venue_headers_fall_back_to_opaque_venues() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "schedule.csv",
            "Start Date, Start Time, Game Length, Rink\n\
             2024-01-05, 19:00:00, 2:0:0, West End\n",
        );
        let schedule = CsvManager::read_schedule_csv(&path, None).unwrap();
        assert_eq!(
            schedule.games()[0].venue,
            Some(Venue::Opaque("West End".to_string()))
        );
    }

    #[test]
    fn written_schedules_read_back_identically() {
        let dir = tempfile::tempdir().unwrap();
        let games = vec![
            Game::new(
                NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
                NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
                Some(TimeDelta::hours(2)),
                Some(Venue::Sheet(1)),
            ),
            Game::new(
                NaiveDate::from_ymd_opt(2024, 1, 12).unwrap(),
                NaiveTime::from_hms_opt(21, 30, 0).unwrap(),
                Some(TimeDelta::hours(2)),
                Some(Venue::Sheet(2)),
            ),
        ];
        let assignments = vec![
            vec![Team::new("Brooms", Vec::new()), Team::new("Stones", Vec::new())],
            Vec::new(),
        ];
        let schedule = Schedule::from_parts(games, assignments).unwrap();
        let path = dir.path().join("schedule.csv");
        CsvManager::write_schedule_csv(&schedule, &path).unwrap();

        let read_back = CsvManager::read_schedule_csv(&path, None).unwrap();
        assert_eq!(read_back, schedule);

        // A canonical file survives a read and rewrite byte for byte.
        let rewritten = dir.path().join("rewritten.csv");
        CsvManager::write_schedule_csv(&read_back, &rewritten).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::fs::read_to_string(&rewritten).unwrap()
        );
    }

    #[test]
    fn blackouts_parse_dates_and_instants() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "blackouts.csv",
            "# holidays\nStones, 2024-01-05, 2024-01-12 19:00\n",
        );
        let roster = vec![Team::new("Stones", Vec::new())];
        let blackouts = CsvManager::read_blackout_csv(&path, &roster).unwrap();
        let markers = &blackouts[&roster[0]];
        assert_eq!(markers.len(), 2);
        assert!(matches!(markers[0], TimeMarker::Date(_)));
        assert!(matches!(markers[1], TimeMarker::Instant(_)));

        let bad = write_fixture(&dir, "bad.csv", "Ghosts, 2024-01-05\n");
        assert!(matches!(
            CsvManager::read_blackout_csv(&bad, &roster),
            Err(ScheduleError::InvalidInput(_))
        ));
    }
}
