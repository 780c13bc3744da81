// Std library
use std::path::PathBuf;

// External crates
use chrono::{NaiveDate, NaiveTime, TimeDelta};
use clap::Parser;

// Local modules
use crate::domain::{Weekday, game_length_from_str};

fn parse_draw_time(cell: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(cell, "%H:%M").map_err(|_| format!("{cell:?} is not a HH:MM time"))
}

fn parse_draw_duration(cell: &str) -> Result<TimeDelta, String> {
    game_length_from_str(cell).map_err(|error| error.to_string())
}

fn parse_weekday(cell: &str) -> Result<Weekday, String> {
    cell.parse()
        .map_err(|error: crate::error::ScheduleError| error.to_string())
}

/// Command-line interface for the draw schedule generator.
#[derive(Parser, Debug)]
#[command(name = "drawgen", version, about = "Generates curling draw schedules")]
pub struct Cli {
    /// First day of the season (ISO date)
    #[arg(long = "start-date")]
    pub start_date: NaiveDate,

    /// Last day of the season, inclusive (ISO date)
    #[arg(long = "end-date")]
    pub end_date: NaiveDate,

    /// Draw start time (HH:MM), repeatable for multiple draws per day
    #[arg(long = "draw-time", value_parser = parse_draw_time)]
    pub draw_times: Vec<NaiveTime>,

    /// Length of one draw (H[:M[:S]])
    #[arg(long = "draw-duration", value_parser = parse_draw_duration)]
    pub draw_duration: TimeDelta,

    /// Playing weekday, repeatable; defaults to the start date's weekday
    #[arg(long = "weekday", value_parser = parse_weekday)]
    pub weekdays: Vec<Weekday>,

    /// Number of sheets available per draw
    #[arg(long = "sheets", value_parser = clap::value_parser!(u32).range(1..))]
    pub sheets: u32,

    /// Require exactly this many games per team instead of maximizing
    #[arg(long = "required-num-games")]
    pub required_num_games: Option<i64>,

    /// CSV of per-team blackout dates or instants
    #[arg(long = "blackout-times")]
    pub blackout_times: Option<PathBuf>,

    /// Load game slots from a schedule CSV instead of generating them
    #[arg(long = "draw-schedule")]
    pub draw_schedule: Option<PathBuf>,

    /// Write the assigned schedule to this CSV
    #[arg(long = "output-schedule")]
    pub output_schedule: Option<PathBuf>,

    /// CSV with the team roster
    #[arg(long = "team-csv")]
    pub team_csv: PathBuf,

    /// Print sheets as letters (A, B, ...) instead of numbers
    #[arg(long = "sheet-letters", default_value_t = false)]
    pub sheet_letters: bool,

    /// Emit per-incumbent solver diagnostics
    #[arg(long = "verbose", default_value_t = false)]
    pub verbose: bool,

    /// Enable or disable logging
    #[arg(long = "log", default_value_t = false)]
    pub log_enabled: bool,
}
