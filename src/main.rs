// External crates
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

// Local modules / crates
use drawgen::cli::Cli;
use drawgen::csv_manager::CsvManager;
use drawgen::domain::Venue;
use drawgen::error::ScheduleError;
use drawgen::logging;
use drawgen::schedule::Schedule;
use drawgen::snapshot::JsonDirSink;
use drawgen::solver::SolverParams;

fn main() {
    let cli = Cli::parse();

    logging::init_logger("drawgen.log", cli.log_enabled, cli.verbose);
    info!("Logger initialized");

    if let Err(error) = run(&cli) {
        eprintln!("drawgen: {error}");
        let code = match error {
            ScheduleError::InvalidInput(_) => 2,
            ScheduleError::NoSolution { .. } => 3,
            _ => 1,
        };
        std::process::exit(code);
    }
}

/// A spinner shown while the solver runs.
struct SolveSpinner {
    bar: ProgressBar,
}

impl SolveSpinner {
    fn new() -> SolveSpinner {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner().template(" {spinner} [{elapsed_precise}] {msg}"),
        );
        bar.set_message("Solving draw assignment");
        bar.enable_steady_tick(120);
        SolveSpinner { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn run(cli: &Cli) -> Result<(), ScheduleError> {
    Venue::set_sheet_letters(cli.sheet_letters);

    info!("Loading team roster");
    let teams = CsvManager::read_team_csv(&cli.team_csv)?;
    if teams.is_empty() {
        return Err(ScheduleError::InvalidInput(
            "no teams to schedule".to_string(),
        ));
    }

    let mut schedule = match &cli.draw_schedule {
        Some(path) => {
            info!("Loading draw schedule");
            CsvManager::read_schedule_csv(path, Some(&teams))?
        }
        None => {
            if cli.draw_times.is_empty() {
                return Err(ScheduleError::InvalidInput(
                    "at least one --draw-time is required when generating slots".to_string(),
                ));
            }
            info!("Generating draw slots");
            let venues: Vec<Venue> = (1..=cli.sheets as i32).map(Venue::Sheet).collect();
            Schedule::naive_schedule(
                cli.start_date,
                cli.end_date,
                &cli.draw_times,
                &cli.weekdays,
                Some(cli.draw_duration),
                &venues,
            )?
        }
    };

    let blackouts = match &cli.blackout_times {
        Some(path) => Some(CsvManager::read_blackout_csv(path, &teams)?),
        None => None,
    };

    info!("Assigning teams to draws");
    let params = SolverParams {
        log_search: cli.verbose,
        ..SolverParams::default()
    };
    let spinner = SolveSpinner::new();
    let outcome = schedule.assign_with_options(
        &teams,
        cli.required_num_games,
        blackouts.as_ref(),
        &params,
        &JsonDirSink::default(),
    );
    spinner.finish();
    outcome?;

    if schedule.teams_assigned() {
        let matrix = schedule.games_against_matrix()?;
        for (index, team) in schedule.teams().iter().enumerate() {
            let row = matrix.row(index);
            let total: u32 = row.iter().map(|&count| count as u32).sum();
            println!("{} {} | {:?}", team.name(), total, row);
        }
    } else {
        info!("The solver assigned no games");
    }

    if let Some(path) = &cli.output_schedule {
        CsvManager::write_schedule_csv(&schedule, path)?;
    }

    info!("Draw generation completed");
    Ok(())
}
