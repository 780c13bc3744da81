// Std library
use std::fs::OpenOptions;
use std::io::Write;

// External crates
use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;

/// Initializes the logger to write messages to console and the file.
///
/// The logger prints messages with a timestamp and log level. Logging can
/// be globally enabled or disabled with the `enable` flag; `verbose` opens
/// the debug level for solver search diagnostics.
///
/// # Arguments
/// * `log_file` - A string representing the path of the file where logs will be saved.
/// * `enable` - Whether to initialize logging at all.
/// * `verbose` - Whether to include debug messages.
///
/// # Panics
/// This function will panic if the log file cannot be created or written.
pub fn init_logger(log_file: &str, enable: bool, verbose: bool) {
    if !enable {
        return;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .unwrap();

    Builder::new()
        .format(move |_buf, record| {
            let timestamp = Local::now().format("%H:%M:%S");
            let line = format!("[{}][{}] {}\n", timestamp, record.level(), record.args());

            print!("{}", line);

            let mut f = &file;
            f.write_all(line.as_bytes()).unwrap();
            Ok(())
        })
        .filter_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .target(Target::Stdout)
        .init();
}
