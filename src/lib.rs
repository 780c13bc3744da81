pub mod cli;
pub mod csv_manager;
pub mod domain;
pub mod error;
pub mod logging;
pub mod optimizer;
pub mod schedule;
pub mod snapshot;
pub mod solver;
