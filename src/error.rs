// External crates
use thiserror::Error;

use crate::solver::SolverStatus;

/// Error taxonomy shared by every fallible operation in the crate.
///
/// The variants are kinds rather than per-call types: `InvalidInput` covers
/// anything a user handed us (CSV cells, weekday labels, time strings, date
/// ranges), `InconsistentState` covers API misuse by a caller, and
/// `NoSolution` carries the solver status when the model could not be
/// satisfied. Errors never corrupt the value they were raised on.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Malformed user input, such as an unparseable CSV cell or an unknown
    /// weekday label.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A caller drove the API into a state it forbids, for example
    /// populating venues twice or combining mutually exclusive constraints.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    /// A derived property was requested before its preconditions hold.
    #[error("not available: {0}")]
    NotAvailable(String),

    /// A fixed-size container cannot hold the requested data.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The solver terminated without an acceptable incumbent.
    #[error("no solution found: solver returned {status}")]
    NoSolution {
        status: SolverStatus,
        best_bound: Option<f64>,
    },

    /// Filesystem failure while reading or writing an external file.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
