//! Error types for the dataflow kernel

use std::time::Duration;
use thiserror::Error;

/// Result type for dataflow operations
pub type FlowResult<T> = Result<T, FlowError>;

/// Error types surfaced by the dataflow kernel
#[derive(Error, Debug)]
pub enum FlowError {
    /// The dataflow graph is malformed. Not meant to be caught during
    /// execution of the graph; surfaces while the graph is constructed.
    #[error("bad dataflow structure: {0}")]
    BadStructure(String),

    /// A port was invoked but has no handler or producer
    #[error("port is called but not connected")]
    NotConnected,

    /// A periodic task was added with a tick rate the cycle control does not know
    #[error("unsupported tick rate: {0:?}")]
    InvalidRate(Duration),

    /// The cycle control was mutated while its main loop is running
    #[error("cycle control is already running")]
    AlreadyRunning,

    /// A cyclic task has not finished within its deadline
    #[error("cyclic task has not finished in time")]
    OutOfTime,

    /// A new setting value was rejected by the setting's constraint
    #[error("value for setting '{key}' violates its constraint")]
    ConstraintViolation {
        /// Identifier of the rejected setting
        key: String,
    },

    /// A task was added to a scheduler that has already been stopped
    #[error("attempting to add a task to a stopped scheduler")]
    SchedulerStopped,
}
