use thiserror::Error;

/// Station error types covering configuration, hardware access, and runtime faults.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StationError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The GPIO/tick hardware could not be reached at startup.
    ///
    /// Fatal: the timestamping subsystem does not activate and there is
    /// no retry.
    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// Driver-level failure after successful initialization.
    #[error("driver error: {0}")]
    Driver(String),

    /// Unexpected fault inside edge classification.
    ///
    /// The driver must stop its polling loop when it sees this; it is a
    /// last-resort safety stance, not a recoverable path.
    #[error("classification fault: {0}")]
    ClassificationFault(String),

    /// Tick counter read failed during a clock measurement cycle.
    #[error("tick source error: {0}")]
    TickSource(String),

    /// I/O operation error.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Convenience type alias for station operations.
pub type StationResult<T> = Result<T, StationError>;
