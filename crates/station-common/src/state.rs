//! Daemon lifecycle state machine.
//!
//! CREATED → STARTING → RUNNING ⇄ INHIBITED → STOPPING → STOPPED
//!
//! Fault transitions are allowed from every non-terminal state so that a
//! hardware or classification fault can always be recorded immediately.

use crate::error::{StationError, StationResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of the station daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StationState {
    /// Constructed; configuration loaded but nothing wired yet.
    #[default]
    Created,
    /// Hardware initialization and thread startup in progress.
    Starting,
    /// Normal operation: edges are classified and dispatched.
    Running,
    /// Edge processing suspended (calibration or maintenance); the clock
    /// measurement keeps running.
    Inhibited,
    /// Ordered teardown in progress.
    Stopping,
    /// Teardown complete; terminal.
    Stopped,
    /// Unrecoverable fault recorded; only teardown may follow.
    Faulted,
}

impl fmt::Display for StationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Starting => write!(f, "STARTING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Inhibited => write!(f, "INHIBITED"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Faulted => write!(f, "FAULTED"),
        }
    }
}

impl StationState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: StationState) -> bool {
        use StationState::{Created, Faulted, Inhibited, Running, Starting, Stopped, Stopping};

        matches!(
            (self, target),
            // Normal forward progression
            (Created, Starting)
                | (Starting, Running)
                // Inhibit round-trip while operational
                | (Running, Inhibited)
                | (Inhibited, Running)
                // Ordered shutdown
                | (Running, Stopping)
                | (Inhibited, Stopping)
                | (Stopping, Stopped)
                // Faults from any non-terminal state
                | (Created, Faulted)
                | (Starting, Faulted)
                | (Running, Faulted)
                | (Inhibited, Faulted)
                | (Stopping, Faulted)
                // Teardown after a fault
                | (Faulted, Stopping)
        )
    }

    /// Attempt to transition to `target`, returning an error if invalid.
    pub fn transition_to(&mut self, target: StationState) -> StationResult<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(StationError::InvalidStateTransition {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Returns true while edges may be flowing (running or inhibited).
    #[must_use]
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Running | Self::Inhibited)
    }

    /// Returns true once the daemon has shut down or faulted.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped | Self::Faulted)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: StationState,
    previous: Option<StationState>,
    transition_count: u64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine starting in CREATED.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: StationState::Created,
            previous: None,
            transition_count: 0,
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> StationState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<StationState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: StationState) -> StationResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(StationError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Force a transition to FAULTED (succeeds from any non-terminal state).
    pub fn enter_fault(&mut self) {
        if self.current.can_transition_to(StationState::Faulted) {
            self.previous = Some(self.current);
            self.current = StationState::Faulted;
            self.transition_count += 1;
        }
    }
}
