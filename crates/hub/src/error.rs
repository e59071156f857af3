//! Error taxonomy for the irrigation engine and its actuator collaborator.

use thiserror::Error;

/// A switch command that the actuator layer could not carry out.
#[derive(Debug, Clone, Error)]
#[error("actuator '{actuator}' failed to turn {command}: {reason}")]
pub struct ActuatorError {
    pub actuator: String,
    pub command: Command,
    pub reason: String,
}

impl ActuatorError {
    pub fn new(actuator: &str, command: Command, reason: impl Into<String>) -> Self {
        Self {
            actuator: actuator.to_string(),
            command,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    On,
    Off,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Command::On => "on",
            Command::Off => "off",
        })
    }
}

/// Why a scheduler operation was refused.
///
/// Everything except [`ScheduleError::ActuatorCommandFailed`] is an expected
/// condition: it is logged at `warn` and scheduler state is left untouched.
#[derive(Debug, Clone, Error)]
pub enum ScheduleError {
    #[error("zone '{0}' not found")]
    ZoneNotFound(String),

    #[error("irrigation already running")]
    AlreadyRunning,

    #[error("zone '{0}' is already running")]
    AlreadyActive(String),

    #[error("weather conditions not suitable for irrigation")]
    WeatherUnsafe,

    #[error("cannot run zone '{0}' while a sequential run is in progress")]
    BatchInProgress(String),

    #[error("irrigation is not paused")]
    NotPaused,

    #[error("zone '{0}' is not running")]
    NotActive(String),

    #[error(transparent)]
    ActuatorCommandFailed(#[from] ActuatorError),
}

// ===========================================================================
// Tests
// ===========================================================================
