//! Test doubles for the actuator and rain-sensor seams.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{ActuatorError, Command};
use crate::valve::{Actuator, ValveStatus};
use crate::weather::{RainReading, RainSensor};

#[derive(Default)]
struct Recorded {
    commands: Vec<(String, Command)>,
    on: HashSet<String>,
    fail_on: HashSet<String>,
    fail_off: HashSet<String>,
}

/// Actuator that records every command it receives and can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingActuator {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingActuator {
    pub fn commands(&self) -> Vec<(String, Command)> {
        self.inner.lock().unwrap().commands.clone()
    }

    pub fn count(&self, actuator: &str, command: Command) -> usize {
        self.inner
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|(a, c)| a == actuator && *c == command)
            .count()
    }

    pub fn is_on(&self, actuator: &str) -> bool {
        self.inner.lock().unwrap().on.contains(actuator)
    }

    pub fn fail_turn_on(&self, actuator: &str) {
        self.inner.lock().unwrap().fail_on.insert(actuator.to_string());
    }

    pub fn fail_turn_off(&self, actuator: &str) {
        self.inner.lock().unwrap().fail_off.insert(actuator.to_string());
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().commands.clear();
    }

    fn apply(&self, actuator: &str, command: Command) -> Result<(), ActuatorError> {
        let mut rec = self.inner.lock().unwrap();
        rec.commands.push((actuator.to_string(), command));
        let failing = match command {
            Command::On => rec.fail_on.contains(actuator),
            Command::Off => rec.fail_off.contains(actuator),
        };
        if failing {
            return Err(ActuatorError::new(actuator, command, "injected failure"));
        }
        match command {
            Command::On => rec.on.insert(actuator.to_string()),
            Command::Off => rec.on.remove(actuator),
        };
        Ok(())
    }
}

impl Actuator for RecordingActuator {
    async fn turn_on(&self, actuator: &str) -> Result<(), ActuatorError> {
        self.apply(actuator, Command::On)
    }

    async fn turn_off(&self, actuator: &str) -> Result<(), ActuatorError> {
        self.apply(actuator, Command::Off)
    }

    async fn status(&self, actuator: &str) -> ValveStatus {
        if actuator == "missing-valve" {
            ValveStatus::Unavailable
        } else if self.is_on(actuator) {
            ValveStatus::On
        } else {
            ValveStatus::Off
        }
    }
}

/// Rain sensor whose reading is set by the test.
#[derive(Clone)]
pub struct ScriptedRain {
    reading: Arc<Mutex<RainReading>>,
}

impl ScriptedRain {
    pub fn new(reading: RainReading) -> Self {
        Self {
            reading: Arc::new(Mutex::new(reading)),
        }
    }

    pub fn set(&self, reading: RainReading) {
        *self.reading.lock().unwrap() = reading;
    }
}

impl RainSensor for ScriptedRain {
    async fn current_reading(&self, _sensor: &str) -> RainReading {
        *self.reading.lock().unwrap()
    }
}
