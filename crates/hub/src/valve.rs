//! Valve control via GPIO. The `gpio` feature gates the real rppal driver;
//! without it, a mock implementation logs state changes.
//!
//! [`Actuator`] is the seam the scheduler drives; [`ValveBoard`] is the only
//! production implementation.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tracing::info;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

use crate::error::{ActuatorError, Command};

/// Reported state of one switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValveStatus {
    On,
    Off,
    Unavailable,
}

/// On/off switch layer. Commands must be idempotent: turning an already-off
/// valve off again is not an error.
pub trait Actuator: Send + Sync + 'static {
    fn turn_on(&self, actuator: &str) -> impl Future<Output = Result<(), ActuatorError>> + Send;

    fn turn_off(&self, actuator: &str) -> impl Future<Output = Result<(), ActuatorError>> + Send;

    fn status(&self, actuator: &str) -> impl Future<Output = ValveStatus> + Send;
}

fn command(on: bool) -> Command {
    if on {
        Command::On
    } else {
        Command::Off
    }
}

// ---------------------------------------------------------------------------
// Real GPIO valve board (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct ValveBoard {
    pins: Mutex<HashMap<String, OutputPin>>, // actuator -> GPIO pin
    active_low: bool,                        // many relay boards are active-low
}

#[cfg(feature = "gpio")]
impl ValveBoard {
    pub fn new(valve_pins: &[(String, u8)], active_low: bool) -> anyhow::Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::new();

        for (actuator, pin_num) in valve_pins {
            let mut pin = gpio.get(*pin_num)?.into_output();

            // Fail-safe: ensure "OFF" at startup
            if active_low {
                pin.set_high(); // active-low relay OFF
            } else {
                pin.set_low(); // active-high relay OFF
            }

            pins.insert(actuator.clone(), pin);
        }

        Ok(Self {
            pins: Mutex::new(pins),
            active_low,
        })
    }

    fn set(&self, actuator: &str, on: bool) -> Result<(), ActuatorError> {
        let mut pins = self
            .pins
            .lock()
            .map_err(|_| ActuatorError::new(actuator, command(on), "valve board lock poisoned"))?;
        let pin = pins
            .get_mut(actuator)
            .ok_or_else(|| ActuatorError::new(actuator, command(on), "unknown actuator"))?;

        // active-low relay: LOW = ON, HIGH = OFF
        if on != self.active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        info!(actuator, "valve set {}", if on { "ON" } else { "OFF" });
        Ok(())
    }

    fn read(&self, actuator: &str) -> ValveStatus {
        let Ok(pins) = self.pins.lock() else {
            return ValveStatus::Unavailable;
        };
        match pins.get(actuator) {
            Some(pin) if pin.is_set_low() == self.active_low => ValveStatus::On,
            Some(_) => ValveStatus::Off,
            None => ValveStatus::Unavailable,
        }
    }
}

// ---------------------------------------------------------------------------
// Mock valve board (development, no hardware, logs state changes)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct ValveBoard {
    pub(super) valves: Mutex<HashMap<String, bool>>, // actuator -> on/off state
}

#[cfg(not(feature = "gpio"))]
impl ValveBoard {
    pub fn new(valve_pins: &[(String, u8)], _active_low: bool) -> anyhow::Result<Self> {
        let mut valves = HashMap::new();
        for (actuator, pin_num) in valve_pins {
            info!(actuator, gpio = pin_num, "[mock-gpio] registered valve (not wired)");
            valves.insert(actuator.clone(), false);
        }
        info!("[mock-gpio] valve board initialised (no hardware)");
        Ok(Self {
            valves: Mutex::new(valves),
        })
    }

    fn set(&self, actuator: &str, on: bool) -> Result<(), ActuatorError> {
        let mut valves = self
            .valves
            .lock()
            .map_err(|_| ActuatorError::new(actuator, command(on), "valve board lock poisoned"))?;
        let state = valves
            .get_mut(actuator)
            .ok_or_else(|| ActuatorError::new(actuator, command(on), "unknown actuator"))?;
        *state = on;
        info!(actuator, "[mock-gpio] valve set {}", if on { "ON" } else { "OFF" });
        Ok(())
    }

    fn read(&self, actuator: &str) -> ValveStatus {
        let Ok(valves) = self.valves.lock() else {
            return ValveStatus::Unavailable;
        };
        match valves.get(actuator) {
            Some(true) => ValveStatus::On,
            Some(false) => ValveStatus::Off,
            None => ValveStatus::Unavailable,
        }
    }
}

impl Actuator for ValveBoard {
    async fn turn_on(&self, actuator: &str) -> Result<(), ActuatorError> {
        self.set(actuator, true)
    }

    async fn turn_off(&self, actuator: &str) -> Result<(), ActuatorError> {
        self.set(actuator, false)
    }

    async fn status(&self, actuator: &str) -> ValveStatus {
        self.read(actuator)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    fn board(valves: &[(&str, u8)]) -> ValveBoard {
        let pins: Vec<(String, u8)> = valves.iter().map(|(a, p)| (a.to_string(), *p)).collect();
        ValveBoard::new(&pins, true).unwrap()
    }

    // -- ValveBoard (mock) --------------------------------------------------

    #[test]
    fn valve_board_new_registers_valves() {
        let b = board(&[("v1", 17), ("v2", 27)]);
        assert_eq!(b.valves.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn valve_board_new_all_off() {
        let b = board(&[("v1", 17)]);
        assert_eq!(b.status("v1").await, ValveStatus::Off);
    }

    #[tokio::test]
    async fn valve_board_turn_on_then_off() {
        let b = board(&[("v1", 17)]);
        b.turn_on("v1").await.unwrap();
        assert_eq!(b.status("v1").await, ValveStatus::On);
        b.turn_off("v1").await.unwrap();
        assert_eq!(b.status("v1").await, ValveStatus::Off);
    }

    #[tokio::test]
    async fn valve_board_commands_are_idempotent() {
        let b = board(&[("v1", 17)]);
        b.turn_off("v1").await.unwrap();
        b.turn_off("v1").await.unwrap();
        b.turn_on("v1").await.unwrap();
        b.turn_on("v1").await.unwrap();
        assert_eq!(b.status("v1").await, ValveStatus::On);
    }

    #[tokio::test]
    async fn valve_board_unknown_actuator_errors() {
        let b = board(&[("v1", 17)]);
        let err = b.turn_on("nonexistent").await.unwrap_err();
        assert_eq!(err.command, Command::On);
        assert!(err.reason.contains("unknown actuator"));
        assert_eq!(b.valves.lock().unwrap().len(), 1); // no new entry created
    }

    #[tokio::test]
    async fn valve_board_unknown_actuator_is_unavailable() {
        let b = board(&[("v1", 17)]);
        assert_eq!(b.status("nonexistent").await, ValveStatus::Unavailable);
    }

    #[test]
    fn valve_status_serialises_lowercase() {
        assert_eq!(
            serde_json::to_string(&ValveStatus::Unavailable).unwrap(),
            "\"unavailable\""
        );
    }
}
