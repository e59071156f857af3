//! Per-zone countdown.
//!
//! A timer is a spawned task that sleeps for the zone's run time, turns the
//! valve off and posts an [`Expired`] message to the scheduler. Cancelling
//! turns the valve off before returning. Whichever of the two reaches a
//! terminal phase first wins; the loser does nothing, so the valve receives
//! exactly one `off` per timer.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::ActuatorError;
use crate::valve::Actuator;

const SCHEDULED: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Completed,
    Cancelled,
}

/// Natural expiry, reported back to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub zone: String,
    pub timer_id: u64,
}

struct Phase(AtomicU8);

impl Phase {
    /// Move from `Scheduled` to `to`. Only the first caller succeeds.
    fn finish(&self, to: u8) -> bool {
        self.0
            .compare_exchange(SCHEDULED, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub struct ZoneTimer {
    id: u64,
    zone: String,
    actuator_ref: String,
    phase: Arc<Phase>,
    task: JoinHandle<()>,
}

impl ZoneTimer {
    /// Turn the valve on and arm the countdown. Nothing is armed if the
    /// valve refuses to open.
    pub async fn start<A: Actuator>(
        id: u64,
        zone: &str,
        actuator_ref: &str,
        duration_min: u32,
        actuator: Arc<A>,
        events: mpsc::UnboundedSender<Expired>,
    ) -> Result<Self, ActuatorError> {
        actuator.turn_on(actuator_ref).await?;

        let phase = Arc::new(Phase(AtomicU8::new(SCHEDULED)));
        let run_for = Duration::from_secs(u64::from(duration_min) * 60);

        let task = tokio::spawn({
            let phase = Arc::clone(&phase);
            let zone = zone.to_string();
            let actuator_ref = actuator_ref.to_string();
            async move {
                tokio::time::sleep(run_for).await;
                if !phase.finish(COMPLETED) {
                    return;
                }
                if let Err(e) = actuator.turn_off(&actuator_ref).await {
                    error!(zone = %zone, "zone timer: {e}");
                }
                info!(zone = %zone, "zone completed");
                let _ = events.send(Expired { zone, timer_id: id });
            }
        });

        Ok(Self {
            id,
            zone: zone.to_string(),
            actuator_ref: actuator_ref.to_string(),
            phase,
            task,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop the countdown and turn the valve off. Returns `Completed` when
    /// the timer had already expired on its own; the expiry path then owns
    /// the `off` command.
    pub async fn cancel<A: Actuator>(self, actuator: &A) -> TimerOutcome {
        if !self.phase.finish(CANCELLED) {
            return TimerOutcome::Completed;
        }
        self.task.abort();
        if let Err(e) = actuator.turn_off(&self.actuator_ref).await {
            error!(zone = %self.zone, "zone timer cancel: {e}");
        }
        info!(zone = %self.zone, "zone cancelled");
        TimerOutcome::Cancelled
    }
}

// ===========================================================================
// Tests
// ===========================================================================
