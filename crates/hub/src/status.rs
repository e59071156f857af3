//! Observable view of the scheduler: derived metrics and the JSON snapshot
//! served over HTTP and published on MQTT.
//!
//! Nothing here is cached. Remaining and elapsed time are computed from the
//! run context and the current instant on every read.

use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::scheduler::{QueueEntry, RunContext, SystemState};
use crate::valve::ValveStatus;

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// Whole minutes since the run started; 0 with no run in progress.
pub fn elapsed_minutes(run: Option<&RunContext>, now: Instant) -> u32 {
    run.map_or(0, |r| {
        minutes(now.saturating_duration_since(r.started).as_secs())
    })
}

/// Queued minutes plus what is left of the current zone, measured against
/// the run's start time. 0 unless the system is running.
pub fn remaining_minutes(
    state: SystemState,
    run: Option<&RunContext>,
    current_zone_duration_min: Option<u32>,
    now: Instant,
) -> u32 {
    if state != SystemState::Running {
        return 0;
    }
    let Some(run) = run else {
        return 0;
    };

    let queued_secs: u64 = run
        .queue
        .iter()
        .map(|e| u64::from(e.duration_min) * 60)
        .sum();
    let current_secs = current_zone_duration_min.map_or(0, |d| {
        let elapsed = now.saturating_duration_since(run.started).as_secs();
        (u64::from(d) * 60).saturating_sub(elapsed)
    });

    minutes(queued_secs + current_secs)
}

fn minutes(secs: u64) -> u32 {
    u32::try_from(secs / 60).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// JSON snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub system_state: SystemState,
    pub current_zone: Option<String>,
    pub current_program: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    pub total_duration_min: u32,
    pub remaining_min: u32,
    pub elapsed_min: u32,
    pub active_zones: Vec<String>,
    pub active_zone_count: usize,
    pub queue: Vec<QueueEntry>,
    pub queue_length: usize,
    pub weather_ok: bool,
    pub zones: Vec<ZoneStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneStatus {
    pub name: String,
    pub actuator: String,
    pub duration_min: u32,
    pub state: ValveStatus,
    pub is_running: bool,
}

// ===========================================================================
// Tests
// ===========================================================================
