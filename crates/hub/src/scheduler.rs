//! Irrigation scheduler: owns system state and the run queue, and drives zone
//! timers.
//!
//! ## System state machine
//!
//! ```text
//!         start_all / run_program
//! Idle ──────────────────────────────▶ Running ──[queue drained]──▶ Idle
//!  ▲                                    │   ▲
//!  │                       [rain before │   │ resume
//!  │                        next zone]  ▼   │
//!  └──────────── stop_all ─────────── Paused
//! ```
//!
//! Queued zones run strictly one at a time. When a queue-driven zone's timer
//! expires, the timer task posts a message that a scheduler-owned task turns
//! into the next step of queue processing. Every state change happens under
//! a single async mutex, so operations never interleave mid-transition.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::ScheduleError;
use crate::status::{self, StatusSnapshot, ZoneStatus};
use crate::timer::{Expired, TimerOutcome, ZoneTimer};
use crate::valve::Actuator;
use crate::weather::{RainSensor, WeatherGate};
use crate::zones::ZoneRegistry;

// ---------------------------------------------------------------------------
// State types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    #[default]
    Idle,
    Running,
    Paused,
}

impl SystemState {
    pub fn as_str(self) -> &'static str {
        match self {
            SystemState::Idle => "idle",
            SystemState::Running => "running",
            SystemState::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub zone: String,
    pub duration_min: u32,
}

impl QueueEntry {
    pub fn new(zone: &str, duration_min: u32) -> Self {
        Self {
            zone: zone.to_string(),
            duration_min,
        }
    }
}

/// Present only while the system is not idle.
#[derive(Debug)]
pub struct RunContext {
    pub started: Instant,
    pub started_at: OffsetDateTime,
    /// Fixed when the run is queued; never recomputed.
    pub total_duration_min: u32,
    pub program: Option<String>,
    pub queue: VecDeque<QueueEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Queue,
    Direct,
}

struct LiveTimer {
    timer: ZoneTimer,
    actuator: String,
    origin: Origin,
}

#[derive(Default)]
struct Engine {
    state: SystemState,
    run: Option<RunContext>,
    current_zone: Option<String>,
    /// Actuator references currently commanded on.
    active: BTreeSet<String>,
    /// Live timers keyed by zone name.
    timers: HashMap<String, LiveTimer>,
    next_timer_id: u64,
}

impl Engine {
    fn state(&self) -> SystemState {
        self.state
    }

    fn begin_run(&mut self, program: Option<&str>, total_duration_min: u32, queue: VecDeque<QueueEntry>) {
        self.state = SystemState::Running;
        self.run = Some(RunContext {
            started: Instant::now(),
            started_at: OffsetDateTime::now_utc(),
            total_duration_min,
            program: program.map(str::to_string),
            queue,
        });
    }

    fn finish_run(&mut self) {
        self.state = SystemState::Idle;
        self.run = None;
        self.current_zone = None;
    }

    fn queue_len(&self) -> usize {
        self.run.as_ref().map_or(0, |r| r.queue.len())
    }

    fn queue_zone_in_flight(&self) -> bool {
        self.timers.values().any(|t| t.origin == Origin::Queue)
    }
}

// ---------------------------------------------------------------------------
// Scheduler handle
// ---------------------------------------------------------------------------

/// Cheaply cloneable handle to one irrigation system.
pub struct Scheduler<A, S> {
    inner: Arc<Inner<A, S>>,
}

impl<A, S> Clone for Scheduler<A, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<A, S> {
    registry: ZoneRegistry,
    actuator: Arc<A>,
    gate: WeatherGate<S>,
    engine: Mutex<Engine>,
    events: mpsc::UnboundedSender<Expired>,
    changed: Notify,
}

impl<A: Actuator, S: RainSensor> Scheduler<A, S> {
    /// Build the scheduler and spawn the task that consumes timer expiries.
    /// Must be called from within a tokio runtime.
    pub fn new(registry: ZoneRegistry, actuator: A, gate: WeatherGate<S>) -> Self {
        let (events, expiries) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            registry,
            actuator: Arc::new(actuator),
            gate,
            engine: Mutex::new(Engine::default()),
            events,
            changed: Notify::new(),
        });
        tokio::spawn(completion_loop(Arc::downgrade(&inner), expiries));
        Self { inner }
    }

    pub fn registry(&self) -> &ZoneRegistry {
        &self.inner.registry
    }

    /// Queue every zone, in registry order, each for its configured
    /// duration. `duration` only overrides the reported total.
    pub async fn start_all(&self, duration: Option<u32>) -> Result<(), ScheduleError> {
        let res = self.inner.start_all(duration).await;
        self.inner.changed.notify_one();
        res
    }

    /// Cancel every timer, turn every valve off and return to idle. State is
    /// reset even if some valves could not be switched; the first such
    /// failure is returned.
    pub async fn stop_all(&self) -> Result<(), ScheduleError> {
        let res = self.inner.stop_all().await;
        self.inner.changed.notify_one();
        res
    }

    /// Run a single zone outside of any queue.
    pub async fn run_zone(&self, name: &str, duration_min: u32) -> Result<(), ScheduleError> {
        let res = self.inner.run_zone(name, duration_min).await;
        self.inner.changed.notify_one();
        res
    }

    /// Queue the named zones (all zones when `zones` is empty) and run them
    /// in order. Unknown names are dropped.
    pub async fn run_program(&self, program: &str, zones: &[String]) -> Result<(), ScheduleError> {
        let res = self.inner.run_program(program, zones).await;
        self.inner.changed.notify_one();
        res
    }

    /// Continue a paused run from the front of its queue.
    pub async fn resume(&self) -> Result<(), ScheduleError> {
        let res = self.inner.resume().await;
        self.inner.changed.notify_one();
        res
    }

    /// Cancel one running zone.
    pub async fn stop_zone(&self, name: &str) -> Result<(), ScheduleError> {
        let res = self.inner.stop_zone(name).await;
        self.inner.changed.notify_one();
        res
    }

    pub async fn state(&self) -> SystemState {
        self.inner.engine.lock().await.state()
    }

    pub async fn active_zone_count(&self) -> usize {
        self.inner.engine.lock().await.active.len()
    }

    pub async fn queue_length(&self) -> usize {
        self.inner.engine.lock().await.queue_len()
    }

    pub async fn remaining_minutes(&self) -> u32 {
        let engine = self.inner.engine.lock().await;
        self.inner.remaining(&engine, Instant::now())
    }

    pub async fn elapsed_minutes(&self) -> u32 {
        let engine = self.inner.engine.lock().await;
        status::elapsed_minutes(engine.run.as_ref(), Instant::now())
    }

    /// Full observable snapshot, computed fresh.
    pub async fn status(&self) -> StatusSnapshot {
        let mut snap = {
            let engine = self.inner.engine.lock().await;
            let now = Instant::now();
            let run = engine.run.as_ref();
            StatusSnapshot {
                system_state: engine.state(),
                current_zone: engine.current_zone.clone(),
                current_program: run.and_then(|r| r.program.clone()),
                start_time: run.map(|r| r.started_at),
                total_duration_min: run.map_or(0, |r| r.total_duration_min),
                remaining_min: self.inner.remaining(&engine, now),
                elapsed_min: status::elapsed_minutes(run, now),
                active_zones: engine.active.iter().cloned().collect(),
                active_zone_count: engine.active.len(),
                queue: run.map(|r| r.queue.iter().cloned().collect()).unwrap_or_default(),
                queue_length: engine.queue_len(),
                weather_ok: true,
                zones: Vec::with_capacity(self.inner.registry.len()),
            }
        };

        for zone in self.inner.registry.zones() {
            snap.zones.push(ZoneStatus {
                name: zone.name.clone(),
                actuator: zone.actuator.clone(),
                duration_min: zone.duration_min,
                state: self.inner.actuator.status(&zone.actuator).await,
                is_running: snap.active_zones.contains(&zone.actuator),
            });
        }
        snap.weather_ok = self.inner.gate.weather_ok().await;
        snap
    }

    /// Resolves after the next state change (or immediately if one happened
    /// since the last call).
    pub async fn changed(&self) {
        self.inner.changed.notified().await;
    }
}

async fn completion_loop<A: Actuator, S: RainSensor>(
    inner: Weak<Inner<A, S>>,
    mut expiries: mpsc::UnboundedReceiver<Expired>,
) {
    while let Some(expired) = expiries.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_expired(expired).await;
        inner.changed.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl<A: Actuator, S: RainSensor> Inner<A, S> {
    async fn start_all(&self, duration: Option<u32>) -> Result<(), ScheduleError> {
        let mut engine = self.engine.lock().await;

        if engine.state() == SystemState::Running {
            warn!("irrigation already running");
            return Err(ScheduleError::AlreadyRunning);
        }
        if !self.gate.is_safe_to_irrigate().await {
            warn!("weather conditions not suitable for irrigation");
            return Err(ScheduleError::WeatherUnsafe);
        }

        let queue: VecDeque<QueueEntry> = self
            .registry
            .zones()
            .iter()
            .map(|z| QueueEntry::new(&z.name, z.duration_min))
            .collect();
        let total = duration.unwrap_or_else(|| queue.iter().map(|e| e.duration_min).sum());

        info!(zones = queue.len(), total_duration_min = total, "starting irrigation");
        engine.begin_run(None, total, queue);
        self.process_queue(&mut engine).await;
        Ok(())
    }

    async fn stop_all(&self) -> Result<(), ScheduleError> {
        let mut engine = self.engine.lock().await;
        info!(active = engine.active.len(), "stopping irrigation");

        let timers: Vec<LiveTimer> = engine.timers.drain().map(|(_, t)| t).collect();
        for live in timers {
            live.timer.cancel(self.actuator.as_ref()).await;
        }

        let mut first_failure = None;
        for zone in self.registry.zones() {
            if let Err(e) = self.actuator.turn_off(&zone.actuator).await {
                error!(zone = %zone.name, "stop: {e}");
                first_failure.get_or_insert(e);
            }
        }

        engine.active.clear();
        engine.finish_run();

        match first_failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn run_zone(&self, name: &str, duration_min: u32) -> Result<(), ScheduleError> {
        let mut engine = self.engine.lock().await;

        let Some(zone) = self.registry.lookup(name) else {
            warn!(zone = %name, "zone not found");
            return Err(ScheduleError::ZoneNotFound(name.to_string()));
        };
        if !self.gate.is_safe_to_irrigate().await {
            warn!(zone = %name, "weather conditions not suitable for irrigation");
            return Err(ScheduleError::WeatherUnsafe);
        }
        if engine.active.contains(&zone.actuator) {
            warn!(zone = %name, "zone already running");
            return Err(ScheduleError::AlreadyActive(name.to_string()));
        }
        if engine.state() == SystemState::Running {
            warn!(zone = %name, "sequential run in progress, refusing direct zone run");
            return Err(ScheduleError::BatchInProgress(name.to_string()));
        }

        self.start_zone(&mut engine, name, duration_min, Origin::Direct)
            .await
    }

    async fn run_program(&self, program: &str, zones: &[String]) -> Result<(), ScheduleError> {
        let mut engine = self.engine.lock().await;

        if engine.state() == SystemState::Running {
            warn!(program, "irrigation already running");
            return Err(ScheduleError::AlreadyRunning);
        }

        let names = if zones.is_empty() {
            self.registry.names()
        } else {
            zones.to_vec()
        };

        if !self.gate.is_safe_to_irrigate().await {
            warn!(program, "weather conditions not suitable for irrigation");
            return Err(ScheduleError::WeatherUnsafe);
        }

        let mut queue = VecDeque::with_capacity(names.len());
        for name in &names {
            match self.registry.lookup(name) {
                Some(z) => queue.push_back(QueueEntry::new(&z.name, z.duration_min)),
                None => debug!(program, zone = %name, "dropping unknown zone from program"),
            }
        }
        let total = queue.iter().map(|e| e.duration_min).sum();

        info!(program, zones = ?names, total_duration_min = total, "starting program");
        engine.begin_run(Some(program), total, queue);
        self.process_queue(&mut engine).await;
        Ok(())
    }

    async fn resume(&self) -> Result<(), ScheduleError> {
        let mut engine = self.engine.lock().await;

        if engine.state() != SystemState::Paused {
            warn!(state = engine.state().as_str(), "resume requested but irrigation is not paused");
            return Err(ScheduleError::NotPaused);
        }
        if !self.gate.is_safe_to_irrigate().await {
            warn!("weather conditions still not suitable for irrigation");
            return Err(ScheduleError::WeatherUnsafe);
        }

        info!(queued = engine.queue_len(), "resuming irrigation");
        engine.state = SystemState::Running;
        self.process_queue(&mut engine).await;
        Ok(())
    }

    async fn stop_zone(&self, name: &str) -> Result<(), ScheduleError> {
        let mut engine = self.engine.lock().await;
        self.cancel_zone(&mut engine, name).await
    }

    async fn cancel_zone(&self, engine: &mut Engine, name: &str) -> Result<(), ScheduleError> {
        if self.registry.lookup(name).is_none() {
            warn!(zone = %name, "zone not found");
            return Err(ScheduleError::ZoneNotFound(name.to_string()));
        }
        let Some(live) = engine.timers.remove(name) else {
            warn!(zone = %name, "zone is not running");
            return Err(ScheduleError::NotActive(name.to_string()));
        };

        let outcome = live.timer.cancel(self.actuator.as_ref()).await;
        engine.active.remove(&live.actuator);
        if engine.current_zone.as_deref() == Some(name) {
            engine.current_zone = None;
        }
        if live.origin != Origin::Queue || engine.state() != SystemState::Running {
            return Ok(());
        }

        match outcome {
            // Expired on its own; its pending message is now stale.
            TimerOutcome::Completed => self.process_queue(engine).await,
            TimerOutcome::Cancelled if engine.queue_len() > 0 => {
                info!(zone = %name, queued = engine.queue_len(), "queued run interrupted, pausing");
                engine.state = SystemState::Paused;
            }
            TimerOutcome::Cancelled => {
                info!(zone = %name, "queued run interrupted on its last zone");
                engine.finish_run();
            }
        }
        Ok(())
    }

    async fn on_expired(&self, expired: Expired) {
        let mut engine = self.engine.lock().await;

        let is_live = engine
            .timers
            .get(&expired.zone)
            .is_some_and(|t| t.timer.id() == expired.timer_id);
        if !is_live {
            debug!(zone = %expired.zone, "ignoring expiry of a timer that is no longer live");
            return;
        }
        let Some(live) = engine.timers.remove(&expired.zone) else {
            return;
        };

        engine.active.remove(&live.actuator);
        if engine.current_zone.as_deref() == Some(expired.zone.as_str()) {
            engine.current_zone = None;
        }

        if live.origin == Origin::Queue {
            self.process_queue(&mut engine).await;
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Start the next queued zone, or finish the run when the queue is empty.
    /// Returns while a queued zone is in flight; its expiry calls back in.
    async fn process_queue(&self, engine: &mut Engine) {
        loop {
            if engine.state() != SystemState::Running || engine.queue_zone_in_flight() {
                return;
            }

            let Some(next) = engine.run.as_ref().and_then(|r| r.queue.front().cloned()) else {
                engine.finish_run();
                info!("irrigation program completed");
                return;
            };

            if !self.gate.is_safe_to_irrigate().await {
                info!(queued = engine.queue_len(), "weather conditions changed, pausing irrigation");
                engine.state = SystemState::Paused;
                return;
            }

            if let Some(run) = engine.run.as_mut() {
                run.queue.pop_front();
            }

            match self
                .start_zone(engine, &next.zone, next.duration_min, Origin::Queue)
                .await
            {
                Ok(()) => return,
                Err(e) => warn!(zone = %next.zone, "skipping queued zone: {e}"),
            }
        }
    }

    async fn start_zone(
        &self,
        engine: &mut Engine,
        name: &str,
        duration_min: u32,
        origin: Origin,
    ) -> Result<(), ScheduleError> {
        let zone = self
            .registry
            .lookup(name)
            .ok_or_else(|| ScheduleError::ZoneNotFound(name.to_string()))?;
        if engine.active.contains(&zone.actuator) {
            return Err(ScheduleError::AlreadyActive(name.to_string()));
        }

        let id = engine.next_timer_id;
        engine.next_timer_id += 1;

        let timer = ZoneTimer::start(
            id,
            &zone.name,
            &zone.actuator,
            duration_min,
            Arc::clone(&self.actuator),
            self.events.clone(),
        )
        .await
        .map_err(|e| {
            error!(zone = %name, "failed to start zone: {e}");
            ScheduleError::from(e)
        })?;

        info!(zone = %name, duration_min, ?origin, "zone started");
        engine.active.insert(zone.actuator.clone());
        engine.current_zone = Some(zone.name.clone());
        engine.timers.insert(
            zone.name.clone(),
            LiveTimer {
                timer,
                actuator: zone.actuator.clone(),
                origin,
            },
        );
        Ok(())
    }

    fn remaining(&self, engine: &Engine, now: Instant) -> u32 {
        let current = engine
            .current_zone
            .as_deref()
            .and_then(|z| self.registry.lookup(z))
            .map(|z| z.duration_min);
        status::remaining_minutes(engine.state(), engine.run.as_ref(), current, now)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
