//! Weather gate: decides whether irrigation may start right now.
//!
//! The gate fails open. With the check disabled, no sensor configured, or a
//! sensor that has gone quiet, irrigation is allowed; only a positive rain
//! reading blocks it. A sensor outage must never silently stop the lawn from
//! being watered.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::WeatherSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RainReading {
    Dry,
    Raining,
    Unavailable,
}

/// Source of rain-sensor readings.
pub trait RainSensor: Send + Sync + 'static {
    fn current_reading(&self, sensor: &str) -> impl Future<Output = RainReading> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct GateConfig {
    pub enabled: bool,
    pub rain_sensor: Option<String>,
}

impl From<&WeatherSection> for GateConfig {
    fn from(w: &WeatherSection) -> Self {
        Self {
            enabled: w.enabled,
            rain_sensor: w.rain_sensor.clone().filter(|s| !s.trim().is_empty()),
        }
    }
}

pub struct WeatherGate<S> {
    config: GateConfig,
    sensor: S,
}

impl<S: RainSensor> WeatherGate<S> {
    pub fn new(config: GateConfig, sensor: S) -> Self {
        Self { config, sensor }
    }

    /// Decision for starting a zone. A rain block is logged at `info`.
    pub async fn is_safe_to_irrigate(&self) -> bool {
        let safe = self.weather_ok().await;
        if !safe {
            info!(
                sensor = self.config.rain_sensor.as_deref().unwrap_or_default(),
                "rain detected, irrigation not permitted"
            );
        }
        safe
    }

    /// Same answer as [`WeatherGate::is_safe_to_irrigate`], for status reads.
    pub async fn weather_ok(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        let Some(sensor) = self.config.rain_sensor.as_deref() else {
            return true;
        };

        match self.sensor.current_reading(sensor).await {
            RainReading::Raining => {
                debug!(sensor, "rain sensor reports rain");
                false
            }
            RainReading::Dry => true,
            RainReading::Unavailable => {
                debug!(sensor, "rain sensor unavailable, allowing irrigation");
                true
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT-fed rain sensor cache
// ---------------------------------------------------------------------------

/// Latest rain reading per sensor, written by the MQTT loop and read by the
/// gate. Readings older than `stale_after` count as unavailable.
#[derive(Clone)]
pub struct RainCache {
    readings: Arc<RwLock<HashMap<String, (bool, Instant)>>>,
    stale_after: Duration,
}

impl RainCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            readings: Arc::new(RwLock::new(HashMap::new())),
            stale_after,
        }
    }

    pub fn record(&self, sensor: &str, raining: bool) {
        if let Ok(mut readings) = self.readings.write() {
            readings.insert(sensor.to_string(), (raining, Instant::now()));
        }
    }

    fn lookup(&self, sensor: &str) -> RainReading {
        let Ok(readings) = self.readings.read() else {
            return RainReading::Unavailable;
        };
        match readings.get(sensor) {
            Some((_, at)) if at.elapsed() > self.stale_after => RainReading::Unavailable,
            Some((true, _)) => RainReading::Raining,
            Some((false, _)) => RainReading::Dry,
            None => RainReading::Unavailable,
        }
    }
}

impl RainSensor for RainCache {
    async fn current_reading(&self, sensor: &str) -> RainReading {
        self.lookup(sensor)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
