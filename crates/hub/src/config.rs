//! TOML config file loading and validation for zones, the weather gate and
//! hub timing.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

/// Duration used by `run_zone` requests that don't name one.
pub const DEFAULT_DURATION_MIN: u32 = 10;

/// How often the status snapshot is republished.
pub const DEFAULT_POLL_INTERVAL_SEC: u64 = 30;

/// Rain readings older than this are treated as unavailable.
pub const DEFAULT_STALE_AFTER_MIN: u64 = 60;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub weather: WeatherSection,
    #[serde(default)]
    pub zones: Vec<ZoneEntry>,
}

#[derive(Debug, Deserialize)]
pub struct HubSection {
    #[serde(default = "default_duration_min")]
    pub default_duration_min: u32,
    #[serde(default = "default_poll_interval_sec")]
    pub poll_interval_sec: u64,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            default_duration_min: DEFAULT_DURATION_MIN,
            poll_interval_sec: DEFAULT_POLL_INTERVAL_SEC,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rain_sensor: Option<String>,
    #[serde(default = "default_stale_after_min")]
    pub stale_after_min: u64,
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            enabled: false,
            rain_sensor: None,
            stale_after_min: DEFAULT_STALE_AFTER_MIN,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneEntry {
    pub name: String,
    pub actuator: String,
    pub gpio_pin: i64,
    pub duration_min: i64,
}

fn default_duration_min() -> u32 {
    DEFAULT_DURATION_MIN
}

fn default_poll_interval_sec() -> u64 {
    DEFAULT_POLL_INTERVAL_SEC
}

fn default_stale_after_min() -> u64 {
    DEFAULT_STALE_AFTER_MIN
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// Longest single zone run accepted from config (one day).
const MAX_DURATION_MIN: i64 = 24 * 60;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_hub(&mut errors);
        self.validate_weather(&mut errors);
        self.validate_zones(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_hub(&self, errors: &mut Vec<String>) {
        if self.hub.default_duration_min == 0 {
            errors.push("hub: default_duration_min must be positive".to_string());
        }
        if self.hub.poll_interval_sec == 0 {
            errors.push("hub: poll_interval_sec must be positive".to_string());
        }
    }

    fn validate_weather(&self, errors: &mut Vec<String>) {
        let sensor = self.weather.rain_sensor.as_deref().map(str::trim);
        if self.weather.enabled && !sensor.is_some_and(|s| !s.is_empty()) {
            errors.push("weather: enabled but rain_sensor is not set".to_string());
        }
        if let Some(s) = sensor {
            if s.contains('/') {
                errors.push(format!("weather: rain_sensor '{s}' must not contain '/'"));
            }
        }
        if self.weather.stale_after_min == 0 {
            errors.push("weather: stale_after_min must be positive".to_string());
        }
    }

    fn validate_zones(&self, errors: &mut Vec<String>) {
        let mut seen_names: HashSet<&str> = HashSet::new();
        let mut seen_actuators: HashSet<&str> = HashSet::new();
        let mut seen_pins: HashSet<i64> = HashSet::new();

        for (i, z) in self.zones.iter().enumerate() {
            let ctx = || {
                if z.name.is_empty() {
                    format!("zones[{i}]")
                } else {
                    format!("zone '{}'", z.name)
                }
            };

            // ── Identity ────────────────────────────────────────
            if z.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            } else if !seen_names.insert(&z.name) {
                errors.push(format!("{}: duplicate name", ctx()));
            }

            if z.actuator.trim().is_empty() {
                errors.push(format!("{}: actuator is empty", ctx()));
            } else if !seen_actuators.insert(&z.actuator) {
                errors.push(format!(
                    "{}: actuator '{}' is already used by another zone",
                    ctx(),
                    z.actuator
                ));
            }

            // ── Default run time ────────────────────────────────
            if z.duration_min <= 0 {
                errors.push(format!(
                    "{}: duration_min must be positive, got {}",
                    ctx(),
                    z.duration_min
                ));
            } else if z.duration_min > MAX_DURATION_MIN {
                errors.push(format!(
                    "{}: duration_min {} exceeds {MAX_DURATION_MIN}",
                    ctx(),
                    z.duration_min
                ));
            }

            // ── GPIO pin whitelist ──────────────────────────────
            if !VALID_GPIO_PINS.contains(&z.gpio_pin) {
                errors.push(format!(
                    "{}: gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    ctx(),
                    z.gpio_pin
                ));
            } else if !seen_pins.insert(z.gpio_pin) {
                errors.push(format!(
                    "{}: gpio_pin {} is already used by another zone",
                    ctx(),
                    z.gpio_pin
                ));
            }
        }
    }

    /// `(actuator, gpio_pin)` pairs for the valve board. Only meaningful
    /// after [`Config::validate`] has passed.
    pub fn valve_pins(&self) -> Vec<(String, u8)> {
        self.zones
            .iter()
            .filter_map(|z| u8::try_from(z.gpio_pin).ok().map(|p| (z.actuator.clone(), p)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
