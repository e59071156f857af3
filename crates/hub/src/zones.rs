//! Static zone registry, loaded once from config and read-only afterwards.

use serde::Serialize;

use crate::config::ZoneEntry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Zone {
    pub name: String,
    /// Opaque handle understood by the actuator layer.
    pub actuator: String,
    pub duration_min: u32,
}

impl Zone {
    pub fn new(name: &str, actuator: &str, duration_min: u32) -> Self {
        Self {
            name: name.to_string(),
            actuator: actuator.to_string(),
            duration_min,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ZoneRegistry {
    zones: Vec<Zone>,
}

impl ZoneRegistry {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self { zones }
    }

    /// Build from validated config entries. Entries whose duration does not
    /// fit a `u32` are skipped (validation rejects them first).
    pub fn from_config(entries: &[ZoneEntry]) -> Self {
        let zones = entries
            .iter()
            .filter_map(|z| {
                let duration_min = u32::try_from(z.duration_min).ok()?;
                Some(Zone::new(&z.name, &z.actuator, duration_min))
            })
            .collect();
        Self { zones }
    }

    /// All zones in configuration order.
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn lookup(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.zones.iter().map(|z| z.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
