use std::time::Duration;

use rumqttc::{AsyncClient, QoS};
use tracing::{debug, error};

use crate::scheduler::Scheduler;
use crate::valve::Actuator;
use crate::weather::RainSensor;

/// Rain sensors publish `ON`/`OFF` here.
pub(crate) const RAIN_TOPIC_FILTER: &str = "sensor/+/rain";

/// Retained JSON status snapshot.
pub(crate) const STATUS_TOPIC: &str = "irrigation/status";

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Extract sensor_id from "sensor/<sensor_id>/rain".
pub(crate) fn extract_rain_sensor_id(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "sensor" && parts[2] == "rain" && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

/// Parse an "ON"/"OFF" payload into a bool (case-insensitive, trims whitespace).
pub(crate) fn parse_switch_payload(payload: &[u8]) -> Result<bool, String> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        _ => Err(format!("unknown switch payload '{s}'")),
    }
}

// ---------------------------------------------------------------------------
// Status publisher
// ---------------------------------------------------------------------------

/// Publish the status snapshot every `interval` and right after each
/// scheduler state change. Intended to be `tokio::spawn`-ed from main.
pub(crate) async fn publish_status<A: Actuator, S: RainSensor>(
    scheduler: Scheduler<A, S>,
    client: AsyncClient,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = scheduler.changed() => {}
        }

        let snapshot = scheduler.status().await;
        let payload = match serde_json::to_vec(&snapshot) {
            Ok(p) => p,
            Err(e) => {
                error!("status: failed to serialise snapshot: {e}");
                continue;
            }
        };

        if let Err(e) = client
            .publish(STATUS_TOPIC, QoS::AtLeastOnce, true, payload)
            .await
        {
            error!("status: failed to publish: {e}");
        } else {
            debug!(
                state = snapshot.system_state.as_str(),
                remaining_min = snapshot.remaining_min,
                active = snapshot.active_zone_count,
                "status published"
            );
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
