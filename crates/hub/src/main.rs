mod config;
mod error;
mod mqtt;
mod scheduler;
mod status;
#[cfg(test)]
mod testing;
mod timer;
mod valve;
mod weather;
mod web;
mod zones;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use mqtt::{extract_rain_sensor_id, parse_switch_payload, RAIN_TOPIC_FILTER};
use scheduler::Scheduler;
use valve::ValveBoard;
use weather::{GateConfig, RainCache, WeatherGate};
use zones::ZoneRegistry;

/// Pause between MQTT reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Valve board ─────────────────────────────────────────────────
    // Many common relay boards are active-low. If yours is active-high, set false.
    let active_low = env::var("RELAY_ACTIVE_LOW")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    let valves = ValveBoard::new(&cfg.valve_pins(), active_low)?;

    // ── Weather gate ────────────────────────────────────────────────
    let rain = RainCache::new(Duration::from_secs(cfg.weather.stale_after_min * 60));
    let gate = WeatherGate::new(GateConfig::from(&cfg.weather), rain.clone());

    let scheduler = Scheduler::new(ZoneRegistry::from_config(&cfg.zones), valves, gate);
    if scheduler.registry().is_empty() {
        warn!("no zones configured in {config_path}");
    }
    info!(zones = ?scheduler.registry().names(), "config loaded from {config_path}");

    // ── Web server ──────────────────────────────────────────────────
    tokio::spawn(web::serve(web::AppState {
        scheduler: scheduler.clone(),
        default_duration_min: cfg.hub.default_duration_min,
    }));

    // ── MQTT ────────────────────────────────────────────────────────
    let client_id = "irrigation-hub";
    let mut mqttoptions = MqttOptions::new(client_id, broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    client.subscribe(RAIN_TOPIC_FILTER, QoS::AtLeastOnce).await?;
    info!("hub subscribed to {RAIN_TOPIC_FILTER}");

    tokio::spawn(mqtt::publish_status(
        scheduler.clone(),
        client.clone(),
        Duration::from_secs(cfg.hub.poll_interval_sec),
    ));

    // One listener for the whole run, so a Ctrl-C during back-off is not lost.
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let Some(sensor) = extract_rain_sensor_id(&p.topic) else {
                    debug!(topic = %p.topic, "unhandled topic");
                    continue;
                };
                match parse_switch_payload(&p.payload) {
                    Ok(raining) => {
                        info!(sensor, raining, "rain sensor update");
                        rain.record(sensor, raining);
                    }
                    Err(msg) => warn!(sensor, "{msg} (use ON/OFF)"),
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt connected"),
            Ok(Event::Incoming(Packet::Disconnect)) => warn!("mqtt disconnected"),
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                if back_off(&mut shutdown, RECONNECT_DELAY).await {
                    break;
                }
            }
        }
    }

    info!("shutdown requested, closing all valves");
    if let Err(e) = scheduler.stop_all().await {
        error!("shutdown: {e}");
    }
    Ok(())
}

/// Sleep for `delay` unless `shutdown` resolves first. Returns `true` on
/// shutdown.
async fn back_off<F: Future + Unpin>(shutdown: &mut F, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown => true,
        () = sleep(delay) => false,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
