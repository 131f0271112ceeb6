//! resolverd - Pointing Target Resolution daemon
//!
//! This daemon:
//! 1. Subscribes to the perception signal topics over MQTT (direction,
//!    slope, intercept, detections, frame dimensions)
//! 2. Feeds every message into the shared SignalStore
//! 3. Repeatedly resolves the pointing target with the configured mode,
//!    deadline, and class filter
//! 4. Publishes each resolution to `<prefix>/target` and logs the path
//! 5. Shuts down cooperatively on Ctrl-C

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::v5::Packet, mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use pointing_kernel::config::ResolverdConfig;
use pointing_kernel::signals::WaitError;
use pointing_kernel::{
    DetectedObject, FrameDimensions, PerceptionContext, PointingDirection, SignalStore,
};

const TOPIC_DIRECTION: &str = "direction";
const TOPIC_SLOPE: &str = "slope";
const TOPIC_INTERCEPT: &str = "intercept";
const TOPIC_DETECTIONS: &str = "detections";
const TOPIC_FRAME: &str = "frame";
const TOPIC_TARGET: &str = "target";

/// Pause between successful resolutions so the daemon does not republish the
/// same target in a tight loop.
const RESOLVE_INTERVAL: Duration = Duration::from_secs(1);

/// Backoff between MQTT reconnection attempts after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = ResolverdConfig::load()?;
    let endpoint = parse_mqtt_endpoint(&cfg.mqtt.broker_addr)?;
    if !cfg.mqtt.allow_remote {
        validate_loopback_addr(&endpoint, &cfg.mqtt.broker_addr)?;
    } else {
        log::warn!("remote MQTT enabled - ensure the broker is in a trusted network");
    }

    let store = Arc::new(SignalStore::new());
    let context = PerceptionContext::new(store.clone(), cfg.context_config());

    let cancel_store = store.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        cancel_store.cancel();
    })
    .expect("error setting Ctrl-C handler");

    let mut options = MqttOptions::new(&cfg.mqtt.client_id, &endpoint.host, endpoint.port);
    options.set_keep_alive(Duration::from_secs(60));
    options.set_clean_start(true);
    let (client, connection) = Client::new(options, 64);

    let prefix = cfg.mqtt.topic_prefix.clone();
    log::info!(
        "resolverd running: broker={} prefix={} mode={}",
        cfg.mqtt.broker_addr,
        prefix,
        cfg.mode
    );

    let feed_store = store.clone();
    let feed_client = client.clone();
    let feed_prefix = prefix.clone();
    let feed_handle = std::thread::spawn(move || {
        run_signal_feed(connection, &feed_client, &feed_store, &feed_prefix);
    });

    let target_topic = format!("{}/{}", prefix, TOPIC_TARGET);
    while !store.is_cancelled() {
        match context.resolve() {
            Ok(resolution) => {
                let payload = serde_json::to_vec(&resolution)?;
                if let Err(e) =
                    client.publish(target_topic.as_str(), QoS::AtLeastOnce, true, payload)
                {
                    log::warn!("failed to publish resolution: {}", e);
                }
                std::thread::sleep(RESOLVE_INTERVAL);
            }
            Err(e) => match e.downcast_ref::<WaitError>() {
                Some(WaitError::Cancelled) => break,
                Some(WaitError::Timeout { .. }) => {
                    log::warn!("{}", e);
                }
                None => return Err(e),
            },
        }
    }

    log::info!("stopping resolverd...");
    let _ = client.disconnect();
    let _ = feed_handle.join();
    Ok(())
}

/// Subscribe to the five signal topics. Called on every ConnAck, since a
/// clean-start reconnect drops the previous session's subscriptions.
fn subscribe_signals(client: &Client, prefix: &str) -> Result<()> {
    for suffix in [
        TOPIC_DIRECTION,
        TOPIC_SLOPE,
        TOPIC_INTERCEPT,
        TOPIC_DETECTIONS,
        TOPIC_FRAME,
    ] {
        client.subscribe(format!("{}/{}", prefix, suffix), QoS::AtLeastOnce)?;
    }
    Ok(())
}

/// Drive the MQTT event loop, pushing every signal message into the store.
///
/// Connection errors back off and retry rather than killing the feed; the
/// event loop reconnects on the next poll. If the feed does exit, it cancels
/// the store so the resolve loop shuts down instead of waiting on signals
/// that will never arrive.
fn run_signal_feed(mut connection: Connection, client: &Client, store: &SignalStore, prefix: &str) {
    for event in connection.iter() {
        if store.is_cancelled() {
            break;
        }
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if let Err(e) = subscribe_signals(client, prefix) {
                    log::error!("failed to subscribe to signal topics: {}", e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = String::from_utf8_lossy(&publish.topic).to_string();
                if let Err(e) = apply_signal(store, prefix, &topic, &publish.payload) {
                    log::warn!("dropping signal on {}: {}", topic, e);
                }
            }
            Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
            Err(e) => {
                log::error!("MQTT connection error: {}. Reconnecting...", e);
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    store.cancel();
}

/// Route one message to its slot by topic suffix.
fn apply_signal(store: &SignalStore, prefix: &str, topic: &str, payload: &[u8]) -> Result<()> {
    let suffix = topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| anyhow!("topic outside prefix {:?}", prefix))?;

    match suffix {
        TOPIC_DIRECTION => {
            let text = std::str::from_utf8(payload).context("direction is not utf-8")?;
            store.set_direction(PointingDirection::from_str(text)?);
        }
        TOPIC_SLOPE => {
            store.set_slope(parse_float(payload).context("invalid slope payload")?);
        }
        TOPIC_INTERCEPT => {
            store.set_intercept(parse_float(payload).context("invalid intercept payload")?);
        }
        TOPIC_DETECTIONS => {
            let detections: Vec<DetectedObject> =
                serde_json::from_slice(payload).context("invalid detections payload")?;
            store.set_detections(detections);
        }
        TOPIC_FRAME => {
            let frame: FrameDimensions =
                serde_json::from_slice(payload).context("invalid frame payload")?;
            store.set_frame_dimensions(frame);
        }
        other => return Err(anyhow!("unrecognized signal topic suffix {:?}", other)),
    }
    Ok(())
}

fn parse_float(payload: &[u8]) -> Result<f64> {
    let text = std::str::from_utf8(payload).context("payload is not utf-8")?;
    let value: f64 = text.trim().parse().context("payload is not a float")?;
    if !value.is_finite() {
        return Err(anyhow!("payload must be finite, got {}", value));
    }
    Ok(value)
}

#[derive(Clone, Debug)]
struct MqttEndpoint {
    host: String,
    port: u16,
}

fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut remainder = addr.trim();
    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }
    let (host, port) = split_host_port(remainder)?;
    Ok(MqttEndpoint { host, port })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}

fn validate_loopback_addr(endpoint: &MqttEndpoint, original: &str) -> Result<()> {
    let host = endpoint.host.as_str();
    if host == "localhost" || host == "127.0.0.1" || host == "::1" {
        return Ok(());
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        if ip.is_loopback() {
            return Ok(());
        }
    }
    Err(anyhow!(
        "MQTT broker must be loopback for safety: {} (set allow_remote to override)",
        original
    ))
}
