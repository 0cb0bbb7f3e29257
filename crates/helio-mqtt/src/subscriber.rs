use crate::config::MqttConfig;
use crate::topic::{parse_topic, TopicRoute};
use helio_domain::{DomainError, DomainResult, IncomingMessage, TelemetryEvent};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TELEMETRY_SUBSCRIPTION: &str = "inverter/+/+/data";
const DEVICE_IDENTITY_SUBSCRIPTION: &str = "devices/inverter/+/+";

/// Run the MQTT subscriber process.
///
/// Subscribes to the telemetry and device-identity topic families and
/// forwards every publish into the ingestion channel. Reconnects with a
/// bounded number of attempts; a successful session resets the counter.
pub async fn run_mqtt_subscriber(
    config: MqttConfig,
    tx: mpsc::Sender<IncomingMessage>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    info!(broker_url = %config.url, client_id = %config.client_id, "starting MQTT subscriber");

    let mut retry_count = 0;

    loop {
        if token.is_cancelled() {
            debug!("MQTT subscriber cancelled before connection");
            break;
        }

        match run_mqtt_connection(&config, &tx, &token).await {
            Ok(()) => {
                debug!("MQTT subscriber stopped cleanly");
                break;
            }
            Err(e) => {
                error!(error = %e, "MQTT connection error");

                retry_count += 1;
                if retry_count >= config.max_reconnect_attempts {
                    error!(
                        max_attempts = config.max_reconnect_attempts,
                        "max reconnect attempts reached, stopping MQTT subscriber"
                    );
                    anyhow::bail!("MQTT subscriber gave up after {retry_count} attempts");
                }

                warn!(
                    attempt = retry_count,
                    max_attempts = config.max_reconnect_attempts,
                    "retrying MQTT connection"
                );

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(config.reconnect_delay()) => {}
                }
            }
        }
    }

    info!("MQTT subscriber stopped");
    Ok(())
}

/// Run a single MQTT connection session
async fn run_mqtt_connection(
    config: &MqttConfig,
    tx: &mpsc::Sender<IncomingMessage>,
    token: &CancellationToken,
) -> DomainResult<()> {
    let (host, port) = parse_broker_url(&config.url)?;

    let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, config.channel_capacity);

    for pattern in [TELEMETRY_SUBSCRIPTION, DEVICE_IDENTITY_SUBSCRIPTION] {
        client
            .subscribe(pattern, QoS::AtLeastOnce)
            .await
            .map_err(|e| {
                DomainError::RepositoryError(anyhow::anyhow!("failed to subscribe: {e}"))
            })?;
        info!(topic = %pattern, "subscribed to MQTT topic");
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("shutdown signal received");
                let _ = client.disconnect().await;
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        forward_publish(&publish.topic, &publish.payload, tx);
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        debug!("subscription acknowledged");
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to MQTT broker");
                    }
                    Ok(_) => {
                        // Other events (outgoing, pings, etc.)
                    }
                    Err(e) => {
                        return Err(DomainError::RepositoryError(
                            anyhow::anyhow!("MQTT event loop error: {e}"),
                        ));
                    }
                }
            }
        }
    }
}

/// Route one publish into the ingestion channel. The event loop must never
/// block on a slow consumer, so a full channel drops the message with a
/// warning.
fn forward_publish(topic: &str, payload: &[u8], tx: &mpsc::Sender<IncomingMessage>) {
    let route = match parse_topic(topic) {
        Ok(route) => route,
        Err(e) => {
            warn!(topic = %topic, error = %e, "failed to parse MQTT topic, skipping message");
            return;
        }
    };

    let raw_payload = String::from_utf8_lossy(payload).into_owned();
    let message = match route {
        TopicRoute::Telemetry { owner_id, device_id } => {
            IncomingMessage::Telemetry(TelemetryEvent {
                owner_id,
                device_id,
                raw_payload,
                received_at: chrono::Utc::now(),
            })
        }
        TopicRoute::DeviceIdentity { owner_id, device_id } => IncomingMessage::DeviceIdentity {
            owner_id,
            device_id,
            raw_payload,
        },
        TopicRoute::Ignored => {
            debug!(topic = %topic, "ignoring message on unconsumed subtopic");
            return;
        }
    };

    match tx.try_send(message) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(topic = %topic, "ingestion channel full, dropping message");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!(topic = %topic, "ingestion channel closed, dropping message");
        }
    }
}

/// Parse broker URL in format mqtt://host:port or tcp://host:port or host:port
fn parse_broker_url(url: &str) -> DomainResult<(&str, u16)> {
    let url = url.trim_start_matches("mqtt://");
    let url = url.trim_start_matches("tcp://");

    let parts: Vec<&str> = url.split(':').collect();
    match parts.len() {
        1 => Ok((parts[0], 1883)), // Default MQTT port
        2 => {
            let port = parts[1].parse::<u16>().map_err(|_| {
                DomainError::InvalidConfig(format!("invalid port in broker URL: {}", parts[1]))
            })?;
            Ok((parts[0], port))
        }
        _ => Err(DomainError::InvalidConfig(format!(
            "invalid broker URL format: {url}"
        ))),
    }
}
