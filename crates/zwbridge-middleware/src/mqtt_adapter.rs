//! [`MqttAdapter`] – broker connection built on `rumqttc`.
//!
//! The adapter subscribes to `<prefix>/command/#` and `<prefix>/config`,
//! forwards every incoming publish as an [`InboundMessage`], and publishes
//! outbound messages non-retained at the configured QoS.  After a broker
//! reconnect the subscriptions are requested again.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
pub use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zwbridge_types::BridgeError;

use crate::adapter::{InboundMessage, MessageBus};
use crate::publisher::OutboundMessage;

pub const DEFAULT_PORT: u16 = 1883;

/// Capacity of the inbound message channel handed to the bridge.
const INBOUND_CAPACITY: usize = 64;

/// Pause after a connection error before polling again.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Split an MQTT URL of the form `tcp://host[:port]` into host and port.
///
/// `mqtt://` is accepted as a synonym, and a bare `host[:port]` is taken
/// as-is.
///
/// # Errors
///
/// Returns [`BridgeError::Config`] for other schemes, an empty host, or a
/// port that is not a number.
pub fn parse_mqtt_url(url: &str) -> Result<(String, u16), BridgeError> {
    let rest = match url.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some((scheme, _)) => {
            return Err(BridgeError::Config(format!(
                "unsupported MQTT scheme '{scheme}' in {url}"
            )));
        }
        None => url,
    };
    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| BridgeError::Config(format!("invalid MQTT port in {url}")))?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(BridgeError::Config(format!("missing MQTT host in {url}")));
    }
    Ok((host.to_string(), port))
}

/// Map a numeric QoS level onto `rumqttc`'s enum.
pub fn qos_from_level(level: u8) -> Result<QoS, BridgeError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BridgeError::Config(format!("invalid QoS level {other}"))),
    }
}

/// The topic filters the bridge listens on.
pub fn subscriptions(prefix: &str) -> [String; 2] {
    [format!("{prefix}/command/#"), format!("{prefix}/config")]
}

/// Everything needed to open a broker connection.
#[derive(Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
    pub qos: QoS,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("topic_prefix", &self.topic_prefix)
            .field("qos", &self.qos)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl MqttSettings {
    pub fn new(
        url: &str,
        client_id: impl Into<String>,
        topic_prefix: impl Into<String>,
    ) -> Result<Self, BridgeError> {
        let (host, port) = parse_mqtt_url(url)?;
        Ok(Self {
            host,
            port,
            client_id: client_id.into(),
            topic_prefix: topic_prefix.into(),
            qos: QoS::AtMostOnce,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        })
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

/// A live broker connection.
pub struct MqttAdapter {
    client: AsyncClient,
    qos: QoS,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttAdapter {
    /// Connect, wait for the broker's acknowledgement, subscribe, and start
    /// the event loop.
    ///
    /// Returns the adapter and the receiver of inbound messages.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MessageBus`] if the first connection attempt
    /// fails or is not acknowledged within `connect_timeout`.
    pub async fn connect(
        settings: MqttSettings,
    ) -> Result<(Self, mpsc::Receiver<InboundMessage>), BridgeError> {
        let (client, mut eventloop) = AsyncClient::new(settings.options(), INBOUND_CAPACITY);

        tokio::time::timeout(settings.connect_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                BridgeError::MessageBus(format!(
                    "no CONNACK from {}:{} within {:?}",
                    settings.host, settings.port, settings.connect_timeout
                ))
            })??;
        info!(host = %settings.host, port = settings.port, "connected to MQTT broker");

        let filters = subscriptions(&settings.topic_prefix);
        for filter in &filters {
            client
                .subscribe(filter.as_str(), settings.qos)
                .await
                .map_err(|e| BridgeError::MessageBus(format!("subscribe {filter}: {e}")))?;
        }

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            filters,
            settings.qos,
            tx,
        ));

        Ok((
            Self {
                client,
                qos: settings.qos,
                task: Mutex::new(Some(task)),
            },
            rx,
        ))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), BridgeError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(BridgeError::MessageBus(format!("MQTT connect failed: {e}"))),
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    filters: [String; 2],
    qos: QoS,
    inbound: mpsc::Sender<InboundMessage>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(topic = %publish.topic, bytes = publish.payload.len(), "MQTT message");
                let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                if inbound.send(message).await.is_err() {
                    debug!("inbound receiver dropped, stopping MQTT loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("reconnected to MQTT broker, resubscribing");
                for filter in &filters {
                    if let Err(e) = client.try_subscribe(filter.as_str(), qos) {
                        warn!("resubscribe {filter} failed: {e}");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("broker sent DISCONNECT");
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT error: {e}");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl MessageBus for MqttAdapter {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BridgeError> {
        self.client
            .publish(message.topic, self.qos, false, message.payload)
            .await
            .map_err(|e| BridgeError::MessageBus(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| BridgeError::MessageBus(e.to_string()));
        // Give the event loop a moment to flush the DISCONNECT packet.
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        result
    }
}
