//! Outbound side: delivery of resolved conditions to the message bus.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MqttSettings;
use crate::error::{Error, Result};

/// How long `connect` waits for the broker's CONNACK before carrying on.
pub const CONNECT_GRACE: Duration = Duration::from_secs(2);

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ConditionPublisher: Send + Sync {
    /// Publish `payload` to `topic` as a retained message.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Close the connection to the bus, if any.
    async fn disconnect(&self) -> Result<()>;
}

/// A single persistent MQTT connection shared by every publish.
pub struct MqttPublisher {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttPublisher {
    /// Open the connection and wait up to [`CONNECT_GRACE`] for the broker to accept it.
    ///
    /// The event loop keeps retrying in the background, so an unreachable broker
    /// is logged rather than returned.
    pub async fn connect(settings: &MqttSettings) -> Self {
        info!("Connecting to MQTT broker: {}", settings.url());

        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.broker.clone(),
            settings.port,
        );
        options.set_keep_alive(Duration::from_secs(30));

        let (client, event_loop) = AsyncClient::new(options, 10);
        let (tx, mut connected) = watch::channel(false);
        let handle = spawn_event_loop(event_loop, settings.url(), tx);

        match tokio::time::timeout(CONNECT_GRACE, connected.wait_for(|up| *up)).await {
            Ok(Ok(_)) => {}
            _ => warn!("MQTT broker not connected yet, continuing"),
        }

        Self {
            client,
            connected,
            event_loop: Mutex::new(Some(handle)),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

#[async_trait]
impl ConditionPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, true, payload)
            .await
            .map_err(|e| Error::Publish(e.to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(mut handle) = self.event_loop.lock().await.take() else {
            return Ok(());
        };

        self.client
            .disconnect()
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        if tokio::time::timeout(CONNECT_GRACE, &mut handle).await.is_err() {
            warn!("MQTT event loop did not stop in time, aborting it");
            handle.abort();
        }
        Ok(())
    }
}

/// Drive the rumqttc event loop until our own DISCONNECT has been sent.
fn spawn_event_loop(
    mut event_loop: EventLoop,
    broker: String,
    connected: watch::Sender<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("MQTT event loop started for {}", broker);

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    connected.send_replace(true);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Disconnected from MQTT broker");
                    connected.send_replace(false);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    connected.send_replace(false);
                    debug!("MQTT event loop stopped for {}", broker);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection error for {}: {}", broker, e);
                    connected.send_replace(false);
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    })
}
