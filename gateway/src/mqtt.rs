use crate::chat::Delivery;
use crate::errors::{Error, Result};
use crate::model::PlainMessage;
use crate::notify::Notifier;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub fn connect(broker: &str, port: u16, client_id: &str) -> (AsyncClient, EventLoop) {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    AsyncClient::new(mqtt_options, 100)
}

/// Broker session state shared between the event loop and publishers.
#[derive(Clone, Debug, Default)]
pub struct LinkState(Arc<AtomicBool>);

impl LinkState {
    pub fn is_up(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, up: bool) {
        self.0.store(up, Ordering::Release);
    }
}

/// Publishes alert events on the fan-out topic.
#[derive(Clone)]
pub struct MqttNotifier {
    client: AsyncClient,
    topic: String,
    link: LinkState,
}

impl MqttNotifier {
    pub fn new(client: AsyncClient, topic: impl Into<String>, link: LinkState) -> Self {
        Self {
            client,
            topic: topic.into(),
            link,
        }
    }
}

#[async_trait]
impl Notifier for MqttNotifier {
    async fn plain_message(&self, chats: &[i64], message: &str) -> Result<()> {
        // the client only queues locally; without a session nothing reaches the broker
        if !self.link.is_up() {
            return Err(Error::Dispatch(format!(
                "publish to {:?} failed: broker not connected",
                self.topic
            )));
        }

        let payload = serde_json::to_vec(&PlainMessage {
            chats: chats.to_vec(),
            message: message.to_string(),
        })?;

        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| Error::Dispatch(format!("publish to {:?} failed: {}", self.topic, e)))
    }
}

/// Drives the MQTT connection and keeps `link` in step with the broker
/// session. With a `delivery` worker it also consumes the fan-out topic and
/// forwards each event to the chats it lists.
pub async fn run_event_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topic: String,
    link: LinkState,
    delivery: Option<Delivery>,
) -> Result<()> {
    if delivery.is_some() {
        client
            .subscribe(&topic, QoS::AtLeastOnce)
            .await
            .map_err(Error::Mqtt)?;
        info!("Subscribed to {} with QoS 1", topic);
    }

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(delivery) = &delivery else {
                    continue;
                };
                if publish.topic != topic {
                    continue;
                }

                debug!(
                    "Received alert on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );

                match serde_json::from_slice::<PlainMessage>(&publish.payload) {
                    Ok(msg) => {
                        let delivery = delivery.clone();
                        tokio::spawn(async move {
                            if let Err(e) = delivery.deliver(&msg).await {
                                error!("Alert delivery incomplete: {}", e);
                            }
                        });
                    }
                    Err(e) => warn!("Discarding undecodable alert event: {}", e),
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("Connected to MQTT broker: {:?}", ack.code);
                link.set(ack.code == ConnectReturnCode::Success);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT broker closed the session");
                link.set(false);
            }
            Ok(_) => {}
            Err(e) => {
                link.set(false);
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
