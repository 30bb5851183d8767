use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use log::{debug, info, warn};
use mac_address::get_mac_address;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;

use crate::config::LampConfig;
use crate::error::LampError;

/// Requests rumqttc may buffer before `try_publish` starts failing.
const REQUEST_CAPACITY: usize = 64;

const PUBLISH_QOS: QoS = QoS::AtLeastOnce;

/// What the transport passes on to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// The broker accepted us and the subscriptions have been sent.
    Connected,
    Publish { topic: String, payload: Bytes },
}

/// A publish for the broker. Always sent retained.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub topic: String,
    pub payload: String,
}

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    subscriptions: Vec<String>,
    reconnect: Duration,
}

impl MqttClient {
    pub fn new(config: &LampConfig, subscriptions: Vec<String>) -> MqttClient {
        let id = config
            .mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| default_client_id(&config.name));

        info!(
            "Connecting to {}:{} as {}",
            config.mqtt.host, config.mqtt.port, id
        );

        let mut options = MqttOptions::new(id, config.mqtt.host.clone(), config.mqtt.port);
        options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs.max(5)));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        MqttClient {
            client,
            eventloop,
            subscriptions,
            reconnect: Duration::from_secs(config.mqtt.reconnect_secs),
        }
    }

    /// Pump the connection: forward every publish to `inbound` and send everything from
    /// `outbound`. A lost broker is retried forever, this only returns once a channel closes.
    pub async fn run(
        mut self,
        inbound: mpsc::Sender<Incoming>,
        mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                outgoing = outbound.recv() => match outgoing {
                    Some(outgoing) => self.publish(outgoing),
                    None => {
                        if let Err(e) = self.client.try_disconnect() {
                            debug!("Error disconnecting: {}", e);
                        }
                        self.drain().await;
                        return Ok(());
                    }
                },
                event = self.eventloop.poll() => match event {
                    Ok(event) => {
                        let incoming = match incoming(event) {
                            Some(incoming) => incoming,
                            None => continue,
                        };
                        match &incoming {
                            Incoming::Connected => {
                                info!("Connected to broker");
                                self.subscribe();
                            }
                            Incoming::Publish { topic, payload } => {
                                debug!("Received {} ({} bytes)", topic, payload.len());
                            }
                        }
                        if inbound.send(incoming).await.is_err() {
                            debug!("Controller has gone, closing connection");
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        let e = LampError::TransportUnavailable(e.to_string());
                        warn!("{}, reconnecting in {:?}", e, self.reconnect);
                        tokio::time::sleep(self.reconnect).await;
                    }
                },
            }
        }
    }

    fn publish(&self, outgoing: Outgoing) {
        let Outgoing { topic, payload } = outgoing;
        debug!("Publishing {}: {}", topic, payload);
        if let Err(e) = self.client.try_publish(topic, PUBLISH_QOS, true, payload) {
            warn!("Dropped publish: {}", e);
        }
    }

    /// Keep polling until the queued publishes and the disconnect have gone out.
    async fn drain(&mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) | Err(_) => return,
                Ok(_) => (),
            }
        }
    }

    fn subscribe(&self) {
        for topic in &self.subscriptions {
            debug!("Subscribing to {}", topic);
            if let Err(e) = self.client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                warn!("Failed to subscribe to {}: {}", topic, e);
            }
        }
    }
}

/// The part of an event loop event the controller cares about, if any.
fn incoming(event: Event) -> Option<Incoming> {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => Some(Incoming::Connected),
        Event::Incoming(Packet::Publish(publish)) => Some(Incoming::Publish {
            topic: publish.topic,
            payload: publish.payload,
        }),
        _ => None,
    }
}

fn default_client_id(name: &str) -> String {
    match get_mac_address() {
        Ok(Some(mac)) => format!("lamp-{}", mac.to_string().replace(':', "").to_lowercase()),
        _ => format!("lamp-{}", name),
    }
}
