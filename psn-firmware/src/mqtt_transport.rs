//! `Transport` over Wi-Fi (`esp-idf-svc::wifi`, grounded on a
//! `BlockingWifi<EspWifi>` connect/scan sequence) plus MQTT
//! (`esp-idf-svc::mqtt::client`), with topic layout and the subscribe/message
//! event split grounded on the original firmware's `transmit.cpp`
//! (`AsyncMqttClient`'s `onMqttSubscribe`/`onMqttMessage` split, the same
//! boundary `TransportEvent::SubscribeAck`/`Message` models).

use std::sync::mpsc::{Receiver, Sender};

use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration as WifiConfig, EspWifi};
use psn_core::capabilities::{Transport, TransportEvent};

pub struct MqttTransport<'a> {
    wifi: BlockingWifi<EspWifi<'a>>,
    ssid: heapless::String<31>,
    server_address: heapless::String<31>,
    server_port: u16,
    mqtt: Option<EspMqttClient<'a>>,
    events: Receiver<TransportEvent>,
    event_sender: Sender<TransportEvent>,
}

impl<'a> MqttTransport<'a> {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        ssid: heapless::String<31>,
        password: heapless::String<63>,
        server_address: heapless::String<31>,
        server_port: u16,
    ) -> anyhow::Result<Self> {
        let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;
        let cfg = WifiConfig::Client(ClientConfiguration {
            ssid: ssid.as_str().try_into().map_err(|_| anyhow::anyhow!("invalid ssid"))?,
            password: password.as_str().try_into().map_err(|_| anyhow::anyhow!("invalid password"))?,
            auth_method: if password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });
        esp_wifi.set_configuration(&cfg)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

        let (event_sender, events) = std::sync::mpsc::channel();

        Ok(Self {
            wifi,
            ssid,
            server_address,
            server_port,
            mqtt: None,
            events,
            event_sender,
        })
    }
}

impl Transport for MqttTransport<'_> {
    fn connect_network(&mut self, timeout_s: u8) -> bool {
        if self.wifi.start().is_err() {
            return false;
        }
        if self.wifi.connect().is_err() {
            return false;
        }
        // `wait_netif_up` blocks internally; the caller-supplied timeout is
        // advisory here since `BlockingWifi` doesn't expose a deadline knob.
        let _ = timeout_s;
        self.wifi.wait_netif_up().is_ok()
    }

    fn connect_server(&mut self, _timeout_s: u8) -> bool {
        let broker_url = format!("mqtt://{}:{}", self.server_address, self.server_port);
        let mqtt_config = MqttClientConfiguration::default();

        let sender = self.event_sender.clone();

        let client = EspMqttClient::new_cb(&broker_url, &mqtt_config, move |event| {
            match event.payload() {
                EventPayload::Subscribed(packet_id) => {
                    let _ = sender.send(TransportEvent::SubscribeAck {
                        packet_id: packet_id as u16,
                    });
                }
                EventPayload::Received { topic, data, .. } => {
                    if let Some(topic) = topic {
                        if let Some(corr_id) = corr_id_from_topic(topic) {
                            let payload = String::from_utf8_lossy(data).into_owned();
                            let _ = sender.send(TransportEvent::Message {
                                corr_id,
                                payload,
                            });
                        }
                    }
                }
                EventPayload::Disconnected => {
                    let _ = sender.send(TransportEvent::Disconnected);
                }
                _ => {}
            }
        });

        match client {
            Ok(client) => {
                self.mqtt = Some(client);
                true
            }
            Err(e) => {
                log::warn!("mqtt connect failed: {e}");
                false
            }
        }
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Option<u16> {
        let client = self.mqtt.as_mut()?;
        client
            .enqueue(topic, QoS::AtMostOnce, false, payload.as_bytes())
            .ok()
            .map(|id| id as u16)
    }

    fn subscribe(&mut self, topic_filter: &str) -> Option<u16> {
        let client = self.mqtt.as_mut()?;
        client.subscribe(topic_filter, QoS::AtMostOnce).ok().map(|id| id as u16)
    }

    fn try_recv_event(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }
}

/// Extracts the correlation id from the trailing path segment of a topic
/// like `nodes/{mac}/outbound/{corr_id}`, mirroring the original firmware's
/// single-level wildcard subscription (`nodes/{mac}/inbound/#`) that this
/// topic layout is designed to match (§4.3.1).
fn corr_id_from_topic(topic: &str) -> Option<u16> {
    topic.rsplit('/').next()?.parse().ok()
}
