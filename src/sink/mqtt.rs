use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Outgoing;

use super::PublishSink;
use crate::transport::{MqttEndpoint, TlsMaterials};

const REQUEST_CAPACITY: usize = 10;
const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(250);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: MqttEndpoint,
    pub tls: TlsMaterials,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

/// Fire-and-forget MQTT publisher.
///
/// Messages go out at QoS 0 without retain. `publish` never blocks: when the
/// request queue is full or the client is gone it returns an error and the
/// message is dropped. A background thread drives the connection and keeps
/// reconnecting with backoff until the publisher is dropped.
pub struct MqttPublisher {
    client: Client,
    stopping: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttPublisher {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = &settings.endpoint;
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_transport(
            endpoint
                .transport(&settings.tls)
                .context("failed to build MQTT transport")?,
        );

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let stopping = Arc::new(AtomicBool::new(false));
        let handle = std::thread::Builder::new()
            .name("mqtt".to_string())
            .spawn({
                let stopping = Arc::clone(&stopping);
                move || drive_connection(connection, stopping)
            })
            .context("failed to spawn MQTT connection thread")?;

        log::info!(
            "MQTT publisher started for {}:{} (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            settings.username.is_some()
        );
        Ok(Self {
            client,
            stopping,
            connection_handle: Some(handle),
        })
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.connection_handle.take() else {
            return Ok(());
        };
        self.stopping.store(true, Ordering::SeqCst);
        let result = self.client.disconnect().context("MQTT disconnect failed");
        if handle.join().is_err() {
            log::warn!("MQTT connection thread panicked");
        }
        result
    }
}

impl PublishSink for MqttPublisher {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .with_context(|| format!("failed to queue MQTT publish to '{}'", topic))
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::debug!("{:#}", err);
        }
    }
}

fn drive_connection(mut connection: Connection, stopping: Arc<AtomicBool>) {
    let mut backoff = RECONNECT_BACKOFF_MIN;
    for event in connection.iter() {
        match event {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {
                backoff = RECONNECT_BACKOFF_MIN;
            }
            Err(err) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                log::warn!("MQTT connection error: {} (retrying in {:?})", err, backoff);
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
            }
        }
    }
    log::debug!("MQTT connection thread exiting");
}
