//! MQTT broker endpoint parsing and TLS transport selection.

mod tls;

pub use tls::{parse_mqtt_endpoint, MqttEndpoint, TlsMaterials, DEFAULT_MQTT_PORT};
