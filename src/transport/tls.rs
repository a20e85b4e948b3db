//! Broker address parsing and rumqttc transport construction.
//!
//! Accepted broker forms:
//! - `host:port` (plain TCP unless TLS is forced)
//! - `mqtt://host:port`, `tcp://host:port` (plain TCP)
//! - `mqtts://host:port`, `ssl://host:port` (TLS)
//! - `[ipv6]:port`
//! - `host` alone uses `DEFAULT_MQTT_PORT`

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::Path;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// PEM materials for TLS broker connections.
///
/// Without a CA the system/webpki roots are used.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    pub ca: Option<Vec<u8>>,
    /// Client certificate and key for mutual TLS, always provided together.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&Path>,
        client_cert_path: Option<&Path>,
        client_key_path: Option<&Path>,
    ) -> Result<Self> {
        let ca = ca_path
            .map(|path| {
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))
            })
            .transpose()?;

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!("failed to read MQTT TLS client cert '{}'", cert_path.display())
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("failed to read MQTT TLS client key '{}'", key_path.display())
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(anyhow!("MQTT TLS client certificate provided without key"))
            }
            (None, Some(_)) => {
                return Err(anyhow!("MQTT TLS client key provided without certificate"))
            }
        };

        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    /// Build the rumqttc transport for this endpoint.
    ///
    /// TLS materials on a plain-TCP endpoint are rejected, as is a client
    /// certificate without a CA.
    pub fn transport(&self, materials: &TlsMaterials) -> Result<Transport> {
        if !self.use_tls {
            if materials.is_configured() {
                return Err(anyhow!(
                    "MQTT TLS materials provided but TLS is disabled; use --mqtt-use-tls or an mqtts:// broker"
                ));
            }
            return Ok(Transport::tcp());
        }
        if !materials.is_configured() {
            return Ok(Transport::tls_with_default_config());
        }
        let ca = materials.ca.clone().ok_or_else(|| {
            anyhow!("MQTT TLS CA certificate is required when providing client certificates")
        })?;
        Ok(Transport::tls(ca, materials.client_auth.clone(), None))
    }
}

pub fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr.trim();
    if remainder.is_empty() {
        return Err(anyhow!("MQTT broker address must not be empty"));
    }

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest.trim_end_matches('/');
    }

    let (host, port) = split_host_port(remainder)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => parse_port(port, addr)?,
            None if rest.is_empty() => DEFAULT_MQTT_PORT,
            None => return Err(anyhow!("invalid MQTT address: {}", addr)),
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), parse_port(port, addr)?)),
        None => Ok((addr.to_string(), DEFAULT_MQTT_PORT)),
    }
}

fn parse_port(port: &str, addr: &str) -> Result<u16> {
    port.parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))
}
