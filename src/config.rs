use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::counter::{CountReporting, CounterSettings};
use crate::inference::{Device, WaitPolicy};
use crate::preprocess::ChannelOrder;
use crate::sink::{MqttSettings, Topics};
use crate::transport::{parse_mqtt_endpoint, TlsMaterials};

pub const CONFIG_PATH_ENV: &str = "PEOPLE_COUNTER_CONFIG";

const DEFAULT_PROB_THRESHOLD: f32 = 0.5;
const DEFAULT_TARGET_CLASS: i32 = 1;
const DEFAULT_DEBOUNCE_SECS: f64 = 1.0;
const DEFAULT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_MAX_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BACKOFF: u32 = 2;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:3001";
const DEFAULT_CLIENT_ID: &str = "people_counter";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_VIDEO_OUTPUT: &str = "-";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CounterConfigFile {
    model: Option<String>,
    input: Option<String>,
    device: Option<String>,
    cpu_extension: Option<PathBuf>,
    channel_order: Option<String>,
    prob_threshold: Option<f32>,
    target_class: Option<i32>,
    fps: Option<f64>,
    max_consecutive_read_failures: Option<u32>,
    video_output: Option<String>,
    counter: Option<CounterFile>,
    inference: Option<InferenceFile>,
    mqtt: Option<MqttFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CounterFile {
    debounce_secs: Option<f64>,
    reporting: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InferenceFile {
    timeout_ms: Option<u64>,
    max_timeout_ms: Option<u64>,
    backoff: Option<u32>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MqttFile {
    enabled: Option<bool>,
    broker: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    topic_prefix: Option<String>,
    keep_alive_secs: Option<u64>,
    use_tls: Option<bool>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert: Option<PathBuf>,
    tls_client_key: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CounterConfig {
    /// Model path, or a `stub://` model.
    pub model: String,
    /// `CAM`, an image, a video file, or a `stub://` source.
    pub input: String,
    pub device: Device,
    pub cpu_extension: Option<PathBuf>,
    /// Plane order of the model input.
    pub channel_order: ChannelOrder,
    pub prob_threshold: f32,
    pub target_class: i32,
    /// Frame rate used when the source cannot report one.
    pub fallback_fps: Option<f64>,
    /// Consecutive read failures tolerated after the first frame; unlimited when unset.
    pub max_consecutive_read_failures: Option<u32>,
    /// `-` for stdout, `none` to disable, otherwise a file path.
    pub video_output: String,
    pub counter: CounterSettings,
    pub wait: WaitPolicy,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub keep_alive: Duration,
    pub use_tls: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert: Option<PathBuf>,
    pub tls_client_key: Option<PathBuf>,
}

/// Command-line values, applied after the file and environment layers.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub model: Option<String>,
    pub input: Option<String>,
    pub device: Option<String>,
    pub cpu_extension: Option<PathBuf>,
    pub channel_order: Option<String>,
    pub prob_threshold: Option<f32>,
    pub fps: Option<f64>,
    pub debounce_secs: Option<f64>,
    pub count_reporting: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub video_output: Option<String>,
    pub broker: Option<String>,
    pub client_id: Option<String>,
    pub topic_prefix: Option<String>,
    pub use_tls: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert: Option<PathBuf>,
    pub tls_client_key: Option<PathBuf>,
    pub no_mqtt: bool,
}

impl CounterConfig {
    /// Load from the JSON file (if any), then the environment, then `overrides`.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let config_path = overrides.config_path.clone().or_else(|| {
            std::env::var(CONFIG_PATH_ENV)
                .ok()
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from)
        });
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(path)?,
            None => CounterConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.apply_overrides(overrides)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CounterConfigFile) -> Result<Self> {
        let device = match file.device.as_deref() {
            Some(device) => device.parse()?,
            None => Device::default(),
        };
        let channel_order = match file.channel_order.as_deref() {
            Some(order) => order.parse()?,
            None => ChannelOrder::default(),
        };
        let counter = file.counter.unwrap_or_default();
        let reporting = match counter.reporting.as_deref() {
            Some(reporting) => reporting.parse()?,
            None => CountReporting::default(),
        };
        let inference = file.inference.unwrap_or_default();
        let mqtt = file.mqtt.unwrap_or_default();

        Ok(Self {
            model: file.model.unwrap_or_default(),
            input: file.input.unwrap_or_default(),
            device,
            cpu_extension: file.cpu_extension,
            channel_order,
            prob_threshold: file.prob_threshold.unwrap_or(DEFAULT_PROB_THRESHOLD),
            target_class: file.target_class.unwrap_or(DEFAULT_TARGET_CLASS),
            fallback_fps: file.fps,
            max_consecutive_read_failures: file.max_consecutive_read_failures,
            video_output: file
                .video_output
                .unwrap_or_else(|| DEFAULT_VIDEO_OUTPUT.to_string()),
            counter: CounterSettings {
                debounce_secs: counter.debounce_secs.unwrap_or(DEFAULT_DEBOUNCE_SECS),
                reporting,
            },
            wait: WaitPolicy {
                timeout: Duration::from_millis(inference.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
                max_timeout: Duration::from_millis(
                    inference.max_timeout_ms.unwrap_or(DEFAULT_MAX_TIMEOUT_MS),
                ),
                backoff: inference.backoff.unwrap_or(DEFAULT_BACKOFF),
                max_attempts: inference.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            },
            mqtt: MqttConfig {
                enabled: mqtt.enabled.unwrap_or(true),
                broker: mqtt
                    .broker
                    .unwrap_or_else(|| DEFAULT_BROKER_ADDR.to_string()),
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
                username: mqtt.username,
                password: mqtt.password,
                topic_prefix: mqtt.topic_prefix.unwrap_or_default(),
                keep_alive: Duration::from_secs(
                    mqtt.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
                ),
                use_tls: mqtt.use_tls.unwrap_or(false),
                tls_ca_path: mqtt.tls_ca_path,
                tls_client_cert: mqtt.tls_client_cert,
                tls_client_key: mqtt.tls_client_key,
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(model) = env_nonempty("PEOPLE_COUNTER_MODEL") {
            self.model = model;
        }
        if let Some(input) = env_nonempty("PEOPLE_COUNTER_INPUT") {
            self.input = input;
        }
        if let Some(device) = env_nonempty("PEOPLE_COUNTER_DEVICE") {
            self.device = device
                .parse()
                .context("PEOPLE_COUNTER_DEVICE is not a known device")?;
        }
        if let Some(path) = env_nonempty("PEOPLE_COUNTER_EXTENSION") {
            self.cpu_extension = Some(PathBuf::from(path));
        }
        if let Some(order) = env_nonempty("PEOPLE_COUNTER_CHANNEL_ORDER") {
            self.channel_order = order
                .parse()
                .context("PEOPLE_COUNTER_CHANNEL_ORDER is not a known channel order")?;
        }
        if let Some(threshold) = env_parse::<f32>("PEOPLE_COUNTER_PROB_THRESHOLD")? {
            self.prob_threshold = threshold;
        }
        if let Some(output) = env_nonempty("PEOPLE_COUNTER_VIDEO_OUTPUT") {
            self.video_output = output;
        }
        if let Some(broker) = env_nonempty("MQTT_BROKER_ADDR") {
            self.mqtt.broker = broker;
        }
        if let Some(client_id) = env_nonempty("MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        if let Some(username) = env_nonempty("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = env_nonempty("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(prefix) = env_nonempty("MQTT_TOPIC_PREFIX") {
            self.mqtt.topic_prefix = prefix;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, cli: &ConfigOverrides) -> Result<()> {
        if let Some(model) = &cli.model {
            self.model = model.clone();
        }
        if let Some(input) = &cli.input {
            self.input = input.clone();
        }
        if let Some(device) = &cli.device {
            self.device = device.parse()?;
        }
        if let Some(path) = &cli.cpu_extension {
            self.cpu_extension = Some(path.clone());
        }
        if let Some(order) = &cli.channel_order {
            self.channel_order = order.parse()?;
        }
        if let Some(threshold) = cli.prob_threshold {
            self.prob_threshold = threshold;
        }
        if let Some(fps) = cli.fps {
            self.fallback_fps = Some(fps);
        }
        if let Some(secs) = cli.debounce_secs {
            self.counter.debounce_secs = secs;
        }
        if let Some(reporting) = &cli.count_reporting {
            self.counter.reporting = reporting.parse()?;
        }
        if let Some(ms) = cli.timeout_ms {
            self.wait.timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = cli.max_attempts {
            self.wait.max_attempts = attempts;
        }
        if let Some(output) = &cli.video_output {
            self.video_output = output.clone();
        }
        if let Some(broker) = &cli.broker {
            self.mqtt.broker = broker.clone();
        }
        if let Some(client_id) = &cli.client_id {
            self.mqtt.client_id = client_id.clone();
        }
        if let Some(prefix) = &cli.topic_prefix {
            self.mqtt.topic_prefix = prefix.clone();
        }
        if cli.use_tls {
            self.mqtt.use_tls = true;
        }
        if let Some(path) = &cli.tls_ca_path {
            self.mqtt.tls_ca_path = Some(path.clone());
        }
        if let Some(path) = &cli.tls_client_cert {
            self.mqtt.tls_client_cert = Some(path.clone());
        }
        if let Some(path) = &cli.tls_client_key {
            self.mqtt.tls_client_key = Some(path.clone());
        }
        if cli.no_mqtt {
            self.mqtt.enabled = false;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.model = self.model.trim().to_string();
        self.input = self.input.trim().to_string();
        if self.model.is_empty() {
            return Err(anyhow!("a model path is required (-m/--model or PEOPLE_COUNTER_MODEL)"));
        }
        if self.input.is_empty() {
            return Err(anyhow!("an input is required (-i/--input or PEOPLE_COUNTER_INPUT)"));
        }
        if !(0.0..=1.0).contains(&self.prob_threshold) {
            return Err(anyhow!(
                "probability threshold must be within [0, 1], got {}",
                self.prob_threshold
            ));
        }
        if !(self.counter.debounce_secs.is_finite() && self.counter.debounce_secs > 0.0) {
            return Err(anyhow!("debounce window must be greater than zero"));
        }
        if self.wait.timeout.is_zero() {
            return Err(anyhow!("inference timeout must be greater than zero"));
        }
        if self.wait.max_attempts == 0 {
            return Err(anyhow!("inference wait attempts must be at least 1"));
        }
        self.wait.max_timeout = self.wait.max_timeout.max(self.wait.timeout);
        if let Some(fps) = self.fallback_fps {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(anyhow!("fallback fps must be greater than zero"));
            }
        }
        if self.max_consecutive_read_failures == Some(0) {
            return Err(anyhow!("max consecutive read failures must be at least 1"));
        }
        if self.mqtt.enabled {
            if self.mqtt.client_id.trim().is_empty() {
                return Err(anyhow!("MQTT client id must not be empty"));
            }
            parse_mqtt_endpoint(&self.mqtt.broker, self.mqtt.use_tls)?;
        }
        Ok(())
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.mqtt.topic_prefix)
    }

    /// Connection settings for the publisher, with TLS materials loaded.
    pub fn mqtt_settings(&self) -> Result<MqttSettings> {
        let endpoint = parse_mqtt_endpoint(&self.mqtt.broker, self.mqtt.use_tls)?;
        let tls = TlsMaterials::load(
            self.mqtt.tls_ca_path.as_deref(),
            self.mqtt.tls_client_cert.as_deref(),
            self.mqtt.tls_client_key.as_deref(),
        )?;
        Ok(MqttSettings {
            endpoint,
            tls,
            client_id: self.mqtt.client_id.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            keep_alive: self.mqtt.keep_alive,
        })
    }
}

fn read_config_file(path: &Path) -> Result<CounterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env_nonempty(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", name, value)),
        None => Ok(None),
    }
}
