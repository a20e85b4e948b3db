use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use people_counter::config::{ConfigOverrides, CounterConfig};
use people_counter::preprocess::ChannelOrder;
use people_counter::{CountReporting, Device};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PEOPLE_COUNTER_CONFIG",
        "PEOPLE_COUNTER_MODEL",
        "PEOPLE_COUNTER_INPUT",
        "PEOPLE_COUNTER_DEVICE",
        "PEOPLE_COUNTER_EXTENSION",
        "PEOPLE_COUNTER_CHANNEL_ORDER",
        "PEOPLE_COUNTER_PROB_THRESHOLD",
        "PEOPLE_COUNTER_VIDEO_OUTPUT",
        "MQTT_BROKER_ADDR",
        "MQTT_CLIENT_ID",
        "MQTT_USERNAME",
        "MQTT_PASSWORD",
        "MQTT_TOPIC_PREFIX",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

fn minimal() -> ConfigOverrides {
    ConfigOverrides {
        model: Some("stub://people".to_string()),
        input: Some("stub://lobby".to_string()),
        ..ConfigOverrides::default()
    }
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CounterConfig::load(&minimal()).expect("load config");

    assert_eq!(cfg.device, Device::Cpu);
    assert_eq!(cfg.channel_order, ChannelOrder::Bgr);
    assert_eq!(cfg.prob_threshold, 0.5);
    assert_eq!(cfg.target_class, 1);
    assert_eq!(cfg.counter.debounce_secs, 1.0);
    assert_eq!(cfg.counter.reporting, CountReporting::Confirmed);
    assert_eq!(cfg.wait.timeout, Duration::from_millis(2_000));
    assert_eq!(cfg.wait.max_timeout, Duration::from_millis(10_000));
    assert_eq!(cfg.wait.backoff, 2);
    assert_eq!(cfg.wait.max_attempts, 5);
    assert_eq!(cfg.max_consecutive_read_failures, None);
    assert_eq!(cfg.fallback_fps, None);
    assert_eq!(cfg.video_output, "-");
    assert!(cfg.mqtt.enabled);
    assert_eq!(cfg.mqtt.broker, "127.0.0.1:3001");
    assert_eq!(cfg.mqtt.client_id, "people_counter");
    assert_eq!(cfg.mqtt.keep_alive, Duration::from_secs(60));
    assert_eq!(cfg.topics().count, "person");
    assert_eq!(cfg.topics().duration, "person/duration");

    clear_env();
}

#[test]
fn file_then_env_then_flags() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "model": "/models/file.onnx",
            "input": "/videos/file.mp4",
            "device": "gpu",
            "prob_threshold": 0.4,
            "fps": 12.5,
            "channel_order": "rgb",
            "max_consecutive_read_failures": 10,
            "counter": { "debounce_secs": 2.0, "reporting": "raw" },
            "inference": { "timeout_ms": 500, "max_attempts": 3 },
            "mqtt": { "broker": "mqtt://broker.local:1883", "topic_prefix": "site" }
        }"#,
    );

    std::env::set_var("PEOPLE_COUNTER_CONFIG", file.path());
    std::env::set_var("PEOPLE_COUNTER_INPUT", "stub://env");
    std::env::set_var("PEOPLE_COUNTER_PROB_THRESHOLD", "0.7");
    std::env::set_var("MQTT_CLIENT_ID", "lobby_counter");

    let overrides = ConfigOverrides {
        model: Some("stub://cli".to_string()),
        device: Some("MYRIAD".to_string()),
        ..ConfigOverrides::default()
    };
    let cfg = CounterConfig::load(&overrides).expect("load config");

    assert_eq!(cfg.model, "stub://cli");
    assert_eq!(cfg.input, "stub://env");
    assert_eq!(cfg.device, Device::Myriad);
    assert_eq!(cfg.prob_threshold, 0.7);
    assert_eq!(cfg.fallback_fps, Some(12.5));
    assert_eq!(cfg.channel_order, ChannelOrder::Rgb);
    assert_eq!(cfg.max_consecutive_read_failures, Some(10));
    assert_eq!(cfg.counter.debounce_secs, 2.0);
    assert_eq!(cfg.counter.reporting, CountReporting::Raw);
    assert_eq!(cfg.wait.timeout, Duration::from_millis(500));
    assert_eq!(cfg.wait.max_attempts, 3);
    assert_eq!(cfg.mqtt.broker, "mqtt://broker.local:1883");
    assert_eq!(cfg.mqtt.client_id, "lobby_counter");
    assert_eq!(cfg.topics().count, "site/person");

    clear_env();
}

#[test]
fn missing_model_or_input_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = CounterConfig::load(&ConfigOverrides::default()).unwrap_err();
    assert!(err.to_string().contains("model"));

    let only_model = ConfigOverrides {
        model: Some("stub://people".to_string()),
        ..ConfigOverrides::default()
    };
    let err = CounterConfig::load(&only_model).unwrap_err();
    assert!(err.to_string().contains("input"));

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let threshold = ConfigOverrides {
        prob_threshold: Some(1.5),
        ..minimal()
    };
    assert!(CounterConfig::load(&threshold).is_err());

    let device = ConfigOverrides {
        device: Some("TPU".to_string()),
        ..minimal()
    };
    assert!(CounterConfig::load(&device).is_err());

    let attempts = ConfigOverrides {
        max_attempts: Some(0),
        ..minimal()
    };
    assert!(CounterConfig::load(&attempts).is_err());

    let timeout = ConfigOverrides {
        timeout_ms: Some(0),
        ..minimal()
    };
    assert!(CounterConfig::load(&timeout).is_err());

    let debounce = ConfigOverrides {
        debounce_secs: Some(0.0),
        ..minimal()
    };
    assert!(CounterConfig::load(&debounce).is_err());

    let order = ConfigOverrides {
        channel_order: Some("yuv".to_string()),
        ..minimal()
    };
    assert!(CounterConfig::load(&order).is_err());

    let no_read_failures = write_config(r#"{ "max_consecutive_read_failures": 0 }"#);
    let with_file = ConfigOverrides {
        config_path: Some(no_read_failures.path().to_path_buf()),
        ..minimal()
    };
    assert!(CounterConfig::load(&with_file).is_err());

    std::env::set_var("PEOPLE_COUNTER_PROB_THRESHOLD", "high");
    assert!(CounterConfig::load(&minimal()).is_err());

    clear_env();
}

#[test]
fn broker_is_only_validated_when_publishing() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MQTT_BROKER_ADDR", "ws://broker:3001");
    assert!(CounterConfig::load(&minimal()).is_err());

    let disabled = ConfigOverrides {
        no_mqtt: true,
        ..minimal()
    };
    let cfg = CounterConfig::load(&disabled).expect("load config");
    assert!(!cfg.mqtt.enabled);

    clear_env();
}

#[test]
fn unknown_file_keys_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "model": "stub://people", "modle": "typo" }"#);
    let overrides = ConfigOverrides {
        config_path: Some(file.path().to_path_buf()),
        ..minimal()
    };
    let err = CounterConfig::load(&overrides).unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
