//! people_counter - count people in a video stream and publish occupancy over MQTT.
//!
//! Annotated frames go to stdout as raw rgb24 unless `--video-output` says
//! otherwise, so everything else (logs, stage progress) goes to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use people_counter::config::{ConfigOverrides, CounterConfig};
use people_counter::inference::{engine_for_model, InferenceAdapter, ModelLoadError};
use people_counter::ingest::open_source;
use people_counter::pipeline::{PipelineSettings, StreamOrchestrator};
use people_counter::sink::{open_video_sink, DisabledPublisher, MqttPublisher, PublishSink};
use people_counter::ui::{Ui, UiMode};

const EXIT_MODEL_LOAD: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Count people in a video stream and publish occupancy events over MQTT"
)]
struct Args {
    /// JSON configuration file (also PEOPLE_COUNTER_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the detection model, or a stub:// model.
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Image or video file, CAM for the default camera, or a stub:// source.
    #[arg(short = 'i', long)]
    input: Option<String>,

    /// JSON manifest of custom CPU kernels.
    #[arg(short = 'l', long = "cpu-extension")]
    cpu_extension: Option<PathBuf>,

    /// Plane order the model expects: rgb or bgr.
    #[arg(long)]
    channel_order: Option<String>,

    /// Target device: CPU, GPU, FPGA or MYRIAD.
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// Minimum detection confidence (exclusive).
    #[arg(short = 'p', long = "prob-threshold")]
    prob_threshold: Option<f32>,

    /// Frame rate to assume when the input does not report one.
    #[arg(long)]
    fps: Option<f64>,

    /// Seconds a count change must persist before it is confirmed.
    #[arg(long)]
    debounce_secs: Option<f64>,

    /// Count reported while a change is pending: confirmed or raw.
    #[arg(long)]
    count_reporting: Option<String>,

    /// First inference wait, in milliseconds.
    #[arg(long)]
    inference_timeout_ms: Option<u64>,

    /// Inference waits before giving up on a frame.
    #[arg(long)]
    inference_attempts: Option<u32>,

    /// Annotated video output: "-" for stdout, "none", or a file path.
    #[arg(long)]
    video_output: Option<String>,

    /// MQTT broker address.
    #[arg(long)]
    mqtt_broker_addr: Option<String>,

    /// MQTT client identifier.
    #[arg(long)]
    mqtt_client_id: Option<String>,

    /// Prefix for the person topics.
    #[arg(long)]
    mqtt_topic_prefix: Option<String>,

    /// Enable TLS for MQTT (implied by mqtts:// brokers).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// Path to a PEM-encoded CA certificate to trust for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    /// Path to a PEM-encoded client certificate for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    mqtt_tls_client_cert_path: Option<PathBuf>,

    /// Path to a PEM-encoded client private key for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    mqtt_tls_client_key_path: Option<PathBuf>,

    /// Do not publish events.
    #[arg(long)]
    no_mqtt: bool,

    /// Stage output: auto, plain or pretty.
    #[arg(long, default_value = "auto")]
    ui: UiMode,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            model: self.model.clone(),
            input: self.input.clone(),
            device: self.device.clone(),
            cpu_extension: self.cpu_extension.clone(),
            channel_order: self.channel_order.clone(),
            prob_threshold: self.prob_threshold,
            fps: self.fps,
            debounce_secs: self.debounce_secs,
            count_reporting: self.count_reporting.clone(),
            timeout_ms: self.inference_timeout_ms,
            max_attempts: self.inference_attempts,
            video_output: self.video_output.clone(),
            broker: self.mqtt_broker_addr.clone(),
            client_id: self.mqtt_client_id.clone(),
            topic_prefix: self.mqtt_topic_prefix.clone(),
            use_tls: self.mqtt_use_tls,
            tls_ca_path: self.mqtt_tls_ca_path.clone(),
            tls_client_cert: self.mqtt_tls_client_cert_path.clone(),
            tls_client_key: self.mqtt_tls_client_key_path.clone(),
            no_mqtt: self.no_mqtt,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());

    match run(&args, &ui) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(load_err) = err.downcast_ref::<ModelLoadError>() {
                log::error!("model load failed: {}", load_err);
                return ExitCode::from(EXIT_MODEL_LOAD);
            }
            log::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, ui: &Ui) -> Result<()> {
    let stage = ui.stage("Loading configuration");
    let config = CounterConfig::load(&args.overrides())?;
    stage.done();

    let stage = ui.stage("Loading model");
    let engine = engine_for_model(&config.model, config.channel_order)?;
    let adapter = InferenceAdapter::load(
        engine,
        Path::new(&config.model),
        config.device,
        config.cpu_extension.as_deref(),
    )?;
    stage.done();
    let shape = adapter.input_shape();
    log::info!(
        "model {} ready on {} (input {}x{})",
        config.model,
        config.device,
        shape.width,
        shape.height
    );

    let stage = ui.stage("Opening input");
    let source = open_source(&config.input)
        .with_context(|| format!("failed to open input {}", config.input))?;
    stage.done();

    let publisher: Box<dyn PublishSink> = if config.mqtt.enabled {
        let stage = ui.stage("Connecting to MQTT broker");
        let publisher = MqttPublisher::connect(&config.mqtt_settings()?)?;
        stage.done();
        Box::new(publisher)
    } else {
        log::info!("MQTT publishing disabled");
        Box::new(DisabledPublisher)
    };
    let video = open_video_sink(&config.video_output)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let mut orchestrator = StreamOrchestrator::new(
        source,
        adapter,
        publisher,
        video,
        PipelineSettings::from(&config),
    );
    let summary = orchestrator.run(&cancel)?;
    log::info!(
        "processed {} frames ({} unreadable), {} people counted",
        summary.frames_processed,
        summary.read_failures,
        summary.total_count
    );
    Ok(())
}
