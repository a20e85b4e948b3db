//! Stream orchestration.
//!
//! One thread of control per stream. Each frame is read, preprocessed and
//! inferred to completion before the next one is read:
//!
//! read → preprocess → submit/wait/fetch → count → annotate → video sink → publish
//!
//! Cancellation is checked once per frame boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::annotate::annotate;
use crate::config::CounterConfig;
use crate::counter::{count_qualifying, CounterSettings, OccupancyCounter};
use crate::inference::{InferenceAdapter, WaitPolicy};
use crate::ingest::{FrameSource, ReadError};
use crate::preprocess::preprocess;
use crate::sink::{publish_event, PublishSink, Topics, VideoSink};

/// Frame rate assumed when neither the source nor the configuration has one.
pub const DEFAULT_FPS: f64 = 30.0;

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);
const PUBLISH_WARN_EVERY: u64 = 100;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub target_class: i32,
    pub prob_threshold: f32,
    pub counter: CounterSettings,
    pub wait: WaitPolicy,
    pub fallback_fps: Option<f64>,
    /// `None` skips unreadable frames indefinitely once the stream has started.
    pub max_consecutive_read_failures: Option<u32>,
    pub topics: Topics,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            target_class: 1,
            prob_threshold: 0.5,
            counter: CounterSettings::default(),
            wait: WaitPolicy::default(),
            fallback_fps: None,
            max_consecutive_read_failures: None,
            topics: Topics::default(),
        }
    }
}

impl From<&CounterConfig> for PipelineSettings {
    fn from(config: &CounterConfig) -> Self {
        Self {
            target_class: config.target_class,
            prob_threshold: config.prob_threshold,
            counter: config.counter,
            wait: config.wait,
            fallback_fps: config.fallback_fps,
            max_consecutive_read_failures: config.max_consecutive_read_failures,
            topics: config.topics(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    EndOfStream,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_processed: u64,
    pub read_failures: u64,
    pub publish_failures: u64,
    pub total_count: u32,
    pub exit: ExitReason,
}

/// Pick the frame rate that sizes the debounce window.
pub fn effective_fps(source_fps: Option<f64>, fallback: Option<f64>) -> f64 {
    let usable = |fps: &f64| fps.is_finite() && *fps > 0.0;
    source_fps
        .filter(usable)
        .or(fallback.filter(usable))
        .unwrap_or(DEFAULT_FPS)
}

/// Owns every resource of one stream; all of them are released on drop.
pub struct StreamOrchestrator {
    source: Box<dyn FrameSource>,
    adapter: InferenceAdapter,
    publisher: Box<dyn PublishSink>,
    video: Box<dyn VideoSink>,
    settings: PipelineSettings,
}

impl StreamOrchestrator {
    pub fn new(
        source: Box<dyn FrameSource>,
        adapter: InferenceAdapter,
        publisher: Box<dyn PublishSink>,
        video: Box<dyn VideoSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            adapter,
            publisher,
            video,
            settings,
        }
    }

    /// Process frames until the source ends, `cancel` is set, or a fatal error.
    pub fn run(&mut self, cancel: &AtomicBool) -> Result<RunSummary> {
        let fps = effective_fps(self.source.fps(), self.settings.fallback_fps);
        let mut counter = OccupancyCounter::new(fps, self.settings.counter);
        let shape = self.adapter.input_shape();
        let channel_order = self.adapter.channel_order();
        log::info!(
            "stream started: source={} fps={:.2} debounce_frames={} engine={} device={}",
            self.source.describe(),
            fps,
            counter.state().debounce_threshold,
            self.adapter.engine_name(),
            self.adapter.device()
        );

        let mut frames_processed: u64 = 0;
        let mut read_failures: u64 = 0;
        let mut consecutive_failures: u32 = 0;
        let mut publish_failures: u64 = 0;
        let mut last_health = Instant::now();

        let exit = loop {
            if cancel.load(Ordering::SeqCst) {
                log::info!("cancellation requested, stopping stream");
                break ExitReason::Cancelled;
            }

            let mut frame = match self.source.next_frame() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    frame
                }
                Err(ReadError::EndOfStream) => {
                    log::info!("end of stream from {}", self.source.describe());
                    break ExitReason::EndOfStream;
                }
                Err(ReadError::Decode(err)) => {
                    read_failures += 1;
                    consecutive_failures += 1;
                    if frames_processed == 0 {
                        return Err(err.context(format!(
                            "failed to read the first frame from {}",
                            self.source.describe()
                        )));
                    }
                    if self
                        .settings
                        .max_consecutive_read_failures
                        .is_some_and(|limit| consecutive_failures >= limit)
                    {
                        return Err(err.context(format!(
                            "{} consecutive frame read failures from {}",
                            consecutive_failures,
                            self.source.describe()
                        )));
                    }
                    log::warn!("skipping unreadable frame: {:#}", err);
                    continue;
                }
            };

            let tensor = preprocess(&frame, shape.height, shape.width, channel_order)
                .with_context(|| format!("failed to preprocess frame {}", frame.index))?;
            let result = self
                .adapter
                .infer(tensor, &self.settings.wait)
                .with_context(|| format!("inference failed on frame {}", frame.index))?;

            let current = count_qualifying(
                &result,
                self.settings.target_class,
                self.settings.prob_threshold,
            );
            let events = counter.update(current);
            log::trace!("frame {}: raw count {} -> {:?}", frame.index, current, events);

            annotate(
                &mut frame,
                result.qualifying(self.settings.target_class, self.settings.prob_threshold),
            );
            self.video
                .write_frame(&frame)
                .context("video sink rejected frame")?;

            for event in &events {
                if let Err(err) = publish_event(self.publisher.as_mut(), &self.settings.topics, event) {
                    publish_failures += 1;
                    if publish_failures % PUBLISH_WARN_EVERY == 1 {
                        log::warn!("publish failed ({} so far): {:#}", publish_failures, err);
                    } else {
                        log::debug!("publish failed: {:#}", err);
                    }
                }
            }

            frames_processed += 1;
            if last_health.elapsed() >= HEALTH_INTERVAL {
                let state = counter.state();
                let stats = self.source.stats();
                log::info!(
                    "health: frames={} count={} total={} read_failures={} publish_failures={} captured={}",
                    frames_processed,
                    state.previous_count,
                    state.total_count,
                    read_failures,
                    publish_failures,
                    stats.frames_captured
                );
                last_health = Instant::now();
            }
        };

        let summary = RunSummary {
            frames_processed,
            read_failures,
            publish_failures,
            total_count: counter.state().total_count,
            exit,
        };
        log::info!(
            "stream finished ({:?}): {} frames, {} people in total",
            summary.exit,
            summary.frames_processed,
            summary.total_count
        );
        Ok(summary)
    }
}
