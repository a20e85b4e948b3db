//! People counter
//!
//! Runs a person detector over a video stream and turns per-frame detections
//! into debounced occupancy events.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (synthetic, still images, video files, V4L2 cameras)
//! - `preprocess`: frame to NCHW input tensor
//! - `inference`: model loading with operator validation, single-slot async inference
//! - `counter`: debounced occupancy state machine and its events
//! - `annotate`: bounding boxes drawn onto outbound frames
//! - `sink`: MQTT event publishing and raw video output
//! - `transport`: MQTT endpoint parsing and TLS
//! - `pipeline`: the per-stream frame loop
//! - `config`: layered configuration (file, environment, command line)

pub mod annotate;
pub mod config;
pub mod counter;
pub mod frame;
pub mod inference;
pub mod ingest;
pub mod pipeline;
pub mod preprocess;
pub mod sink;
pub mod transport;
pub mod ui;

pub use counter::{CountReporting, CountState, CounterSettings, Event, OccupancyCounter};
pub use frame::{BoundingBox, Detection, Frame, FrameResult};
pub use inference::{BusyError, Device, InferenceAdapter, InferenceError, ModelLoadError, WaitPolicy};
pub use ingest::{FrameSource, ReadError};
pub use pipeline::{ExitReason, PipelineSettings, RunSummary, StreamOrchestrator};
