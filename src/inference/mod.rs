//! Inference adapter over an opaque model-execution engine.
//!
//! - `InferenceEngine` / `CompiledModel`: the backend contract (read, compile, run).
//! - `DeviceBackend`: per-device operator coverage, checked for every graph node at load.
//! - `InferenceAdapter`: single-slot submit / wait / fetch protocol on a worker thread.
//!
//! Engines:
//! - `stub://` models run on `StubEngine` (tests, demos)
//! - `.onnx` models run on `TractEngine` (feature: backend-tract)

mod adapter;
mod decode;
mod device;
mod engine;
pub mod engines;
mod error;

use std::path::Path;

use anyhow::Result;

use crate::preprocess::ChannelOrder;

pub use adapter::{InferenceAdapter, WaitPolicy, WaitStatus};
pub use decode::decode_ssd_output;
pub use device::{
    device_backend, AcceleratorBackend, CpuBackend, Device, DeviceBackend,
    DeviceParseError, ExtensionManifest,
};
pub use engine::{CompiledModel, GraphNode, InferenceEngine, InputShape, ModelGraph, OutputTensor};
pub use engines::StubEngine;
pub use error::{BusyError, InferenceError, ModelLoadError, UnsupportedOperator};

/// Default input size for engines whose model leaves spatial dimensions dynamic.
pub const DEFAULT_INPUT_SIZE: usize = 300;

/// Pick an engine for a model path.
pub fn engine_for_model(
    model: &str,
    channel_order: ChannelOrder,
) -> Result<Box<dyn InferenceEngine>> {
    if model.starts_with("stub://") {
        return Ok(Box::new(
            StubEngine::from_uri(model)?.with_channel_order(channel_order),
        ));
    }
    let is_onnx = Path::new(model)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
    if !is_onnx {
        anyhow::bail!("unsupported model format '{}': expected an .onnx file", model);
    }
    #[cfg(feature = "backend-tract")]
    {
        Ok(Box::new(
            engines::TractEngine::new(DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE)
                .with_channel_order(channel_order),
        ))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        anyhow::bail!("ONNX models require the backend-tract feature")
    }
}
