use std::path::Path;

use anyhow::Result;

use super::device::Device;
use crate::preprocess::{ChannelOrder, InputTensor};

/// NCHW input dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputShape {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl InputShape {
    pub fn as_array(&self) -> [usize; 4] {
        [self.batch, self.channels, self.height, self.width]
    }
}

/// One node of a model graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphNode {
    pub name: String,
    pub op_type: String,
}

/// Structural description of a model, read before compilation.
#[derive(Clone, Debug)]
pub struct ModelGraph {
    pub nodes: Vec<GraphNode>,
    pub input_name: String,
    pub input_shape: InputShape,
    pub channel_order: ChannelOrder,
}

/// Raw output tensor, row-major.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Opaque model execution backend.
///
/// Engines only need a synchronous `infer`; `InferenceAdapter` runs it on a
/// worker thread and exposes the submit/wait/fetch protocol on top.
pub trait InferenceEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Read the model graph without compiling it.
    fn read_model(&mut self, model_path: &Path) -> Result<ModelGraph>;

    /// Returns true when the engine can execute on `device` at all.
    fn supports_device(&self, _device: Device) -> bool {
        true
    }

    /// Compile a validated graph for `device`.
    fn compile(
        &mut self,
        model_path: &Path,
        graph: &ModelGraph,
        device: Device,
    ) -> Result<Box<dyn CompiledModel>>;
}

/// A model ready to execute. Owned by the adapter's worker thread.
pub trait CompiledModel: Send {
    fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor>;
}
