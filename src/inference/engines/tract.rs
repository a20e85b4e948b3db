#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::pb::tensor_shape_proto::dimension;
use tract_onnx::pb::type_proto;
use tract_onnx::prelude::*;

use crate::inference::device::Device;
use crate::inference::engine::{
    CompiledModel, GraphNode, InferenceEngine, InputShape, ModelGraph, OutputTensor,
};
use crate::preprocess::{ChannelOrder, InputTensor};

/// Tract-based engine for ONNX models.
///
/// Runs on the host CPU only. Dynamic input dimensions fall back to the
/// configured default size.
pub struct TractEngine {
    default_height: usize,
    default_width: usize,
    channel_order: ChannelOrder,
}

impl TractEngine {
    pub fn new(default_height: usize, default_width: usize) -> Self {
        Self {
            default_height,
            default_width,
            channel_order: ChannelOrder::Bgr,
        }
    }

    pub fn with_channel_order(mut self, order: ChannelOrder) -> Self {
        self.channel_order = order;
        self
    }

    fn input_shape(&self, graph: &tract_onnx::pb::GraphProto) -> (String, InputShape) {
        let initializers: Vec<&str> = graph.initializer.iter().map(|t| t.name.as_str()).collect();
        let input = graph
            .input
            .iter()
            .find(|i| !initializers.contains(&i.name.as_str()));

        let dims: Vec<Option<usize>> = input
            .and_then(|i| i.r#type.as_ref())
            .and_then(|t| t.value.as_ref())
            .and_then(|value| match value {
                type_proto::Value::TensorType(tensor) => tensor.shape.as_ref(),
                _ => None,
            })
            .map(|shape| {
                shape
                    .dim
                    .iter()
                    .map(|d| match d.value {
                        Some(dimension::Value::DimValue(v)) if v > 0 => Some(v as usize),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let dim = |idx: usize, fallback: usize| dims.get(idx).copied().flatten().unwrap_or(fallback);
        let name = input.map(|i| i.name.clone()).unwrap_or_default();
        (
            name,
            InputShape {
                batch: 1,
                channels: dim(1, 3),
                height: dim(2, self.default_height),
                width: dim(3, self.default_width),
            },
        )
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports_device(&self, device: Device) -> bool {
        device == Device::Cpu
    }

    fn read_model(&mut self, model_path: &Path) -> Result<ModelGraph> {
        let proto = tract_onnx::onnx()
            .proto_model_for_path(model_path)
            .with_context(|| format!("failed to read ONNX model {}", model_path.display()))?;
        let graph = proto
            .graph
            .as_ref()
            .ok_or_else(|| anyhow!("ONNX model {} has no graph", model_path.display()))?;

        let nodes = graph
            .node
            .iter()
            .enumerate()
            .map(|(idx, node)| GraphNode {
                name: if node.name.is_empty() {
                    format!("{}_{}", node.op_type, idx)
                } else {
                    node.name.clone()
                },
                op_type: node.op_type.clone(),
            })
            .collect();
        let (input_name, input_shape) = self.input_shape(graph);

        Ok(ModelGraph {
            nodes,
            input_name,
            input_shape,
            channel_order: self.channel_order,
        })
    }

    fn compile(
        &mut self,
        model_path: &Path,
        graph: &ModelGraph,
        _device: Device,
    ) -> Result<Box<dyn CompiledModel>> {
        let shape = graph.input_shape.as_array();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(shape[0], shape[1], shape[2], shape[3])))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        Ok(Box::new(TractModel { model, shape }))
    }
}

struct TractModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    shape: [usize; 4],
}

impl CompiledModel for TractModel {
    fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor> {
        if input.shape() != self.shape {
            return Err(anyhow!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                self.shape
            ));
        }
        let values = input
            .data
            .as_slice()
            .ok_or_else(|| anyhow!("input tensor is not contiguous"))?;
        let tensor = Tensor::from_shape(&self.shape, values).context("failed to build input tensor")?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(OutputTensor {
            shape: view.shape().to_vec(),
            data: view.iter().copied().collect(),
        })
    }
}
