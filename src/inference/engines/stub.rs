use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::inference::device::Device;
use crate::inference::engine::{
    CompiledModel, GraphNode, InferenceEngine, InputShape, ModelGraph, OutputTensor,
};
use crate::preprocess::{ChannelOrder, InputTensor};

/// Operators of a small SSD-style person detector.
const STUB_GRAPH: &[(&str, &str)] = &[
    ("conv1", "Conv"),
    ("relu1", "Relu"),
    ("pool1", "MaxPool"),
    ("conv2", "Conv"),
    ("relu2", "Relu"),
    ("concat", "Concat"),
    ("flatten", "Flatten"),
    ("softmax", "Softmax"),
];

const STUB_TARGET_CLASS: f32 = 1.0;

/// Scripted engine for tests and `stub://` models.
///
/// Call `n` reports `script[n % len]` confident target-class detections, plus
/// one low-score and one other-class decoy that a correct filter must ignore.
///
/// `stub://` URIs accept `script=0,1,1`, `latency_ms=N`, `size=N` and `fail=true`.
#[derive(Clone, Debug)]
pub struct StubEngine {
    script: Vec<u32>,
    latency: Duration,
    input_size: usize,
    extra_nodes: Vec<GraphNode>,
    channel_order: ChannelOrder,
    fail: bool,
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            script: Vec::new(),
            latency: Duration::ZERO,
            input_size: 32,
            extra_nodes: Vec::new(),
            channel_order: ChannelOrder::Bgr,
            fail: false,
        }
    }

    pub fn with_script(script: Vec<u32>) -> Self {
        Self {
            script,
            ..Self::new()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_channel_order(mut self, order: ChannelOrder) -> Self {
        self.channel_order = order;
        self
    }

    pub fn with_input_size(mut self, size: usize) -> Self {
        self.input_size = size;
        self
    }

    pub fn with_extra_operator(mut self, name: &str, op_type: &str) -> Self {
        self.extra_nodes.push(GraphNode {
            name: name.to_string(),
            op_type: op_type.to_string(),
        });
        self
    }

    /// Every inference call fails.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Build from a `stub://name?key=value&...` model URI.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("not a stub model uri: {}", uri))?;
        let mut engine = Self::new();
        let Some((_, query)) = rest.split_once('?') else {
            return Ok(engine);
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
            match key {
                "script" => {
                    engine.script = value
                        .split(',')
                        .filter(|v| !v.trim().is_empty())
                        .map(|v| v.trim().parse::<u32>())
                        .collect::<Result<_, _>>()
                        .with_context(|| format!("invalid stub script '{}'", value))?;
                }
                "latency_ms" => {
                    let ms: u64 = value
                        .parse()
                        .with_context(|| format!("invalid stub latency '{}'", value))?;
                    engine.latency = Duration::from_millis(ms);
                }
                "size" => {
                    engine.input_size = value
                        .parse()
                        .with_context(|| format!("invalid stub input size '{}'", value))?;
                }
                "fail" => engine.fail = value == "true",
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        Ok(engine)
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn read_model(&mut self, _model_path: &Path) -> Result<ModelGraph> {
        let mut nodes: Vec<GraphNode> = STUB_GRAPH
            .iter()
            .map(|(name, op_type)| GraphNode {
                name: name.to_string(),
                op_type: op_type.to_string(),
            })
            .collect();
        nodes.extend(self.extra_nodes.iter().cloned());
        Ok(ModelGraph {
            nodes,
            input_name: "image_tensor".to_string(),
            input_shape: InputShape {
                batch: 1,
                channels: 3,
                height: self.input_size,
                width: self.input_size,
            },
            channel_order: self.channel_order,
        })
    }

    fn compile(
        &mut self,
        _model_path: &Path,
        graph: &ModelGraph,
        _device: Device,
    ) -> Result<Box<dyn CompiledModel>> {
        Ok(Box::new(StubModel {
            script: self.script.clone(),
            latency: self.latency,
            expected_shape: graph.input_shape.as_array(),
            fail: self.fail,
            calls: 0,
        }))
    }
}

struct StubModel {
    script: Vec<u32>,
    latency: Duration,
    expected_shape: [usize; 4],
    fail: bool,
    calls: usize,
}

impl CompiledModel for StubModel {
    fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if input.shape() != self.expected_shape {
            return Err(anyhow!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                self.expected_shape
            ));
        }
        if self.fail {
            return Err(anyhow!("stub engine configured to fail"));
        }

        let people = if self.script.is_empty() {
            0
        } else {
            self.script[self.calls % self.script.len()]
        };
        self.calls += 1;

        let mut rows: Vec<[f32; 7]> = Vec::new();
        for i in 0..people {
            let x = (i % 4) as f32 * 0.25;
            let y = ((i / 4) % 4) as f32 * 0.25;
            rows.push([0.0, STUB_TARGET_CLASS, 0.9, x, y, x + 0.2, y + 0.2]);
        }
        rows.push([0.0, STUB_TARGET_CLASS, 0.3, 0.6, 0.6, 0.7, 0.7]);
        rows.push([0.0, 3.0, 0.95, 0.1, 0.6, 0.3, 0.9]);
        rows.push([-1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        Ok(OutputTensor {
            shape: vec![1, 1, rows.len(), 7],
            data: rows.into_iter().flatten().collect(),
        })
    }
}
