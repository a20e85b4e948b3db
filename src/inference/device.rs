//! Target devices and their operator coverage.
//!
//! Each device exposes a single capability query, `supports_operator`, used by
//! the adapter to validate a whole model graph before anything is compiled.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use super::error::ModelLoadError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
    Fpga,
    Myriad,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown device '{0}': expected one of CPU, GPU, FPGA, MYRIAD")]
pub struct DeviceParseError(pub String);

impl FromStr for Device {
    type Err = DeviceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CPU" => Ok(Self::Cpu),
            "GPU" => Ok(Self::Gpu),
            "FPGA" => Ok(Self::Fpga),
            "MYRIAD" => Ok(Self::Myriad),
            _ => Err(DeviceParseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "CPU"),
            Self::Gpu => write!(f, "GPU"),
            Self::Fpga => write!(f, "FPGA"),
            Self::Myriad => write!(f, "MYRIAD"),
        }
    }
}

/// Operator-level capability of one device.
pub trait DeviceBackend: Send {
    fn device(&self) -> Device;

    /// Returns true when the device can execute nodes of this operator type.
    fn supports_operator(&self, op_type: &str) -> bool;
}

const CPU_OPS: &[&str] = &[
    "Add", "ArgMax", "AveragePool", "BatchNormalization", "Cast", "Clip", "Concat",
    "Constant", "Conv", "ConvTranspose", "DepthToSpace", "DetectionOutput", "Div",
    "Dropout", "Elu", "Equal", "Exp", "Expand", "Flatten", "Gather", "Gemm",
    "GlobalAveragePool", "GlobalMaxPool", "Greater", "HardSigmoid", "Identity",
    "LeakyRelu", "Less", "Log", "LRN", "MatMul", "Max", "MaxPool", "Min", "Mul", "Neg",
    "NonMaxSuppression", "NonZero", "Not", "Pad", "Pow", "PRelu", "PriorBox",
    "PriorBoxClustered", "Range", "Reciprocal", "ReduceMax", "ReduceMean", "ReduceMin",
    "ReduceSum", "Relu", "Reshape", "Resize", "Shape", "Sigmoid", "Slice", "Softmax",
    "Split", "Sqrt", "Squeeze", "Sub", "Tanh", "Tile", "TopK", "Transpose", "Unsqueeze",
    "Upsample", "Where",
];

const GPU_OPS: &[&str] = &[
    "Add", "ArgMax", "AveragePool", "BatchNormalization", "Cast", "Clip", "Concat",
    "Constant", "Conv", "ConvTranspose", "DepthToSpace", "DetectionOutput", "Div",
    "Dropout", "Elu", "Exp", "Flatten", "Gather", "Gemm", "GlobalAveragePool",
    "GlobalMaxPool", "Identity", "LeakyRelu", "LRN", "MatMul", "Max", "MaxPool", "Min",
    "Mul", "Pad", "Pow", "PRelu", "PriorBox", "PriorBoxClustered", "ReduceMean",
    "ReduceSum", "Relu", "Reshape", "Resize", "Shape", "Sigmoid", "Slice", "Softmax",
    "Split", "Sqrt", "Squeeze", "Sub", "Tanh", "Transpose", "Unsqueeze", "Upsample",
];

const MYRIAD_OPS: &[&str] = &[
    "Add", "AveragePool", "BatchNormalization", "Clip", "Concat", "Constant", "Conv",
    "ConvTranspose", "DetectionOutput", "Dropout", "Elu", "Flatten", "Gemm",
    "GlobalAveragePool", "Identity", "LeakyRelu", "MatMul", "MaxPool", "Mul", "Pad",
    "PRelu", "PriorBox", "PriorBoxClustered", "Relu", "Reshape", "Sigmoid", "Softmax",
    "Squeeze", "Tanh", "Transpose", "Unsqueeze",
];

const FPGA_OPS: &[&str] = &[
    "Add", "AveragePool", "BatchNormalization", "Concat", "Constant", "Conv", "Flatten",
    "Gemm", "Identity", "MaxPool", "Relu", "Reshape", "Softmax",
];

/// CPU device, optionally extended with custom kernels.
#[derive(Debug, Default)]
pub struct CpuBackend {
    extension_ops: BTreeSet<String>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension(mut self, extension: &ExtensionManifest) -> Self {
        self.extension_ops
            .extend(extension.operators.iter().cloned());
        self
    }
}

impl DeviceBackend for CpuBackend {
    fn device(&self) -> Device {
        Device::Cpu
    }

    fn supports_operator(&self, op_type: &str) -> bool {
        CPU_OPS.contains(&op_type) || self.extension_ops.contains(op_type)
    }
}

/// Fixed-function accelerator with a static operator table.
#[derive(Debug)]
pub struct AcceleratorBackend {
    device: Device,
    operators: &'static [&'static str],
}

impl AcceleratorBackend {
    pub fn new(device: Device) -> Self {
        let operators = match device {
            Device::Gpu => GPU_OPS,
            Device::Myriad => MYRIAD_OPS,
            Device::Fpga => FPGA_OPS,
            Device::Cpu => CPU_OPS,
        };
        Self { device, operators }
    }
}

impl DeviceBackend for AcceleratorBackend {
    fn device(&self) -> Device {
        self.device
    }

    fn supports_operator(&self, op_type: &str) -> bool {
        self.operators.contains(&op_type)
    }
}

/// Custom-kernel extension descriptor.
///
/// JSON document of the form `{"name": "custom_layers", "operators": ["Foo"]}`.
#[derive(Clone, Debug, Deserialize)]
pub struct ExtensionManifest {
    pub name: String,
    pub operators: Vec<String>,
}

impl ExtensionManifest {
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ModelLoadError::Extension {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let manifest: Self = serde_json::from_str(&raw).map_err(|e| ModelLoadError::Extension {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if manifest.operators.iter().any(|op| op.trim().is_empty()) {
            return Err(ModelLoadError::Extension {
                path: path.to_path_buf(),
                reason: "operator names must not be empty".to_string(),
            });
        }
        Ok(manifest)
    }
}

/// Build the capability set for `device`.
///
/// Extensions only apply to the CPU device; for other devices they are ignored.
pub fn device_backend(
    device: Device,
    extension: Option<&Path>,
) -> Result<Box<dyn DeviceBackend>, ModelLoadError> {
    match (device, extension) {
        (Device::Cpu, Some(path)) => {
            let manifest = ExtensionManifest::load(path)?;
            log::info!(
                "loaded CPU extension '{}' ({} operators) from {}",
                manifest.name,
                manifest.operators.len(),
                path.display()
            );
            Ok(Box::new(CpuBackend::new().with_extension(&manifest)))
        }
        (Device::Cpu, None) => Ok(Box::new(CpuBackend::new())),
        (other, extension) => {
            if let Some(path) = extension {
                log::warn!(
                    "extension {} ignored: extensions only apply to CPU, target is {}",
                    path.display(),
                    other
                );
            }
            Ok(Box::new(AcceleratorBackend::new(other)))
        }
    }
}
