use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::device::Device;

/// A graph node the target device cannot execute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsupportedOperator {
    pub node: String,
    pub op_type: String,
}

impl std::fmt::Display for UnsupportedOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.node, self.op_type)
    }
}

/// Startup failure while loading a model onto a device.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error(
        "{} operator(s) not supported on {device}: {}",
        .unsupported_ops.len(),
        .unsupported_ops.iter().map(|op| op.to_string()).collect::<Vec<_>>().join(", ")
    )]
    UnsupportedOps {
        device: Device,
        unsupported_ops: Vec<UnsupportedOperator>,
    },

    #[error("engine '{engine}' cannot target device {device}")]
    UnsupportedDevice { engine: &'static str, device: Device },

    #[error("invalid extension {}: {reason}", .path.display())]
    Extension { path: PathBuf, reason: String },

    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

impl ModelLoadError {
    /// Node names that failed the operator-coverage check.
    pub fn unsupported_names(&self) -> Vec<&str> {
        match self {
            Self::UnsupportedOps {
                unsupported_ops, ..
            } => unsupported_ops.iter().map(|op| op.node.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

/// `submit` was called while a previous request was still unresolved.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("an inference request is already in flight")]
pub struct BusyError;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Busy(#[from] BusyError),

    #[error("no inference request has been submitted")]
    NoRequest,

    #[error("inference result is not ready")]
    NotReady,

    #[error("inference worker stopped")]
    WorkerGone,

    #[error("inference did not complete after {attempts} waits ({waited:?} total)")]
    TimedOut { attempts: u32, waited: Duration },

    #[error("malformed detection output: {0}")]
    Decode(String),

    #[error(transparent)]
    Backend(anyhow::Error),
}
