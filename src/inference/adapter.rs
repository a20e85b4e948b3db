use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::anyhow;

use super::decode::decode_ssd_output;
use super::device::{device_backend, Device};
use super::engine::{InferenceEngine, InputShape, ModelGraph, OutputTensor};
use super::error::{BusyError, InferenceError, ModelLoadError, UnsupportedOperator};
use crate::frame::FrameResult;
use crate::preprocess::{ChannelOrder, InputTensor};

/// Outcome of `InferenceAdapter::wait`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    Ready,
    Timeout,
}

/// Bounded retry policy for waiting on a request.
///
/// Wait `n` uses `timeout * backoff^n`, capped at `max_timeout`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub max_timeout: Duration,
    pub backoff: u32,
    pub max_attempts: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2_000),
            max_timeout: Duration::from_millis(10_000),
            backoff: 2,
            max_attempts: 5,
        }
    }
}

impl WaitPolicy {
    /// Successive wait durations.
    pub fn timeouts(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut next = self.timeout;
        (0..self.max_attempts).map(move |_| {
            let current = next.min(self.max_timeout);
            next = next.saturating_mul(self.backoff.max(1));
            current
        })
    }
}

struct Request {
    input: InputTensor,
}

enum Slot {
    Idle,
    InFlight { width: u32, height: u32 },
    Completed {
        output: anyhow::Result<OutputTensor>,
        width: u32,
        height: u32,
    },
}

/// Single-slot asynchronous front end over an `InferenceEngine`.
///
/// At most one request is in flight. The caller drives it with
/// `submit` → `wait` (until `Ready`) → `fetch_output`.
pub struct InferenceAdapter {
    engine_name: &'static str,
    device: Device,
    graph: ModelGraph,
    requests: Option<Sender<Request>>,
    responses: Receiver<anyhow::Result<OutputTensor>>,
    worker: Option<JoinHandle<()>>,
    slot: Slot,
}

impl InferenceAdapter {
    /// Read the model, validate every node against `device`, then compile it.
    ///
    /// Fails before compilation if any operator is unsupported, listing all of them.
    pub fn load(
        mut engine: Box<dyn InferenceEngine>,
        model_path: &Path,
        device: Device,
        extension: Option<&Path>,
    ) -> Result<Self, ModelLoadError> {
        let is_stub = model_path
            .to_str()
            .is_some_and(|p| p.starts_with("stub://"));
        if !is_stub && !model_path.exists() {
            return Err(ModelLoadError::ModelNotFound(model_path.to_path_buf()));
        }
        if !engine.supports_device(device) {
            return Err(ModelLoadError::UnsupportedDevice {
                engine: engine.name(),
                device,
            });
        }

        let capability = device_backend(device, extension)?;
        let graph = engine.read_model(model_path)?;

        let unsupported: Vec<UnsupportedOperator> = graph
            .nodes
            .iter()
            .filter(|node| !capability.supports_operator(&node.op_type))
            .map(|node| UnsupportedOperator {
                node: node.name.clone(),
                op_type: node.op_type.clone(),
            })
            .collect();
        if !unsupported.is_empty() {
            for op in &unsupported {
                log::error!("{} layer not supported on {}", op, device);
            }
            return Err(ModelLoadError::UnsupportedOps {
                device,
                unsupported_ops: unsupported,
            });
        }

        let mut model = engine.compile(model_path, &graph, device)?;
        log::info!(
            "model {} loaded on {} via {} ({} nodes, input {} {:?})",
            model_path.display(),
            device,
            engine.name(),
            graph.nodes.len(),
            graph.input_name,
            graph.input_shape.as_array()
        );

        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (response_tx, response_rx) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || {
                for request in request_rx {
                    let result = model.infer(&request.input);
                    if response_tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| anyhow!("failed to spawn inference worker: {}", e))?;

        Ok(Self {
            engine_name: engine.name(),
            device,
            graph,
            requests: Some(request_tx),
            responses: response_rx,
            worker: Some(worker),
            slot: Slot::Idle,
        })
    }

    pub fn input_shape(&self) -> InputShape {
        self.graph.input_shape
    }

    pub fn channel_order(&self) -> ChannelOrder {
        self.graph.channel_order
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine_name
    }

    /// True while a submitted request has not been fetched.
    pub fn is_busy(&self) -> bool {
        !matches!(self.slot, Slot::Idle)
    }

    /// Begin one inference request.
    pub fn submit(&mut self, input: InputTensor) -> Result<(), BusyError> {
        if self.is_busy() {
            return Err(BusyError);
        }
        let (width, height) = (input.source_width, input.source_height);
        let sent = self
            .requests
            .as_ref()
            .map(|tx| tx.send(Request { input }).is_ok())
            .unwrap_or(false);
        self.slot = if sent {
            Slot::InFlight { width, height }
        } else {
            // surfaced by the following fetch_output
            Slot::Completed {
                output: Err(anyhow!("inference worker is not running")),
                width,
                height,
            }
        };
        Ok(())
    }

    /// Block until the in-flight request completes or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> Result<WaitStatus, InferenceError> {
        let (width, height) = match self.slot {
            Slot::Idle => return Err(InferenceError::NoRequest),
            Slot::Completed { .. } => return Ok(WaitStatus::Ready),
            Slot::InFlight { width, height } => (width, height),
        };
        match self.responses.recv_timeout(timeout) {
            Ok(output) => {
                self.slot = Slot::Completed {
                    output,
                    width,
                    height,
                };
                Ok(WaitStatus::Ready)
            }
            Err(RecvTimeoutError::Timeout) => Ok(WaitStatus::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                self.slot = Slot::Idle;
                Err(InferenceError::WorkerGone)
            }
        }
    }

    /// Take the completed result, decoded into detections. Frees the slot.
    pub fn fetch_output(&mut self) -> Result<FrameResult, InferenceError> {
        match std::mem::replace(&mut self.slot, Slot::Idle) {
            Slot::Completed {
                output,
                width,
                height,
            } => {
                let output = output.map_err(InferenceError::Backend)?;
                Ok(FrameResult {
                    detections: decode_ssd_output(&output)?,
                    width,
                    height,
                })
            }
            other => {
                self.slot = other;
                Err(InferenceError::NotReady)
            }
        }
    }

    /// Submit, wait under `policy`, and fetch.
    pub fn infer(
        &mut self,
        input: InputTensor,
        policy: &WaitPolicy,
    ) -> Result<FrameResult, InferenceError> {
        self.submit(input)?;
        let mut waited = Duration::ZERO;
        let mut attempts = 0;
        for timeout in policy.timeouts() {
            attempts += 1;
            match self.wait(timeout)? {
                WaitStatus::Ready => return self.fetch_output(),
                WaitStatus::Timeout => {
                    waited += timeout;
                    log::warn!(
                        "inference wait timed out after {:?} (attempt {}/{})",
                        timeout,
                        attempts,
                        policy.max_attempts
                    );
                }
            }
        }
        Err(InferenceError::TimedOut { attempts, waited })
    }
}

impl Drop for InferenceAdapter {
    fn drop(&mut self) {
        self.requests.take();
        let Some(worker) = self.worker.take() else {
            return;
        };
        if matches!(self.slot, Slot::InFlight { .. }) {
            log::warn!("inference request still running at shutdown; detaching worker");
            return;
        }
        if worker.join().is_err() {
            log::error!("inference worker panicked");
        }
    }
}
