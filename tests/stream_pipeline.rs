use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use people_counter::inference::{InferenceAdapter, InferenceError, StubEngine, WaitPolicy};
use people_counter::ingest::{open_source, FrameSource, ReadError, SourceStats};
use people_counter::sink::{NullVideoSink, PublishSink, RawVideoSink, VideoSink};
use people_counter::{ExitReason, Frame, PipelineSettings, StreamOrchestrator};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

enum Step {
    Frame,
    Corrupt,
}

/// Black frames or read failures in a fixed order, then end of stream.
struct ScriptedSource {
    steps: VecDeque<Step>,
    fps: Option<f64>,
    produced: u64,
    cancel_after: Option<(u64, Arc<AtomicBool>)>,
}

impl ScriptedSource {
    fn frames(count: usize) -> Self {
        Self::steps((0..count).map(|_| Step::Frame).collect())
    }

    fn steps(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            fps: Some(30.0),
            produced: 0,
            cancel_after: None,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Frame, ReadError> {
        match self.steps.pop_front() {
            None => Err(ReadError::EndOfStream),
            Some(Step::Corrupt) => Err(ReadError::Decode(anyhow!("corrupt packet"))),
            Some(Step::Frame) => {
                let frame = Frame::from_rgb(
                    vec![0; (WIDTH * HEIGHT * 3) as usize],
                    WIDTH,
                    HEIGHT,
                    self.produced,
                )
                .map_err(ReadError::Decode)?;
                self.produced += 1;
                if let Some((after, flag)) = &self.cancel_after {
                    if self.produced == *after {
                        flag.store(true, Ordering::SeqCst);
                    }
                }
                Ok(frame)
            }
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.produced,
        }
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(String, String)>>>);

impl Recorder {
    fn messages(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().clone()
    }

    fn on_topic(&self, topic: &str) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload)
            .collect()
    }
}

impl PublishSink for Recorder {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .push((topic.to_string(), String::from_utf8(payload)?));
        Ok(())
    }
}

struct BrokenPublisher;

impl PublishSink for BrokenPublisher {
    fn publish(&mut self, _topic: &str, _payload: Vec<u8>) -> Result<()> {
        Err(anyhow!("broker unreachable"))
    }
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct ClosedVideo;

impl VideoSink for ClosedVideo {
    fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
        Err(anyhow!("broken pipe"))
    }
}

fn adapter(engine: StubEngine) -> InferenceAdapter {
    InferenceAdapter::load(
        Box::new(engine),
        Path::new("stub://people"),
        people_counter::Device::Cpu,
        None,
    )
    .expect("load stub model")
}

fn orchestrator(
    source: impl FrameSource + 'static,
    engine: StubEngine,
    publisher: impl PublishSink + 'static,
    video: impl VideoSink + 'static,
) -> StreamOrchestrator {
    StreamOrchestrator::new(
        Box::new(source),
        adapter(engine),
        Box::new(publisher),
        Box::new(video),
        PipelineSettings::default(),
    )
}

#[test]
fn confirmed_entry_and_exit_are_published() {
    let mut script = vec![0; 35];
    script.extend(vec![1; 31]);
    script.extend(vec![0; 34]);
    let recorder = Recorder::default();

    let mut run = orchestrator(
        ScriptedSource::frames(script.len()),
        StubEngine::with_script(script),
        recorder.clone(),
        NullVideoSink,
    );
    let summary = run.run(&AtomicBool::new(false)).expect("run");

    assert_eq!(summary.exit, ExitReason::EndOfStream);
    assert_eq!(summary.frames_processed, 100);
    assert_eq!(summary.total_count, 1);
    assert_eq!(summary.publish_failures, 0);

    let counts = recorder.on_topic("person");
    assert_eq!(counts.len(), 100);
    assert_eq!(counts[64], r#"{"count":0,"total":0}"#);
    assert_eq!(counts[65], r#"{"count":1,"total":1}"#);
    assert_eq!(counts[95], r#"{"count":1,"total":1}"#);
    assert_eq!(counts[96], r#"{"count":0,"total":1}"#);
    assert_eq!(counts[99], r#"{"count":0,"total":1}"#);
    assert_eq!(recorder.on_topic("person/duration"), vec![r#"{"duration":1}"#]);

    // The duration report precedes that frame's count update.
    let messages = recorder.messages();
    let at = messages
        .iter()
        .position(|(topic, _)| topic == "person/duration")
        .unwrap();
    assert_eq!(messages[at + 1].1, r#"{"count":0,"total":1}"#);
}

#[test]
fn steady_empty_scene_reports_zero_every_frame() {
    let recorder = Recorder::default();
    let mut run = orchestrator(
        ScriptedSource::frames(10),
        StubEngine::with_script(vec![0]),
        recorder.clone(),
        NullVideoSink,
    );
    let summary = run.run(&AtomicBool::new(false)).expect("run");

    assert_eq!(summary.frames_processed, 10);
    let counts = recorder.on_topic("person");
    assert_eq!(counts.len(), 10);
    assert!(counts.iter().all(|c| c == r#"{"count":0,"total":0}"#));
    assert!(recorder.on_topic("person/duration").is_empty());
}

#[test]
fn annotated_frames_reach_the_video_sink() {
    let buffer = SharedBuffer::default();
    let mut run = orchestrator(
        ScriptedSource::frames(2),
        StubEngine::with_script(vec![1, 0]),
        Recorder::default(),
        RawVideoSink::new(buffer.clone()),
    );
    run.run(&AtomicBool::new(false)).expect("run");

    let bytes = buffer.0.lock().unwrap().clone();
    let frame_len = (WIDTH * HEIGHT * 3) as usize;
    assert_eq!(bytes.len(), 2 * frame_len);
    assert_eq!(&bytes[..3], &[255, 0, 0]);
    assert!(bytes[frame_len..].iter().all(|b| *b == 0));
}

#[test]
fn cancellation_stops_at_the_next_frame_boundary() {
    let cancel = Arc::new(AtomicBool::new(false));
    let mut source = ScriptedSource::frames(50);
    source.cancel_after = Some((3, Arc::clone(&cancel)));

    let mut run = orchestrator(
        source,
        StubEngine::with_script(vec![0]),
        Recorder::default(),
        NullVideoSink,
    );
    let summary = run.run(&cancel).expect("run");

    assert_eq!(summary.exit, ExitReason::Cancelled);
    assert_eq!(summary.frames_processed, 3);
}

#[test]
fn cancelled_before_start_processes_nothing() {
    let recorder = Recorder::default();
    let mut run = orchestrator(
        ScriptedSource::frames(5),
        StubEngine::with_script(vec![1]),
        recorder.clone(),
        NullVideoSink,
    );
    let summary = run.run(&AtomicBool::new(true)).expect("run");

    assert_eq!(summary.exit, ExitReason::Cancelled);
    assert_eq!(summary.frames_processed, 0);
    assert!(recorder.messages().is_empty());
}

#[test]
fn read_failure_before_any_frame_is_fatal() {
    let mut run = orchestrator(
        ScriptedSource::steps(vec![Step::Corrupt, Step::Frame]),
        StubEngine::new(),
        Recorder::default(),
        NullVideoSink,
    );
    let err = run.run(&AtomicBool::new(false)).unwrap_err();
    assert!(format!("{:#}", err).contains("first frame"));
}

#[test]
fn read_failures_after_a_frame_are_skipped() {
    let mut run = orchestrator(
        ScriptedSource::steps(vec![
            Step::Frame,
            Step::Corrupt,
            Step::Frame,
            Step::Corrupt,
            Step::Frame,
        ]),
        StubEngine::new(),
        Recorder::default(),
        NullVideoSink,
    );
    let summary = run.run(&AtomicBool::new(false)).expect("run");

    assert_eq!(summary.exit, ExitReason::EndOfStream);
    assert_eq!(summary.frames_processed, 3);
    assert_eq!(summary.read_failures, 2);
}

#[test]
fn long_failure_runs_after_a_frame_are_survived_by_default() {
    let mut steps = vec![Step::Frame];
    steps.extend((0..45).map(|_| Step::Corrupt));
    steps.extend((0..5).map(|_| Step::Frame));
    let mut run = orchestrator(
        ScriptedSource::steps(steps),
        StubEngine::new(),
        Recorder::default(),
        NullVideoSink,
    );
    let summary = run.run(&AtomicBool::new(false)).expect("run");

    assert_eq!(summary.exit, ExitReason::EndOfStream);
    assert_eq!(summary.frames_processed, 6);
    assert_eq!(summary.read_failures, 45);
}

#[test]
fn too_many_consecutive_read_failures_are_fatal() {
    let mut run = StreamOrchestrator::new(
        Box::new(ScriptedSource::steps(vec![
            Step::Frame,
            Step::Corrupt,
            Step::Corrupt,
            Step::Corrupt,
            Step::Frame,
        ])),
        adapter(StubEngine::new()),
        Box::new(Recorder::default()),
        Box::new(NullVideoSink),
        PipelineSettings {
            max_consecutive_read_failures: Some(3),
            ..PipelineSettings::default()
        },
    );
    let err = run.run(&AtomicBool::new(false)).unwrap_err();
    assert!(format!("{:#}", err).contains("3 consecutive"));
}

#[test]
fn publish_failures_do_not_stop_the_stream() {
    let mut run = orchestrator(
        ScriptedSource::frames(5),
        StubEngine::with_script(vec![1]),
        BrokenPublisher,
        NullVideoSink,
    );
    let summary = run.run(&AtomicBool::new(false)).expect("run");

    assert_eq!(summary.exit, ExitReason::EndOfStream);
    assert_eq!(summary.frames_processed, 5);
    assert_eq!(summary.publish_failures, 5);
}

#[test]
fn video_sink_failure_is_fatal() {
    let mut run = orchestrator(
        ScriptedSource::frames(5),
        StubEngine::new(),
        Recorder::default(),
        ClosedVideo,
    );
    assert!(run.run(&AtomicBool::new(false)).is_err());
}

#[test]
fn exhausted_inference_waits_are_fatal() {
    let mut run = StreamOrchestrator::new(
        Box::new(ScriptedSource::frames(3)),
        adapter(StubEngine::new().with_latency(Duration::from_millis(300))),
        Box::new(Recorder::default()),
        Box::new(NullVideoSink),
        PipelineSettings {
            wait: WaitPolicy {
                timeout: Duration::from_millis(5),
                max_timeout: Duration::from_millis(10),
                backoff: 2,
                max_attempts: 2,
            },
            ..PipelineSettings::default()
        },
    );
    let err = run.run(&AtomicBool::new(false)).unwrap_err();
    let timed_out = err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<InferenceError>(), Some(InferenceError::TimedOut { .. })));
    assert!(timed_out, "unexpected error: {:#}", err);
}

#[test]
fn source_without_fps_uses_fallback() {
    let mut source = ScriptedSource::frames(8);
    source.fps = None;
    let recorder = Recorder::default();

    let mut run = StreamOrchestrator::new(
        Box::new(source),
        adapter(StubEngine::with_script(vec![0, 1, 1, 1, 1, 1, 1, 1])),
        Box::new(recorder.clone()),
        Box::new(NullVideoSink),
        PipelineSettings {
            fallback_fps: Some(2.0),
            ..PipelineSettings::default()
        },
    );
    let summary = run.run(&AtomicBool::new(false)).expect("run");

    // Two frames of debounce at 2 fps: confirmed on the third differing frame.
    assert_eq!(summary.total_count, 1);
    let counts = recorder.on_topic("person");
    assert_eq!(counts[2], r#"{"count":0,"total":0}"#);
    assert_eq!(counts[3], r#"{"count":1,"total":1}"#);
}

#[test]
fn synthetic_input_runs_end_to_end() {
    let source = open_source("stub://lobby?frames=4&fps=10&width=32&height=24").expect("source");
    let recorder = Recorder::default();
    let mut run = StreamOrchestrator::new(
        source,
        adapter(StubEngine::with_script(vec![2])),
        Box::new(recorder.clone()),
        Box::new(NullVideoSink),
        PipelineSettings::default(),
    );
    let summary = run.run(&AtomicBool::new(false)).expect("run");

    assert_eq!(summary.frames_processed, 4);
    assert_eq!(recorder.on_topic("person").len(), 4);
}
