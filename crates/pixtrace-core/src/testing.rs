//! Scripted engines, a recording host and image fixtures.
//!
//! Compiled for this crate's unit tests and, through the `testing`
//! feature, for integration tests here and in downstream crates that
//! want to exercise a [`Session`](crate::Session) without real engines.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use image::{ImageFormat, Rgba, RgbaImage};

use crate::clock::Clock;
use crate::correlator::RequestId;
use crate::engine::{
    EngineError, FallbackEngine, FallbackOptions, IncrementalTracer, PrimaryEngine, PrimaryOptions,
    RenderOptions,
};
use crate::host::{ExportRequest, HostDocument, VectorCommit};
use crate::orchestrator::{JobPoll, OrchestratorConfig, TraceJob, TraceRequest};
use crate::types::{NodeDescriptor, NodeId, PixelBuffer, SourceDescriptor, TraceOptions, TraceOutcome};

/// Failure text of a scripted crash. Contains a default crash marker.
pub const CRASH_MESSAGE: &str = "RuntimeError: parallel segments in curve fit";

/// What a scripted primary converter does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Complete on the `ticks`-th tick with plausible markup.
    Succeed {
        /// Ticks until completion, at least 1.
        ticks: u32,
    },
    /// Fail the first tick with [`CRASH_MESSAGE`].
    Crash,
    /// Fail the first tick with this message.
    Fail(&'static str),
    /// Panic on the first tick with a crash-marked message.
    Panic,
    /// Complete on the first tick with this markup.
    Markup(&'static str),
}

/// Counters shared between a scripted primary engine and the test.
#[derive(Debug, Default)]
pub struct PrimaryLog {
    /// Converters built.
    pub converters: u32,
    /// Converters dropped.
    pub released: u32,
    /// Corner threshold of each converter, in order.
    pub corner_thresholds: Vec<u32>,
}

/// A primary engine that follows a script, one [`Step`] per converter.
/// Once the script runs out every converter succeeds after one tick.
#[derive(Debug)]
pub struct ScriptedPrimary {
    script: VecDeque<Step>,
    unavailable: Option<String>,
    log: Rc<RefCell<PrimaryLog>>,
}

impl ScriptedPrimary {
    /// Follow `script`.
    #[must_use]
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: script.into(),
            unavailable: None,
            log: Rc::default(),
        }
    }

    /// Fail every load with `message`.
    #[must_use]
    pub fn unavailable(message: &str) -> Self {
        Self {
            unavailable: Some(message.to_owned()),
            ..Self::new(Vec::new())
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn log(&self) -> Rc<RefCell<PrimaryLog>> {
        Rc::clone(&self.log)
    }
}

impl PrimaryEngine for ScriptedPrimary {
    fn load(&mut self) -> Result<(), EngineError> {
        match &self.unavailable {
            Some(message) => Err(EngineError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }

    fn converter(
        &mut self,
        image: PixelBuffer,
        options: &PrimaryOptions,
        _render: &RenderOptions,
    ) -> Result<Box<dyn IncrementalTracer>, EngineError> {
        let step = self.script.pop_front().unwrap_or(Step::Succeed { ticks: 1 });
        {
            let mut log = self.log.borrow_mut();
            log.converters += 1;
            log.corner_thresholds.push(options.corner_threshold);
        }
        Ok(Box::new(ScriptedTracer {
            step,
            ticks: 0,
            done: false,
            dimensions: image.dimensions(),
            log: Rc::clone(&self.log),
        }))
    }
}

struct ScriptedTracer {
    step: Step,
    ticks: u32,
    done: bool,
    dimensions: (u32, u32),
    log: Rc<RefCell<PrimaryLog>>,
}

impl IncrementalTracer for ScriptedTracer {
    fn init(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    #[allow(clippy::panic)]
    fn tick(&mut self) -> Result<bool, EngineError> {
        self.ticks += 1;
        match self.step {
            Step::Succeed { ticks } => self.done = self.ticks >= ticks.max(1),
            Step::Crash => return Err(EngineError::Failed(String::from(CRASH_MESSAGE))),
            Step::Fail(message) => return Err(EngineError::Failed(message.to_owned())),
            Step::Panic => panic!("assertion failed: segments are not parallel"),
            Step::Markup(_) => self.done = true,
        }
        Ok(self.done)
    }

    fn progress(&self) -> f64 {
        match self.step {
            _ if self.done => 1.0,
            Step::Succeed { ticks } => f64::from(self.ticks) / f64::from(ticks.max(1)),
            _ => 0.0,
        }
    }

    fn take_markup(&mut self) -> Result<String, EngineError> {
        if !self.done {
            return Err(EngineError::Failed(String::from("conversion not complete")));
        }
        Ok(match self.step {
            Step::Markup(markup) => markup.to_owned(),
            _ => square_markup(self.dimensions.0, self.dimensions.1),
        })
    }
}

impl Drop for ScriptedTracer {
    fn drop(&mut self) {
        self.log.borrow_mut().released += 1;
    }
}

/// Counters shared between a scripted fallback engine and the test.
#[derive(Debug, Default)]
pub struct FallbackLog {
    /// Trace calls made.
    pub traces: u32,
}

/// A fallback engine that always succeeds or always fails.
#[derive(Debug)]
pub struct ScriptedFallback {
    failure: Option<String>,
    log: Rc<RefCell<FallbackLog>>,
}

impl ScriptedFallback {
    /// Succeed with plausible markup.
    #[must_use]
    pub fn succeeding() -> Self {
        Self {
            failure: None,
            log: Rc::default(),
        }
    }

    /// Fail every trace with `message`.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_owned()),
            log: Rc::default(),
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn log(&self) -> Rc<RefCell<FallbackLog>> {
        Rc::clone(&self.log)
    }
}

impl FallbackEngine for ScriptedFallback {
    fn init(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn trace(&mut self, image: &PixelBuffer, _options: &FallbackOptions) -> Result<String, EngineError> {
        self.log.borrow_mut().traces += 1;
        match &self.failure {
            Some(message) => Err(EngineError::Failed(message.clone())),
            None => Ok(square_markup(image.width(), image.height())),
        }
    }
}

fn square_markup(width: u32, height: u32) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg"><path d="M0 0 L{width} 0 L{width} {height} Z"/></svg>"#
    )
}

/// A host that records every outbound call.
#[derive(Debug, Default)]
pub struct RecordingHost {
    /// Export requests, in order.
    pub exports: Vec<ExportRequest>,
    /// Vector commits, in order.
    pub commits: Vec<VectorCommit>,
}

impl RecordingHost {
    /// Most recent export request.
    #[must_use]
    pub fn last_export(&self) -> Option<&ExportRequest> {
        self.exports.last()
    }
}

impl HostDocument for RecordingHost {
    fn request_pixels(&mut self, request: ExportRequest) {
        self.exports.push(request);
    }

    fn commit_vector(&mut self, commit: VectorCommit) {
        self.commits.push(commit);
    }
}

/// Opaque image with the left half black and the right half white.
#[must_use]
pub fn split_source(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    })
}

/// Opaque image of one gray value.
#[must_use]
pub fn uniform_source(width: u32, height: u32, value: u8) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
}

/// PNG-encode an image the way the host exports nodes.
///
/// # Panics
///
/// Never for in-memory RGBA images.
#[must_use]
#[allow(clippy::expect_used)]
pub fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("in-memory PNG encoding");
    bytes.into_inner()
}

/// Node descriptor named `name` with id `name`.
#[must_use]
pub fn node(name: &str, width: u32, height: u32) -> NodeDescriptor {
    NodeDescriptor {
        id: NodeId::new(name),
        name: name.to_owned(),
        node_type: String::from("RECTANGLE"),
        width,
        height,
    }
}

/// Source descriptor for pixels exported from `node` at `width × height`.
#[must_use]
pub fn source_for(node: &NodeDescriptor, width: u32, height: u32) -> SourceDescriptor {
    SourceDescriptor {
        node_id: node.id.clone(),
        name: node.name.clone(),
        width,
        height,
        original_width: node.width,
        original_height: node.height,
    }
}

/// A preview trace request for `pixels` with default options.
#[must_use]
pub fn request(pixels: RgbaImage) -> (TraceRequest, PixelBuffer) {
    let (width, height) = pixels.dimensions();
    let request = TraceRequest {
        request_id: RequestId::new("req_test"),
        source: source_for(&node("fixture", width, height), width, height),
        options: TraceOptions::default(),
        is_preview: true,
    };
    (request, pixels)
}

/// Drive a job to completion with the default config, returning the
/// outcome and the finished job.
///
/// # Panics
///
/// If the job does not finish within a generous number of steps.
#[must_use]
#[allow(clippy::panic)]
pub fn run_job(
    engines: &mut crate::engine::Engines,
    clock: &dyn Clock,
    (request, pixels): (TraceRequest, PixelBuffer),
) -> (TraceOutcome, TraceJob) {
    let mut job = TraceJob::new(request, pixels, &OrchestratorConfig::default(), clock);
    for _ in 0..10_000 {
        if let JobPoll::Ready(outcome) = job.step(engines, clock) {
            return (outcome, job);
        }
    }
    panic!("trace job did not finish");
}
