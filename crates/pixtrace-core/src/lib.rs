//! pixtrace-core: Trace orchestration for bitmap-to-vector conversion (sans-IO).
//!
//! Takes exported node pixels through:
//! decode -> threshold (+ perturbation on retry) -> content validation ->
//! primary engine (incremental) or fallback engine -> markup normalization.
//!
//! The [`Session`] owns all application state: the selection, the
//! active options, request correlation, in-flight preview traces and at
//! most one batch conversion. It talks to the document through the
//! [`HostDocument`] trait and to engines through the traits in
//! [`engine`]; it never performs I/O or spawns work itself. Hosts drive
//! it by feeding [`HostEvent`]s and calling [`Session::run_turn`] from
//! their own scheduler.

pub mod batch;
pub mod clock;
pub mod correlator;
pub mod decode;
pub mod engine;
pub mod host;
pub mod orchestrator;
pub mod preprocess;
pub mod presets;
pub mod protocol;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod validate;

pub use batch::{BatchEvent, BatchJob, BatchPoll};
pub use clock::{Clock, ManualClock, SystemClock};
pub use correlator::{RequestCorrelator, RequestId, RequestKind};
pub use engine::{EngineError, Engines, FallbackEngine, IncrementalTracer, PrimaryEngine};
pub use host::{ExportRequest, HostDocument, HostEvent, VectorCommit};
pub use orchestrator::{AttemptPlan, AttemptRecord, JobPoll, OrchestratorConfig, TraceJob, TraceRequest};
pub use presets::Preset;
pub use session::{Session, SessionConfig, SessionError, SessionEvent, Status, StatusLevel};
pub use types::{
    CurveFitting, Dimensions, EngineKind, FailureKind, NodeDescriptor, NodeId, PixelBuffer,
    SourceDescriptor, TraceFailure, TraceOptions, TraceOutcome, Traced,
};
