//! The trace orchestrator: a retry ladder across two engines.
//!
//! | Attempt | Preprocessing            | Validation | Engine   | Options                    |
//! |---------|--------------------------|------------|----------|----------------------------|
//! | 0       | threshold                | yes        | primary  | user's                     |
//! | 1       | threshold + perturbation | no         | primary  | corner threshold nudged up |
//! | 2       | threshold                | no         | fallback | mapped, monochrome         |
//!
//! A failed attempt escalates only if its message carries one of the
//! configured crash markers and it is not the last rung. Everything else
//! is terminal and reported verbatim.
//!
//! [`TraceJob`] is a state machine driven by [`TraceJob::step`]. Each
//! call does one bounded unit of work (start an attempt, advance the
//! primary engine by one tick, or run the fallback) and returns, so the
//! host can yield to its event loop between calls. Stack depth is
//! constant regardless of attempt count.

use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::clock::Clock;
use crate::correlator::RequestId;
use crate::engine::{
    self, EngineError, Engines, FallbackOptions, IncrementalTracer, PrimaryOptions, RenderOptions,
};
use crate::preprocess::preprocess;
use crate::types::{
    CurveFitting, EngineKind, FailureKind, PixelBuffer, SourceDescriptor, TraceFailure,
    TraceOptions, TraceOutcome, Traced, duration_ms,
};
use crate::validate::check_content;

/// Attempts in the ladder; index `MAX_ATTEMPTS - 1` is terminal.
pub const MAX_ATTEMPTS: u8 = 3;

/// Tunables of the retry ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Substrings that mark a failure message as the primary engine's
    /// known crash.
    pub crash_markers: Vec<String>,
    /// Degrees added to the corner threshold on attempt 1.
    pub corner_nudge: u32,
    /// Seed for perturbation. `None` seeds from entropy per job.
    pub seed: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            crash_markers: vec![String::from("parallel"), String::from("unreachable")],
            corner_nudge: 10,
            seed: None,
        }
    }
}

/// What one rung of the ladder does. A pure function of the attempt
/// index, the user's options and the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptPlan {
    /// Position in the ladder, starting at 0.
    pub index: u8,
    /// Engine used.
    pub engine: EngineKind,
    /// Path geometry mode.
    pub curve_fitting: CurveFitting,
    /// Corner threshold after any nudge, clamped to 180.
    pub corner_threshold: u32,
    /// Whether edge perturbation runs.
    pub perturb: bool,
    /// Whether content validation runs.
    pub validate: bool,
}

impl AttemptPlan {
    /// Plan for attempt `index`, or `None` past the end of the ladder.
    #[must_use]
    pub fn for_attempt(index: u8, options: &TraceOptions, config: &OrchestratorConfig) -> Option<Self> {
        let base = Self {
            index,
            engine: EngineKind::Primary,
            curve_fitting: options.curve_fitting,
            corner_threshold: options.corner_threshold,
            perturb: false,
            validate: false,
        };
        match index {
            0 => Some(Self {
                validate: true,
                ..base
            }),
            1 => Some(Self {
                corner_threshold: options
                    .corner_threshold
                    .saturating_add(config.corner_nudge)
                    .min(TraceOptions::MAX_CORNER_THRESHOLD),
                perturb: true,
                ..base
            }),
            2 => Some(Self {
                engine: EngineKind::Fallback,
                ..base
            }),
            _ => None,
        }
    }

    /// Whether a failure here ends the ladder.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.index + 1 >= MAX_ATTEMPTS
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum AttemptResult {
    /// Produced markup.
    Succeeded,
    /// Failed; `kind` is the classification used for escalation.
    Failed {
        /// Classified failure.
        kind: FailureKind,
        /// Message verbatim.
        message: String,
    },
}

/// Diagnostics for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    /// The plan that ran.
    pub plan: AttemptPlan,
    /// Primary-engine ticks taken (0 for the fallback).
    pub steps: u32,
    /// Wall time of this attempt alone.
    #[serde(with = "duration_ms", rename = "durationMs")]
    pub duration: Duration,
    /// How it ended.
    pub result: AttemptResult,
}

/// One submission to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRequest {
    /// Correlation id.
    pub request_id: RequestId,
    /// Where the pixels came from.
    pub source: SourceDescriptor,
    /// Options snapshotted at issuance.
    pub options: TraceOptions,
    /// Display-only preview vs committed conversion.
    pub is_preview: bool,
}

/// Result of one [`TraceJob::step`].
#[derive(Debug)]
pub enum JobPoll {
    /// More work remains; call `step` again on a later turn.
    Pending,
    /// The job is finished.
    Ready(TraceOutcome),
}

enum JobState {
    Starting {
        index: u8,
    },
    Stepping {
        plan: AttemptPlan,
        tracer: Box<dyn IncrementalTracer>,
        steps: u32,
    },
    Finished,
}

/// One trace request being driven through the retry ladder.
pub struct TraceJob {
    request: TraceRequest,
    pixels: PixelBuffer,
    config: OrchestratorConfig,
    rng: StdRng,
    started: Instant,
    attempt_started: Instant,
    state: JobState,
    attempts: Vec<AttemptRecord>,
}

impl std::fmt::Debug for TraceJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceJob")
            .field("request", &self.request)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl TraceJob {
    /// Create a job. No work happens until the first [`step`](Self::step).
    ///
    /// Elapsed time reported on success is measured from here.
    #[must_use]
    pub fn new(
        request: TraceRequest,
        pixels: PixelBuffer,
        config: &OrchestratorConfig,
        clock: &dyn Clock,
    ) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let now = clock.now();
        Self {
            request,
            pixels,
            config: config.clone(),
            rng,
            started: now,
            attempt_started: now,
            state: JobState::Starting { index: 0 },
            attempts: Vec::new(),
        }
    }

    /// The request being traced.
    #[must_use]
    pub const fn request(&self) -> &TraceRequest {
        &self.request
    }

    /// Records of every attempt made so far.
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Whether the job has produced its outcome.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self.state, JobState::Finished)
    }

    /// Index of the attempt in progress (or about to start).
    #[must_use]
    pub fn current_attempt(&self) -> Option<u8> {
        match &self.state {
            JobState::Starting { index } => Some(*index),
            JobState::Stepping { plan, .. } => Some(plan.index),
            JobState::Finished => None,
        }
    }

    /// Do one bounded unit of work.
    ///
    /// Calling `step` again after [`JobPoll::Ready`] yields an
    /// [`FailureKind::Unknown`] failure.
    pub fn step(&mut self, engines: &mut Engines, clock: &dyn Clock) -> JobPoll {
        match std::mem::replace(&mut self.state, JobState::Finished) {
            JobState::Starting { index } => self.start_attempt(index, engines, clock),
            JobState::Stepping {
                plan,
                mut tracer,
                steps,
            } => {
                let steps = steps + 1;
                match engine::guarded(|| tracer.tick()) {
                    Ok(false) => {
                        self.state = JobState::Stepping {
                            plan,
                            tracer,
                            steps,
                        };
                        JobPoll::Pending
                    }
                    Ok(true) => {
                        let markup = engine::guarded(|| tracer.take_markup());
                        drop(tracer);
                        match markup {
                            Ok(markup) => self.succeed(plan, steps, markup, clock),
                            Err(error) => self.fail(plan, steps, &error, clock),
                        }
                    }
                    Err(error) => {
                        drop(tracer);
                        self.fail(plan, steps, &error, clock)
                    }
                }
            }
            JobState::Finished => JobPoll::Ready(Err(TraceFailure::new(
                FailureKind::Unknown,
                "trace job polled after completion",
            ))),
        }
    }

    /// Completed fraction of the current primary-engine attempt.
    #[must_use]
    pub fn progress(&self) -> f64 {
        match &self.state {
            JobState::Stepping { tracer, .. } => tracer.progress(),
            JobState::Finished => 1.0,
            JobState::Starting { .. } => 0.0,
        }
    }

    fn start_attempt(&mut self, index: u8, engines: &mut Engines, clock: &dyn Clock) -> JobPoll {
        let Some(plan) = AttemptPlan::for_attempt(index, &self.request.options, &self.config)
        else {
            return self.finish(Err(TraceFailure::new(
                FailureKind::Unknown,
                "retry attempts exhausted",
            )));
        };
        self.attempt_started = clock.now();
        log::debug!(
            "{}: attempt {} on {} engine (perturb: {}, corner: {})",
            self.request.request_id,
            plan.index,
            plan.engine,
            plan.perturb,
            plan.corner_threshold,
        );

        let options = self.request.options;
        let binary = preprocess(
            &self.pixels,
            options.threshold,
            options.invert,
            plan.perturb,
            &mut self.rng,
        );

        if plan.validate {
            let check = check_content(&binary);
            if let Some(issue) = check.issue {
                log::debug!(
                    "{}: rejected, black ratio {:.4}",
                    self.request.request_id,
                    check.black_ratio
                );
                let failure = TraceFailure::new(FailureKind::InvalidContent, issue.message());
                self.record(plan, 0, clock, AttemptResult::Failed {
                    kind: failure.kind,
                    message: failure.message.clone(),
                });
                return self.finish(Err(failure));
            }
        }

        match plan.engine {
            EngineKind::Primary => {
                let primary = PrimaryOptions::new(&options, plan.curve_fitting, plan.corner_threshold);
                let started = engine::guarded(|| {
                    engines.primary.load()?;
                    let mut tracer =
                        engines
                            .primary
                            .converter(binary, &primary, &RenderOptions::default())?;
                    tracer.init()?;
                    Ok(tracer)
                });
                match started {
                    Ok(tracer) => {
                        self.state = JobState::Stepping {
                            plan,
                            tracer,
                            steps: 0,
                        };
                        JobPoll::Pending
                    }
                    Err(error) => self.fail(plan, 0, &error, clock),
                }
            }
            EngineKind::Fallback => {
                let fallback = FallbackOptions::new(&options);
                let traced = engine::guarded(|| {
                    engines.fallback.init()?;
                    engines.fallback.trace(&binary, &fallback)
                });
                match traced {
                    Ok(markup) => self.succeed(plan, 0, markup, clock),
                    Err(error) => self.fail(plan, 0, &error, clock),
                }
            }
        }
    }

    fn succeed(&mut self, plan: AttemptPlan, steps: u32, markup: String, clock: &dyn Clock) -> JobPoll {
        if !pixtrace_export::is_plausible_markup(&markup) {
            let error = TraceFailure::new(FailureKind::Unknown, "engine produced invalid markup");
            self.record(plan, steps, clock, AttemptResult::Failed {
                kind: error.kind,
                message: error.message.clone(),
            });
            log::error!("{}: {error}", self.request.request_id);
            return self.finish(Err(error));
        }

        self.record(plan, steps, clock, AttemptResult::Succeeded);
        let (width, height) = self.pixels.dimensions();
        let traced = Traced {
            markup: pixtrace_export::normalize_markup(&markup, width, height),
            elapsed: clock.elapsed(self.started),
            engine: plan.engine,
            attempts: plan.index + 1,
        };
        log::info!(
            "{}: traced {} ({}x{}) on {} engine in {:?} after {} attempt(s)",
            self.request.request_id,
            self.request.source.name,
            width,
            height,
            traced.engine,
            traced.elapsed,
            traced.attempts,
        );
        self.finish(Ok(traced))
    }

    fn fail(&mut self, plan: AttemptPlan, steps: u32, error: &EngineError, clock: &dyn Clock) -> JobPoll {
        let kind = engine::classify(error, &self.config.crash_markers);
        let message = error.to_string();
        self.record(plan, steps, clock, AttemptResult::Failed {
            kind,
            message: message.clone(),
        });

        if kind.is_retryable() && !plan.is_terminal() {
            log::warn!(
                "{}: attempt {} crashed ({message}), escalating",
                self.request.request_id,
                plan.index
            );
            self.state = JobState::Starting {
                index: plan.index + 1,
            };
            return JobPoll::Pending;
        }

        log::error!(
            "{}: attempt {} failed terminally: {message}",
            self.request.request_id,
            plan.index
        );
        self.finish(Err(TraceFailure::new(kind, message)))
    }

    fn record(&mut self, plan: AttemptPlan, steps: u32, clock: &dyn Clock, result: AttemptResult) {
        self.attempts.push(AttemptRecord {
            plan,
            steps,
            duration: clock.elapsed(self.attempt_started),
            result,
        });
    }

    fn finish(&mut self, outcome: TraceOutcome) -> JobPoll {
        self.state = JobState::Finished;
        JobPoll::Ready(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{
        ScriptedFallback, ScriptedPrimary, Step, split_source, request, run_job, uniform_source,
    };

    fn engines(primary: ScriptedPrimary, fallback: ScriptedFallback) -> Engines {
        Engines::new(primary, fallback)
    }

    #[test]
    fn plans_follow_the_ladder() {
        let options = TraceOptions {
            corner_threshold: 60,
            curve_fitting: CurveFitting::Polygon,
            ..TraceOptions::default()
        };
        let config = OrchestratorConfig::default();

        let p0 = AttemptPlan::for_attempt(0, &options, &config).unwrap();
        assert_eq!(p0.engine, EngineKind::Primary);
        assert!(p0.validate && !p0.perturb);
        assert_eq!(p0.corner_threshold, 60);

        let p1 = AttemptPlan::for_attempt(1, &options, &config).unwrap();
        assert_eq!(p1.engine, EngineKind::Primary);
        assert!(p1.perturb && !p1.validate);
        assert_eq!(p1.corner_threshold, 70);
        assert_eq!(p1.curve_fitting, CurveFitting::Polygon);

        let p2 = AttemptPlan::for_attempt(2, &options, &config).unwrap();
        assert_eq!(p2.engine, EngineKind::Fallback);
        assert!(!p2.perturb && !p2.validate);
        assert!(p2.is_terminal());

        assert_eq!(AttemptPlan::for_attempt(3, &options, &config), None);
    }

    #[test]
    fn corner_nudge_is_clamped() {
        let options = TraceOptions {
            corner_threshold: 175,
            ..TraceOptions::default()
        };
        let plan = AttemptPlan::for_attempt(1, &options, &OrchestratorConfig::default()).unwrap();
        assert_eq!(plan.corner_threshold, 180);
    }

    #[test]
    fn first_attempt_success_is_normalized() {
        let primary = ScriptedPrimary::new(vec![Step::Succeed { ticks: 3 }]);
        let log = primary.log();
        let mut engines = engines(primary, ScriptedFallback::succeeding());
        let clock = ManualClock::new();

        let (outcome, job) = run_job(&mut engines, &clock, request(split_source(8, 6)));
        let traced = outcome.unwrap();
        assert_eq!(traced.engine, EngineKind::Primary);
        assert_eq!(traced.attempts, 1);
        assert!(traced.markup.contains(r#"width="8""#));
        assert!(traced.markup.contains(r#"viewBox="0 0 8 6""#));
        assert_eq!(job.attempts().len(), 1);
        assert_eq!(job.attempts()[0].steps, 3);
        assert_eq!(log.borrow().released, 1);
    }

    #[test]
    fn crash_always_makes_exactly_three_attempts() {
        let primary = ScriptedPrimary::new(vec![Step::Crash, Step::Crash, Step::Crash]);
        let plog = primary.log();
        let fallback = ScriptedFallback::failing("fallback gave up");
        let flog = fallback.log();
        let mut engines = engines(primary, fallback);

        let (outcome, job) =
            run_job(&mut engines, &ManualClock::new(), request(split_source(8, 8)));
        let failure = outcome.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Unknown);
        assert_eq!(failure.message, "fallback gave up");

        let indices: Vec<u8> = job.attempts().iter().map(|a| a.plan.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(job.attempts()[2].plan.engine, EngineKind::Fallback);
        assert_eq!(plog.borrow().converters, 2);
        assert_eq!(plog.borrow().released, 2);
        assert_eq!(flog.borrow().traces, 1);
    }

    #[test]
    fn fallback_rescues_after_two_crashes() {
        let primary = ScriptedPrimary::new(vec![Step::Crash, Step::Crash]);
        let mut engines = engines(primary, ScriptedFallback::succeeding());
        let (outcome, _) = run_job(&mut engines, &ManualClock::new(), request(split_source(8, 8)));
        let traced = outcome.unwrap();
        assert_eq!(traced.engine, EngineKind::Fallback);
        assert_eq!(traced.attempts, 3);
    }

    #[test]
    fn perturbed_retry_can_succeed() {
        let primary = ScriptedPrimary::new(vec![Step::Crash, Step::Succeed { ticks: 1 }]);
        let plog = primary.log();
        let mut engines = engines(primary, ScriptedFallback::succeeding());
        let (outcome, job) =
            run_job(&mut engines, &ManualClock::new(), request(split_source(8, 8)));
        assert_eq!(outcome.unwrap().attempts, 2);
        assert_eq!(plog.borrow().corner_thresholds, vec![60, 70]);
        assert_eq!(job.attempts()[0].result, AttemptResult::Failed {
            kind: FailureKind::EngineCrash,
            message: String::from(crate::testing::CRASH_MESSAGE),
        });
    }

    #[test]
    fn non_crash_failure_is_terminal_immediately() {
        let primary = ScriptedPrimary::new(vec![Step::Fail("out of memory")]);
        let plog = primary.log();
        let fallback = ScriptedFallback::succeeding();
        let flog = fallback.log();
        let mut engines = engines(primary, fallback);

        let (outcome, job) =
            run_job(&mut engines, &ManualClock::new(), request(split_source(8, 8)));
        let failure = outcome.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Unknown);
        assert_eq!(failure.message, "out of memory");
        assert_eq!(job.attempts().len(), 1);
        assert_eq!(plog.borrow().converters, 1);
        assert_eq!(plog.borrow().released, 1);
        assert_eq!(flog.borrow().traces, 0);
    }

    #[test]
    fn uniform_input_is_rejected_before_any_engine_runs() {
        let primary = ScriptedPrimary::new(vec![]);
        let plog = primary.log();
        let mut engines = engines(primary, ScriptedFallback::succeeding());

        let (outcome, _) = run_job(&mut engines, &ManualClock::new(), request(uniform_source(10, 10, 255)));
        let failure = outcome.unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidContent);
        assert!(failure.message.contains("almost all white"));
        assert_eq!(plog.borrow().converters, 0);

        let (outcome, _) = run_job(&mut engines, &ManualClock::new(), request(uniform_source(10, 10, 0)));
        assert!(outcome.unwrap_err().message.contains("almost all black"));
    }

    #[test]
    fn load_failure_is_unavailable_and_not_retried() {
        let primary = ScriptedPrimary::unavailable("engine binary missing");
        let fallback = ScriptedFallback::succeeding();
        let flog = fallback.log();
        let mut engines = engines(primary, fallback);

        let (outcome, job) =
            run_job(&mut engines, &ManualClock::new(), request(split_source(8, 8)));
        assert_eq!(outcome.unwrap_err().kind, FailureKind::EngineUnavailable);
        assert_eq!(job.attempts().len(), 1);
        assert_eq!(flog.borrow().traces, 0);
    }

    #[test]
    fn panicking_engine_is_classified_by_message() {
        let primary = ScriptedPrimary::new(vec![Step::Panic, Step::Succeed { ticks: 1 }]);
        let mut engines = engines(primary, ScriptedFallback::succeeding());
        let (outcome, job) =
            run_job(&mut engines, &ManualClock::new(), request(split_source(8, 8)));
        assert_eq!(outcome.unwrap().attempts, 2);
        assert!(matches!(
            job.attempts()[0].result,
            AttemptResult::Failed {
                kind: FailureKind::EngineCrash,
                ..
            }
        ));
    }

    #[test]
    fn implausible_markup_is_rejected() {
        let primary = ScriptedPrimary::new(vec![Step::Markup("<svg/>")]);
        let mut engines = engines(primary, ScriptedFallback::succeeding());
        let (outcome, _) = run_job(&mut engines, &ManualClock::new(), request(split_source(8, 8)));
        let failure = outcome.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Unknown);
        assert_eq!(failure.message, "engine produced invalid markup");
    }

    #[test]
    fn elapsed_spans_every_attempt() {
        let clock = ManualClock::new();
        let primary = ScriptedPrimary::new(vec![Step::Crash, Step::Succeed { ticks: 2 }]);
        let mut engines = engines(primary, ScriptedFallback::succeeding());
        let (req, pixels) = request(split_source(8, 8));
        let mut job = TraceJob::new(req, pixels, &OrchestratorConfig::default(), &clock);
        let outcome = loop {
            clock.advance(Duration::from_millis(10));
            if let JobPoll::Ready(outcome) = job.step(&mut engines, &clock) {
                break outcome;
            }
        };
        // start 0, tick (crash), start 1, tick, tick (done): five turns.
        let traced = outcome.unwrap();
        assert_eq!(traced.elapsed, Duration::from_millis(50));
        assert!(job.attempts()[1].duration < traced.elapsed);
    }

    #[test]
    fn custom_crash_markers_drive_escalation() {
        let config = OrchestratorConfig {
            crash_markers: vec![String::from("out of memory")],
            ..OrchestratorConfig::default()
        };
        let primary = ScriptedPrimary::new(vec![Step::Fail("out of memory"), Step::Succeed { ticks: 1 }]);
        let mut engines = engines(primary, ScriptedFallback::succeeding());
        let clock = ManualClock::new();
        let (req, pixels) = request(split_source(8, 8));
        let mut job = TraceJob::new(req, pixels, &config, &clock);
        let outcome = loop {
            if let JobPoll::Ready(outcome) = job.step(&mut engines, &clock) {
                break outcome;
            }
        };
        assert_eq!(outcome.unwrap().attempts, 2);
    }

    #[test]
    fn polling_after_completion_fails() {
        let primary = ScriptedPrimary::new(vec![Step::Succeed { ticks: 1 }]);
        let mut engines = engines(primary, ScriptedFallback::succeeding());
        let clock = ManualClock::new();
        let (_, mut job) = run_job(&mut engines, &clock, request(split_source(8, 8)));
        assert!(job.is_finished());
        assert!(matches!(
            job.step(&mut engines, &clock),
            JobPoll::Ready(Err(TraceFailure {
                kind: FailureKind::Unknown,
                ..
            }))
        ));
    }
}
