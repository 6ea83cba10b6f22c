//! Engine contracts and failure classification.
//!
//! Two engines sit behind these traits. The primary engine is
//! incremental: a converter is built per attempt, initialized, then
//! advanced one step per scheduling turn until it reports completion.
//! The fallback engine is a single blocking call.
//!
//! Engines report failures as plain message strings. Whether a failure
//! is the primary engine's known crash or anything else is decided here
//! by substring-matching the message against a configurable marker set,
//! since the wrapped engine documents no error codes.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::types::{CurveFitting, FailureKind, PixelBuffer, TraceOptions};

/// Failure reported by an engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine could not be loaded or initialized.
    #[error("{0}")]
    Unavailable(String),

    /// A trace call failed; the message is engine text verbatim.
    #[error("{0}")]
    Failed(String),
}

/// Options passed to the primary engine's converter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryOptions {
    /// Path geometry mode.
    pub mode: CurveFitting,
    /// Turning angle in degrees above which a vertex stays sharp.
    pub corner_threshold: u32,
    /// Vertices closer than this (pixels) are merged.
    pub length_threshold: f64,
    /// Upper bound on smoothing passes.
    pub max_iterations: u32,
    /// Turning angle in degrees above which a vertex splits a spline.
    pub splice_threshold: u32,
    /// Regions below `filter_speckle²` pixels are dropped.
    pub filter_speckle: u32,
    /// Decimal places kept in coordinates.
    pub path_precision: u32,
}

impl PrimaryOptions {
    /// Fixed vertex-merge distance.
    pub const LENGTH_THRESHOLD: f64 = 4.0;
    /// Fixed smoothing pass limit.
    pub const MAX_ITERATIONS: u32 = 10;
    /// Fixed splice angle.
    pub const SPLICE_THRESHOLD: u32 = 45;

    /// Build primary options from user options and the attempt's
    /// (possibly nudged) corner threshold.
    #[must_use]
    pub const fn new(options: &TraceOptions, mode: CurveFitting, corner_threshold: u32) -> Self {
        Self {
            mode,
            corner_threshold,
            length_threshold: Self::LENGTH_THRESHOLD,
            max_iterations: Self::MAX_ITERATIONS,
            splice_threshold: Self::SPLICE_THRESHOLD,
            filter_speckle: options.filter_speckle,
            path_precision: options.path_precision,
        }
    }
}

/// How the primary engine renders its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Fill color of every traced region.
    pub fill: String,
    /// Background fill, `None` for transparent.
    pub background: Option<String>,
    /// Uniform output scale.
    pub scale: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            fill: String::from("#000000"),
            background: None,
            scale: 1.0,
        }
    }
}

/// How the fallback engine resolves ambiguous diagonal pixel pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPolicy {
    /// Connect diagonal black pixels.
    Black,
    /// Keep diagonal black pixels apart.
    White,
    /// Connect pixels of the locally less common color.
    #[default]
    Minority,
    /// Connect pixels of the locally more common color.
    Majority,
}

/// Options passed to the fallback engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackOptions {
    /// Regions with fewer pixels than this are dropped.
    pub min_feature_size: u32,
    /// Ambiguity resolution.
    pub turn_policy: TurnPolicy,
    /// Corner sharpness: vertices turning more than `alpha_max × 90°`
    /// stay sharp.
    pub alpha_max: f64,
    /// Simplification tolerance in pixels.
    pub curve_tolerance: f64,
    /// Emit a single fill color regardless of input.
    pub monochrome: bool,
}

impl FallbackOptions {
    /// Fixed corner parameter.
    pub const ALPHA_MAX: f64 = 1.0;
    /// Fixed curve tolerance.
    pub const CURVE_TOLERANCE: f64 = 0.2;

    /// Map user options onto the fallback engine.
    #[must_use]
    pub const fn new(options: &TraceOptions) -> Self {
        Self {
            min_feature_size: options.filter_speckle,
            turn_policy: TurnPolicy::Minority,
            alpha_max: Self::ALPHA_MAX,
            curve_tolerance: Self::CURVE_TOLERANCE,
            monochrome: true,
        }
    }
}

/// One in-progress primary-engine conversion.
///
/// Dropping the tracer releases everything it holds; the orchestrator
/// drops it on every exit path of an attempt.
pub trait IncrementalTracer {
    /// Prepare the conversion. Called exactly once before [`tick`](Self::tick).
    ///
    /// # Errors
    ///
    /// Returns the engine's failure message.
    fn init(&mut self) -> Result<(), EngineError>;

    /// Advance by one bounded unit of work. Returns `true` once the
    /// conversion is complete.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure message.
    fn tick(&mut self) -> Result<bool, EngineError>;

    /// Completed fraction in `0.0..=1.0`.
    fn progress(&self) -> f64;

    /// Take the finished markup.
    ///
    /// # Errors
    ///
    /// Fails if the conversion is not complete.
    fn take_markup(&mut self) -> Result<String, EngineError>;
}

/// The incremental primary engine.
pub trait PrimaryEngine {
    /// Load the engine. Idempotent; subsequent calls are no-ops once a
    /// load has succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unavailable`] if the engine cannot load.
    fn load(&mut self) -> Result<(), EngineError>;

    /// Build a converter for one binary buffer.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure message.
    fn converter(
        &mut self,
        image: PixelBuffer,
        options: &PrimaryOptions,
        render: &RenderOptions,
    ) -> Result<Box<dyn IncrementalTracer>, EngineError>;
}

/// The single-call fallback engine.
pub trait FallbackEngine {
    /// Initialize the engine. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unavailable`] if the engine cannot load.
    fn init(&mut self) -> Result<(), EngineError>;

    /// Trace a binary buffer to markup in one call.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure message.
    fn trace(&mut self, image: &PixelBuffer, options: &FallbackOptions)
    -> Result<String, EngineError>;
}

/// The pair of engines one session drives.
pub struct Engines {
    /// Incremental primary engine.
    pub primary: Box<dyn PrimaryEngine>,
    /// Single-call fallback engine.
    pub fallback: Box<dyn FallbackEngine>,
}

impl Engines {
    /// Bundle two engines.
    #[must_use]
    pub fn new(primary: impl PrimaryEngine + 'static, fallback: impl FallbackEngine + 'static) -> Self {
        Self {
            primary: Box::new(primary),
            fallback: Box::new(fallback),
        }
    }
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines").finish_non_exhaustive()
    }
}

/// Classify an engine failure.
///
/// Load failures are [`FailureKind::EngineUnavailable`]. A trace
/// failure whose message contains any of `crash_markers` is
/// [`FailureKind::EngineCrash`]; anything else is
/// [`FailureKind::Unknown`].
#[must_use]
pub fn classify(error: &EngineError, crash_markers: &[String]) -> FailureKind {
    match error {
        EngineError::Unavailable(_) => FailureKind::EngineUnavailable,
        EngineError::Failed(message) => {
            if crash_markers
                .iter()
                .any(|marker| !marker.is_empty() && message.contains(marker.as_str()))
            {
                FailureKind::EngineCrash
            } else {
                FailureKind::Unknown
            }
        }
    }
}

/// Run an engine call, converting a panic into [`EngineError::Failed`]
/// carrying the panic message.
///
/// On targets built with `panic = "abort"` a panic still aborts.
///
/// # Errors
///
/// Returns the call's own error or the panic message.
pub fn guarded<T>(call: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
    panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(EngineError::Failed(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("engine panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec![String::from("parallel"), String::from("unreachable")]
    }

    #[test]
    fn crash_markers_classify_as_engine_crash() {
        for message in [
            "panicked at 'lines are parallel'",
            "RuntimeError: unreachable executed",
        ] {
            let error = EngineError::Failed(message.to_owned());
            assert_eq!(classify(&error, &markers()), FailureKind::EngineCrash);
        }
    }

    #[test]
    fn other_messages_are_unknown() {
        let error = EngineError::Failed(String::from("out of memory"));
        assert_eq!(classify(&error, &markers()), FailureKind::Unknown);
    }

    #[test]
    fn load_failures_are_unavailable_even_with_markers() {
        let error = EngineError::Unavailable(String::from("unreachable module"));
        assert_eq!(classify(&error, &markers()), FailureKind::EngineUnavailable);
    }

    #[test]
    fn empty_marker_matches_nothing() {
        let error = EngineError::Failed(String::from("anything"));
        assert_eq!(classify(&error, &[String::new()]), FailureKind::Unknown);
    }

    #[test]
    fn marker_set_is_configurable() {
        let error = EngineError::Failed(String::from("index out of bounds"));
        assert_eq!(classify(&error, &markers()), FailureKind::Unknown);
        assert_eq!(
            classify(&error, &[String::from("out of bounds")]),
            FailureKind::EngineCrash
        );
    }

    #[test]
    #[allow(clippy::panic)]
    fn guarded_turns_panics_into_failures() {
        let result: Result<(), EngineError> = guarded(|| panic!("parallel lines detected"));
        assert_eq!(
            result,
            Err(EngineError::Failed(String::from("parallel lines detected")))
        );

        let formatted: Result<(), EngineError> = guarded(|| panic!("code {}", 7));
        assert_eq!(formatted, Err(EngineError::Failed(String::from("code 7"))));
    }

    #[test]
    fn guarded_passes_results_through() {
        assert_eq!(guarded(|| Ok::<_, EngineError>(3)), Ok(3));
    }

    #[test]
    fn option_mapping_uses_fixed_constants() {
        let options = TraceOptions::default();
        let primary = PrimaryOptions::new(&options, CurveFitting::Polygon, 70);
        assert_eq!(primary.corner_threshold, 70);
        assert_eq!(primary.max_iterations, 10);
        assert_eq!(primary.splice_threshold, 45);
        assert!((primary.length_threshold - 4.0).abs() < f64::EPSILON);

        let fallback = FallbackOptions::new(&options);
        assert_eq!(fallback.min_feature_size, options.filter_speckle);
        assert_eq!(fallback.turn_policy, TurnPolicy::Minority);
        assert!(fallback.monochrome);
    }
}
