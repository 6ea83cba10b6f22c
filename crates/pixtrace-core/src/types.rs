//! Shared types for the pixtrace core.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::presets::Preset;

/// Re-export `RgbaImage` so downstream crates can build and inspect
/// pixel buffers without depending on `image` directly.
pub use image::RgbaImage;

/// A pixel buffer: width, height, and row-major RGBA samples.
///
/// Every stage that transforms a buffer produces a new one; the source
/// buffer of a trace request is reused unchanged by every attempt.
pub type PixelBuffer = RgbaImage;

/// Serde support for `std::time::Duration` as fractional milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional milliseconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_secs_f64() * 1000.0).serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional milliseconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(millis / 1000.0).map_err(|_| {
            serde::de::Error::custom(
                "duration milliseconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How traced borders are turned into path geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveFitting {
    /// Follow the pixel staircase exactly.
    Pixel,
    /// Straight-line polygon approximation.
    Polygon,
    /// Smooth curves with sharp corners preserved.
    #[default]
    Spline,
}

/// User-tunable trace parameters.
///
/// Snapshotted when a preview or convert request is issued; later edits
/// never affect a request that is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceOptions {
    /// Luminance cutoff: pixels darker than this become black.
    pub threshold: u8,
    /// Swap black and white after thresholding.
    pub invert: bool,
    /// Regions smaller than `filter_speckle²` pixels are discarded.
    pub filter_speckle: u32,
    /// Turning angle in degrees above which a vertex is a sharp corner.
    pub corner_threshold: u32,
    /// Path geometry mode.
    pub curve_fitting: CurveFitting,
    /// Decimal places kept in emitted coordinates.
    pub path_precision: u32,
}

impl TraceOptions {
    /// Largest accepted corner threshold, in degrees.
    pub const MAX_CORNER_THRESHOLD: u32 = 180;
    /// Smallest accepted path precision.
    pub const MIN_PATH_PRECISION: u32 = 1;
    /// Largest accepted path precision.
    pub const MAX_PATH_PRECISION: u32 = 10;

    /// Check the documented parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] naming the first out-of-range field.
    pub const fn validate(&self) -> Result<(), OptionsError> {
        if self.corner_threshold > Self::MAX_CORNER_THRESHOLD {
            return Err(OptionsError::CornerThreshold(self.corner_threshold));
        }
        if self.path_precision < Self::MIN_PATH_PRECISION
            || self.path_precision > Self::MAX_PATH_PRECISION
        {
            return Err(OptionsError::PathPrecision(self.path_precision));
        }
        Ok(())
    }
}

impl Default for TraceOptions {
    fn default() -> Self {
        Preset::default().options()
    }
}

/// Out-of-range trace parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    /// Corner threshold above 180 degrees.
    #[error("corner threshold must be between 0 and 180 degrees, got {0}")]
    CornerThreshold(u32),
    /// Path precision outside 1..=10.
    #[error("path precision must be between 1 and 10, got {0}")]
    PathPrecision(u32),
}

/// Host-assigned identity of a document node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a node id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An exportable node as reported by the host on selection change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Node identity.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Host node type (e.g. `RECTANGLE`, `FRAME`).
    #[serde(rename = "type")]
    pub node_type: String,
    /// Document-space width, rounded.
    pub width: u32,
    /// Document-space height, rounded.
    pub height: u32,
}

/// Identity and geometry of exported pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    /// Node the pixels were exported from.
    pub node_id: NodeId,
    /// Node display name.
    pub name: String,
    /// Exported pixel width (after any downscale).
    pub width: u32,
    /// Exported pixel height (after any downscale).
    pub height: u32,
    /// Document-space width of the node.
    pub original_width: u32,
    /// Document-space height of the node.
    pub original_height: u32,
}

impl SourceDescriptor {
    /// Exported pixel dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Document-space dimensions.
    #[must_use]
    pub const fn original_dimensions(&self) -> Dimensions {
        Dimensions::new(self.original_width, self.original_height)
    }
}

/// Which engine produced (or failed to produce) a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Incremental engine with the known geometry instability.
    Primary,
    /// Single-call engine used after the primary is abandoned.
    Fallback,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// Failure taxonomy shared by every layer above the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Input has no tractable edges (near-uniform after thresholding).
    InvalidContent,
    /// The primary engine hit its internal defect.
    EngineCrash,
    /// An engine could not be loaded or initialized.
    EngineUnavailable,
    /// The host could not rasterize a node (or its pixels were unreadable).
    HostExportFailure,
    /// Anything else; surfaced verbatim.
    Unknown,
}

impl FailureKind {
    /// Whether the retry ladder may escalate past this failure.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::EngineCrash)
    }
}

/// A terminal failure as seen by everything above the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct TraceFailure {
    /// Classified failure kind.
    pub kind: FailureKind,
    /// Human-readable message, engine text verbatim where applicable.
    pub message: String,
}

impl TraceFailure {
    /// Create a failure of the given kind.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A successful trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Traced {
    /// Normalized vector markup.
    pub markup: String,
    /// Latency from the orchestrator's entry, including failed attempts.
    #[serde(with = "duration_ms", rename = "elapsedMs")]
    pub elapsed: Duration,
    /// Engine that produced the markup.
    pub engine: EngineKind,
    /// Number of attempts made, including the successful one.
    pub attempts: u8,
}

/// Final result of one trace request.
pub type TraceOutcome = Result<Traced, TraceFailure>;
