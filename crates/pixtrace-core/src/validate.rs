//! Content validation: reject binary buffers with no tractable edges.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::preprocess::is_black;
use crate::types::PixelBuffer;

/// Black ratios at or below this are "almost all white".
pub const MIN_BLACK_RATIO: f64 = 0.001;
/// Black ratios at or above this are "almost all black".
pub const MAX_BLACK_RATIO: f64 = 0.999;

/// Why a buffer was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentIssue {
    /// Black ratio at or below [`MIN_BLACK_RATIO`].
    AlmostAllWhite,
    /// Black ratio at or above [`MAX_BLACK_RATIO`].
    AlmostAllBlack,
}

impl ContentIssue {
    /// User-facing explanation with a hint on what to change.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::AlmostAllWhite => {
                "image is almost all white; try lowering the threshold or inverting"
            }
            Self::AlmostAllBlack => {
                "image is almost all black; try raising the threshold or inverting"
            }
        }
    }
}

impl fmt::Display for ContentIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Result of validating one binary buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentCheck {
    /// Black pixel count.
    pub black_pixels: u64,
    /// White pixel count.
    pub white_pixels: u64,
    /// `black / (black + white)`; 0 for an empty buffer.
    pub black_ratio: f64,
    /// Set when the buffer is rejected.
    pub issue: Option<ContentIssue>,
}

impl ContentCheck {
    /// Whether the buffer has enough edge content to trace.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.issue.is_none()
    }
}

/// Count black vs white pixels and decide whether the buffer is
/// traceable.
///
/// Valid iff `0.001 < black_ratio < 0.999`. An empty buffer has no black
/// pixels and is reported as almost all white.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn check_content(buffer: &PixelBuffer) -> ContentCheck {
    let (width, height) = buffer.dimensions();
    let total = u64::from(width) * u64::from(height);
    let black_pixels = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .filter(|&(x, y)| is_black(buffer, x, y))
        .count() as u64;

    let black_ratio = if total == 0 {
        0.0
    } else {
        black_pixels as f64 / total as f64
    };
    let issue = if black_ratio <= MIN_BLACK_RATIO {
        Some(ContentIssue::AlmostAllWhite)
    } else if black_ratio >= MAX_BLACK_RATIO {
        Some(ContentIssue::AlmostAllBlack)
    } else {
        None
    };

    ContentCheck {
        black_pixels,
        white_pixels: total - black_pixels,
        black_ratio,
        issue,
    }
}
