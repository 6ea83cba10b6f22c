//! pixtrace-engines: The bundled tracing engines.
//!
//! - [`ContourEngine`]: the primary engine. Incremental, one region per
//!   tick, built on `imageproc` border following.
//! - [`OutlineEngine`]: the fallback engine. Traces pixel-border loops
//!   in a single call.
//!
//! Both consume the binary buffers produced by
//! [`pixtrace_core::preprocess`] and emit SVG markup through
//! [`pixtrace_export::to_svg`].

pub mod contour;
pub mod geometry;
pub mod outline;

pub use contour::{ContourConverter, ContourEngine};
pub use outline::OutlineEngine;

use pixtrace_core::Engines;

/// The bundled primary and fallback engines, ready for a session.
#[must_use]
pub fn default_engines() -> Engines {
    Engines::new(ContourEngine::new(), OutlineEngine::new())
}
