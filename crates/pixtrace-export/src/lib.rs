//! pixtrace-export: Pure markup helpers (sans-IO)
//!
//! Renders traced paths into SVG documents, repairs sizing metadata on
//! markup produced by the tracing engines, and prepares markup for
//! display in a scalable preview container.

pub mod normalize;
pub mod preview;
pub mod svg;
mod tag;

pub use normalize::{is_plausible_markup, normalize_markup};
pub use preview::preview_markup;
pub use svg::{PathPoint, RenderStyle, Segment, Shape, Subpath, to_svg};
